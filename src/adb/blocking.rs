// Running blocking adb_client calls from async code
use super::error::{AdbError, AdbResult};
use adb_client::{ADBDeviceExt, RustADBError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Run `f` against the locked device on the blocking pool, bounded by `timeout`
/// and retried up to `retries` extra times.
pub async fn call<D, T, F>(
    device: &Arc<Mutex<D>>,
    description: &str,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    f: F,
) -> AdbResult<T>
where
    D: ADBDeviceExt + Send + 'static,
    T: Send + 'static,
    F: Fn(&mut D) -> Result<T, RustADBError> + Clone + Send + 'static,
{
    let mut attempt = 0;
    loop {
        match call_once(device, description, timeout, f.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && !e.is_protocol_desync() => {
                attempt += 1;
                log::warn!("⚠️ {description} failed (attempt {attempt}/{}): {e}", retries + 1);
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn call_once<D, T, F>(
    device: &Arc<Mutex<D>>,
    description: &str,
    timeout: Duration,
    f: F,
) -> AdbResult<T>
where
    D: ADBDeviceExt + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut D) -> Result<T, RustADBError> + Send + 'static,
{
    let device = Arc::clone(device);
    // The blocking task keeps running after a timeout; the lock keeps later calls ordered.
    let result = off_thread(
        &format!("{description} (device may be disconnected)"),
        timeout,
        move || {
            let mut dev = device.blocking_lock();
            f(&mut dev)
        },
    )
    .await?;
    result.map_err(|source| AdbError::from_adb_error_with_desync_check(description.to_string(), source))
}

/// Run `f` on the blocking pool so the async thread stays free, bounded by `timeout`.
pub async fn off_thread<T, F>(description: &str, timeout: Duration, f: F) -> AdbResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join)) => Err(join.into()),
        Err(_) => Err(AdbError::Timeout {
            duration: timeout,
            description: description.to_string(),
        }),
    }
}

/// `shell_command` collecting stdout as text.
pub fn shell_text<D: ADBDeviceExt>(dev: &mut D, args: &[String]) -> Result<String, RustADBError> {
    let refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let mut out: Vec<u8> = Vec::new();
    dev.shell_command(&refs, &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
