use super::error::{AdbError, AdbResult};
use super::types::{AdbClient, ConnectOptions, Device, check_bounds, parse_screen_size};
use std::time::Duration;
use tokio::process::Command;

/// Device channel driving the external `adb` binary.
pub struct AdbShell {
    pub device: Device,
    pub screen_x: u32,
    pub screen_y: u32,
    options: ConnectOptions,
}

impl AdbShell {
    fn ensure_adb_available(options: &ConnectOptions) -> AdbResult<()> {
        match std::process::Command::new(&options.adb_path)
            .arg("version")
            .output()
        {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => Err(AdbError::AdbUnavailable {
                path: options.adb_path.clone(),
                description: format!("returned non-zero ({})", out.status),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AdbError::AdbUnavailable {
                path: options.adb_path.clone(),
                description: "binary not found in PATH".to_string(),
            }),
            Err(e) => Err(AdbError::AdbUnavailable {
                path: options.adb_path.clone(),
                description: e.to_string(),
            }),
        }
    }

    /// One adb invocation bounded by `timeout`; the child is killed when it expires.
    async fn exec(options: &ConnectOptions, args: &[String], timeout: Duration) -> AdbResult<Vec<u8>> {
        let command = args.join(" ");
        let output_future = Command::new(&options.adb_path)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(timeout, output_future)
            .await
            .map_err(|_| AdbError::Timeout {
                duration: timeout,
                description: format!("adb {command}"),
            })?
            .map_err(|source| AdbError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(AdbError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// `exec` with the configured retry budget.
    async fn exec_with_retry(
        options: &ConnectOptions,
        args: &[String],
        timeout: Duration,
    ) -> AdbResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match Self::exec(options, args, timeout).await {
                Ok(out) => return Ok(out),
                Err(e) if attempt < options.retries => {
                    attempt += 1;
                    log::warn!(
                        "⚠️ adb {} failed (attempt {}/{}): {}",
                        args.join(" "),
                        attempt,
                        options.retries + 1,
                        e
                    );
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Device-scoped invocation: prefixes `-t <transport_id>` or `-s <serial>`.
    async fn run(&self, args: &[&str], timeout: Duration) -> AdbResult<Vec<u8>> {
        let mut full: Vec<String> = match &self.device.transport_id {
            Some(tid) => vec!["-t".into(), tid.clone()],
            None => vec!["-s".into(), self.device.name.clone()],
        };
        full.extend(args.iter().map(|s| s.to_string()));
        Self::exec_with_retry(&self.options, &full, timeout).await
    }

    pub async fn list_devices(options: &ConnectOptions) -> AdbResult<Vec<Device>> {
        Self::ensure_adb_available(options)?;
        let args = ["devices".to_string(), "-l".to_string()];
        let stdout = Self::exec_with_retry(options, &args, options.command_timeout).await?;
        Ok(Self::parse_devices(&String::from_utf8_lossy(&stdout)))
    }

    /// Open `device_name`, or the first listed device when it is empty.
    /// Unknown names are tried with `adb connect` (network devices).
    pub async fn new_with_device(device_name: &str, options: ConnectOptions) -> AdbResult<Self> {
        let devices = Self::list_devices(&options).await?;
        if device_name.is_empty() {
            let device = devices
                .into_iter()
                .next()
                .ok_or(AdbError::NoDevices { backend: "shell" })?;
            return Self::open(device, options).await;
        }
        if let Some(device) = devices.into_iter().find(|d| d.name == device_name) {
            return Self::open(device, options).await;
        }

        log::info!("🔌 {device_name} not listed, trying adb connect");
        let args = ["connect".to_string(), device_name.to_string()];
        let stdout = Self::exec(&options, &args, options.command_timeout).await?;
        let stdout = String::from_utf8_lossy(&stdout);
        if stdout.contains("Connection refused") || stdout.contains("failed") {
            return Err(AdbError::CommandFailed {
                command: format!("connect {device_name}"),
                status: "connect refused".to_string(),
                stderr: format!("{} Try: 'adb tcpip 5555'", stdout.trim()),
            });
        }
        let device = Self::list_devices(&options)
            .await?
            .into_iter()
            .find(|d| d.name == device_name)
            .ok_or_else(|| AdbError::DeviceNotFound {
                name: device_name.to_string(),
            })?;
        Self::open(device, options).await
    }

    async fn open(device: Device, options: ConnectOptions) -> AdbResult<Self> {
        let mut shell = Self {
            device,
            screen_x: 0,
            screen_y: 0,
            options,
        };
        let out = shell.run(&["shell", "wm", "size"], shell.options.command_timeout).await?;
        let (x, y) = parse_screen_size(&String::from_utf8_lossy(&out))?;
        shell.screen_x = x;
        shell.screen_y = y;
        log::info!("📱 Shell backend connected to {} ({}x{})", shell.device.name, x, y);
        Ok(shell)
    }

    pub fn parse_devices(output: &str) -> Vec<Device> {
        output
            .lines()
            .skip(1)
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 && parts[1] == "device" {
                    let transport_id = parts
                        .iter()
                        .find_map(|part| part.strip_prefix("transport_id:"))
                        .map(str::to_string);
                    Some(Device {
                        name: parts[0].to_string(),
                        transport_id,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

impl AdbClient for AdbShell {
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
        self.run(&["exec-out", "screencap", "-p"], self.options.capture_timeout)
            .await
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<()> {
        check_bounds(x, y, self.screen_dimensions())?;
        let (xs, ys) = (x.to_string(), y.to_string());
        self.run(&["shell", "input", "tap", &xs, &ys], self.options.command_timeout)
            .await?;
        Ok(())
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration: Option<u32>,
    ) -> AdbResult<()> {
        for (x, y) in [(x1, y1), (x2, y2)] {
            check_bounds(x, y, self.screen_dimensions())?;
        }
        let mut parts: Vec<String> = vec![
            "shell".into(),
            "input".into(),
            "swipe".into(),
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
        ];
        if let Some(d) = duration {
            parts.push(d.to_string());
        }
        let refs: Vec<&str> = parts.iter().map(|s| s.as_str()).collect();
        self.run(&refs, self.options.command_timeout).await?;
        Ok(())
    }

    async fn shell(&self, args: &[&str]) -> AdbResult<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let out = self.run(&full, self.options.command_timeout).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn screen_dimensions(&self) -> (u32, u32) {
        (self.screen_x, self.screen_y)
    }

    fn device_name(&self) -> &str {
        &self.device.name
    }
}
