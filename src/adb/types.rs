// Core ADB types and traits
use super::error::{AdbError, AdbResult};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A decoded screenshot plus how long the device took to deliver it.
#[derive(Debug, Clone)]
pub struct ImageCapture {
    pub image: DynamicImage,
    pub duration_ms: u128,
}

// Trait defining the device channel (shell, server or usb implementations)
#[allow(async_fn_in_trait)]
pub trait AdbClient: Send + Sync {
    // Raw backend-specific capture, PNG or JPEG encoded
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>>;

    // Default high-level capture with timing and decoding
    async fn screen_capture(&self) -> AdbResult<ImageCapture> {
        let start = Instant::now();
        let bytes = self.screen_capture_bytes().await?;
        let duration_ms = start.elapsed().as_millis();
        let image = image::load_from_memory(&bytes)?;
        Ok(ImageCapture { image, duration_ms })
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<()>;
    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration: Option<u32>,
    ) -> AdbResult<()>;
    /// Run `adb shell <args>` and return stdout as text.
    async fn shell(&self, args: &[&str]) -> AdbResult<String>;
    fn screen_dimensions(&self) -> (u32, u32);
    fn device_name(&self) -> &str;
}

#[derive(Debug, PartialEq, Serialize, Clone)]
pub struct Device {
    pub name: String,
    pub transport_id: Option<String>,
}

/// Which transport talks to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External `adb` binary
    #[default]
    Shell,
    /// adb server protocol via adb_client
    Server,
    /// Direct USB via adb_client, no daemon
    Usb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Shell => "shell",
            BackendKind::Server => "server",
            BackendKind::Usb => "usb",
        }
    }
}

/// Per-command limits shared by every backend.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub adb_path: String,
    pub command_timeout: Duration,
    pub capture_timeout: Duration,
    /// Extra attempts after the first failure
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            command_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(10),
            retries: 1,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Parse `wm size` output. An override size wins over the physical one.
pub fn parse_screen_size(stdout: &str) -> AdbResult<(u32, u32)> {
    let mut physical = None;
    for line in stdout.lines() {
        let line = line.trim();
        let (is_override, size_str) = if let Some(rest) = line.strip_prefix("Override size: ") {
            (true, rest)
        } else if let Some(rest) = line.strip_prefix("Physical size: ") {
            (false, rest)
        } else {
            continue;
        };
        if let Some((x, y)) = size_str.trim().split_once('x')
            && let (Ok(x), Ok(y)) = (x.parse::<u32>(), y.parse::<u32>())
        {
            if is_override {
                return Ok((x, y));
            }
            physical = Some((x, y));
        }
    }
    physical.ok_or(AdbError::ScreenSizeParseFailed)
}

/// Key for a connected device: the first non-blank candidate, else `fallback`.
/// Progress records are stored under this, so it is never empty.
pub fn device_identity<'a>(candidates: impl IntoIterator<Item = &'a str>, fallback: &str) -> String {
    candidates
        .into_iter()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// `VID:PID` in hex, the form USB device listing prints.
pub fn parse_usb_id(name: &str) -> Option<(u16, u16)> {
    let (vendor, product) = name.trim().split_once(':')?;
    Some((
        u16::from_str_radix(vendor, 16).ok()?,
        u16::from_str_radix(product, 16).ok()?,
    ))
}

/// `wm size` reports the natural orientation while games usually run rotated,
/// so accept a point if it fits either orientation.
pub fn check_bounds(x: u32, y: u32, (w, h): (u32, u32)) -> AdbResult<()> {
    let long = w.max(h);
    if w == 0 || h == 0 || x > long || y > long {
        return Err(AdbError::TapOutOfBounds { x, y });
    }
    Ok(())
}
