// Direct USB implementation without ADB daemon
use super::blocking::{self, shell_text};
use super::error::{AdbError, AdbResult};
use super::framebuffer::framebuffer_to_png;
use super::types::{
    AdbClient, ConnectOptions, Device, check_bounds, device_identity, parse_screen_size,
    parse_usb_id,
};
use adb_client::{ADBDeviceExt, ADBUSBDevice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UsbAdb {
    device: Device,
    usb_device: Arc<Mutex<ADBUSBDevice>>,
    screen_x: u32,
    screen_y: u32,
    options: ConnectOptions,
}

impl UsbAdb {
    pub async fn list_devices() -> AdbResult<Vec<Device>> {
        let list_future = tokio::task::spawn_blocking(adb_client::search_adb_devices);
        let found = tokio::time::timeout(Duration::from_secs(2), list_future)
            .await
            .map_err(|_| AdbError::Timeout {
                duration: Duration::from_secs(2),
                description: "USB device enumeration".to_string(),
            })???;
        Ok(found
            .map(|(vendor_id, product_id)| Device {
                name: format!("{vendor_id:04x}:{product_id:04x}"),
                transport_id: None,
            })
            .into_iter()
            .collect())
    }

    fn key_path() -> AdbResult<std::path::PathBuf> {
        // Persistent key shared with the adb daemon
        let key_path = homedir::my_home()
            .ok()
            .flatten()
            .map(|home| home.join(".android").join("adbkey"))
            .ok_or(AdbError::HomeDirectoryNotFound)?;
        if !key_path.exists() {
            return Err(AdbError::KeyNotFound { path: key_path });
        }
        Ok(key_path)
    }

    /// Open the `VID:PID` device named by `device_name`, or autodetect when it is
    /// empty or not in that form.
    pub async fn new_with_device(device_name: &str, options: ConnectOptions) -> AdbResult<Self> {
        let key_path = Self::key_path()?;
        log::info!("📱 Connecting to USB device using key {}", key_path.display());
        let usb_id = parse_usb_id(device_name);
        if usb_id.is_none() && !device_name.is_empty() {
            log::warn!("⚠️ USB devices are selected by VID:PID, autodetecting instead of {device_name}");
        }

        let mut attempt = 1;
        let usb_device = loop {
            let key = key_path.clone();
            let usb_future = tokio::task::spawn_blocking(move || match usb_id {
                Some((vendor_id, product_id)) => {
                    ADBUSBDevice::new_with_custom_private_key(vendor_id, product_id, key)
                }
                None => ADBUSBDevice::autodetect_with_custom_private_key(key),
            });
            let result = tokio::time::timeout(CONNECT_TIMEOUT, usb_future)
                .await
                .map_err(|_| AdbError::Timeout {
                    duration: CONNECT_TIMEOUT,
                    description: "USB connection, authorize USB debugging on the phone".to_string(),
                })??;
            match result {
                Ok(device) => break device,
                Err(e) => {
                    let message = e.to_string();
                    // AUTH/CNXN/CLSE handshakes commonly fail once on first connect
                    let transient = ["Resource busy", "AUTH", "CLSE", "CNXN"]
                        .iter()
                        .any(|token| message.contains(token));
                    if attempt < CONNECT_ATTEMPTS && transient {
                        log::warn!("⚠️ USB attempt {attempt}/{CONNECT_ATTEMPTS}: {message}");
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    } else {
                        return Err(AdbError::ConnectionFailed { source: e });
                    }
                }
            }
        };

        let usb_device = blocking::off_thread("USB connection check", options.command_timeout, move || {
            let mut usb_device = usb_device;
            let mut test_output = Vec::new();
            usb_device
                .shell_command(&["echo", "test"], &mut test_output)
                .map(|()| usb_device)
        })
        .await?
        .map_err(|source| AdbError::ConnectionValidationFailed { source })?;

        let mut adb = UsbAdb {
            device: Device {
                name: String::new(),
                transport_id: None,
            },
            usb_device: Arc::new(Mutex::new(usb_device)),
            screen_x: 0,
            screen_y: 0,
            options,
        };
        let (sx, sy) = parse_screen_size(&adb.shell(&["wm", "size"]).await?)?;
        adb.screen_x = sx;
        adb.screen_y = sy;
        let serial = adb.shell(&["getprop", "ro.serialno"]).await.unwrap_or_default();
        adb.device.name = device_identity([serial.as_str(), device_name], "usb");
        log::info!("🔌 USB device {} connected: {}x{}", adb.device.name, sx, sy);
        Ok(adb)
    }

    async fn run_shell(&self, args: Vec<String>) -> AdbResult<String> {
        let description = args.join(" ");
        blocking::call(
            &self.usb_device,
            &description,
            self.options.command_timeout,
            self.options.retries,
            self.options.retry_delay,
            move |dev: &mut ADBUSBDevice| shell_text(dev, &args),
        )
        .await
    }
}

impl AdbClient for UsbAdb {
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
        // screencap hangs forever on some devices over USB, so no fallback here
        let data = blocking::call(
            &self.usb_device,
            "framebuffer",
            self.options.capture_timeout,
            self.options.retries,
            self.options.retry_delay,
            |dev: &mut ADBUSBDevice| dev.framebuffer_bytes(),
        )
        .await?;
        log::debug!("📸 Captured {} bytes from framebuffer", data.len());
        framebuffer_to_png(data, self.screen_x, self.screen_y)
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<()> {
        check_bounds(x, y, self.screen_dimensions())?;
        self.run_shell(vec!["input".into(), "tap".into(), x.to_string(), y.to_string()])
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
        let mut parts = vec!["input".to_string(), "swipe".to_string()];
        parts.extend([x1, y1, x2, y2].iter().map(u32::to_string));
        parts.extend(duration.map(|d| d.to_string()));
        self.run_shell(parts).await?;
        Ok(())
    }

    async fn shell(&self, args: &[&str]) -> AdbResult<String> {
        self.run_shell(args.iter().map(|s| s.to_string()).collect())
            .await
    }

    fn screen_dimensions(&self) -> (u32, u32) {
        (self.screen_x, self.screen_y)
    }

    fn device_name(&self) -> &str {
        &self.device.name
    }
}
