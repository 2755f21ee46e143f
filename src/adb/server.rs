// https://crates.io/crates/adb_client
// Device channel through a running adb server, without spawning the adb binary
use super::blocking::{self, shell_text};
use super::error::AdbResult;
use super::framebuffer::framebuffer_to_png;
use super::types::{
    AdbClient, ConnectOptions, Device, check_bounds, device_identity, parse_screen_size,
};
use adb_client::{ADBDeviceExt, ADBServer, ADBServerDevice};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ServerAdb {
    device: Device,
    server_device: Arc<Mutex<ADBServerDevice>>,
    screen_x: u32,
    screen_y: u32,
    options: ConnectOptions,
}

impl ServerAdb {
    pub async fn list_devices() -> AdbResult<Vec<Device>> {
        let mut server = ADBServer::default();
        let device_list = tokio::task::spawn_blocking(move || server.devices()).await??;
        Ok(device_list
            .into_iter()
            .map(|d| Device {
                name: d.identifier,
                transport_id: None,
            })
            .collect())
    }

    /// Open `device_name`, or the server's default device when it is empty.
    pub async fn new_with_device(device_name: &str, options: ConnectOptions) -> AdbResult<Self> {
        let mut server = ADBServer::default();
        let name = device_name.to_string();
        let server_device = tokio::task::spawn_blocking(move || {
            if name.is_empty() {
                server.get_device()
            } else {
                server.get_device_by_name(&name)
            }
        })
        .await??;
        let identifier = server_device.identifier.clone().unwrap_or_default();

        let mut adb = ServerAdb {
            device: Device {
                name: String::new(),
                transport_id: None,
            },
            server_device: Arc::new(Mutex::new(server_device)),
            screen_x: 0,
            screen_y: 0,
            options,
        };
        let (sx, sy) = parse_screen_size(&adb.shell(&["wm", "size"]).await?)?;
        adb.screen_x = sx;
        adb.screen_y = sy;
        let serial = adb.shell(&["getprop", "ro.serialno"]).await.unwrap_or_default();
        adb.device.name = device_identity([device_name, identifier.as_str(), serial.as_str()], "server");
        log::info!("📱 Server backend connected to '{}' ({}x{})", adb.device.name, sx, sy);
        Ok(adb)
    }

    async fn run_shell(&self, args: Vec<String>) -> AdbResult<String> {
        let description = args.join(" ");
        blocking::call(
            &self.server_device,
            &description,
            self.options.command_timeout,
            self.options.retries,
            self.options.retry_delay,
            move |dev: &mut ADBServerDevice| shell_text(dev, &args),
        )
        .await
    }
}

impl AdbClient for ServerAdb {
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
        let framebuffer = blocking::call(
            &self.server_device,
            "framebuffer",
            self.options.capture_timeout,
            self.options.retries,
            self.options.retry_delay,
            |dev: &mut ADBServerDevice| dev.framebuffer_bytes(),
        )
        .await;
        match framebuffer.and_then(|data| framebuffer_to_png(data, self.screen_x, self.screen_y)) {
            Ok(png) => Ok(png),
            Err(e) => {
                log::debug!("Framebuffer capture failed: {e}, falling back to screencap");
                blocking::call(
                    &self.server_device,
                    "screencap -p",
                    self.options.capture_timeout,
                    0,
                    self.options.retry_delay,
                    |dev: &mut ADBServerDevice| {
                        let mut out: Vec<u8> = Vec::new();
                        dev.shell_command(&["screencap", "-p"], &mut out)?;
                        Ok(out)
                    },
                )
                .await
            }
        }
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
        let mut cmd_parts: Vec<String> = vec![
            "input".into(),
            "swipe".into(),
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
        ];
        if let Some(d) = duration {
            cmd_parts.push(d.to_string());
        }
        self.run_shell(cmd_parts).await?;
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
