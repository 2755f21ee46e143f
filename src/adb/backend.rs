use super::error::AdbResult;
use super::server::ServerAdb;
use super::shell::AdbShell;
use super::types::{AdbClient, BackendKind, ConnectOptions, Device};
use super::usb_impl::UsbAdb;

pub enum AdbBackend {
    Shell(AdbShell),
    Server(ServerAdb),
    Usb(UsbAdb),
}

impl AdbBackend {
    pub async fn list_devices(kind: BackendKind, options: &ConnectOptions) -> AdbResult<Vec<Device>> {
        match kind {
            BackendKind::Shell => AdbShell::list_devices(options).await,
            BackendKind::Server => ServerAdb::list_devices().await,
            BackendKind::Usb => UsbAdb::list_devices().await,
        }
    }

    /// Connect to `device` (empty = first available) with the chosen transport.
    pub async fn connect(kind: BackendKind, device: &str, options: ConnectOptions) -> AdbResult<Self> {
        log::debug!("Connecting via {} backend to '{}'", kind.as_str(), device);
        Ok(match kind {
            BackendKind::Shell => AdbBackend::Shell(AdbShell::new_with_device(device, options).await?),
            BackendKind::Server => {
                AdbBackend::Server(ServerAdb::new_with_device(device, options).await?)
            }
            BackendKind::Usb => AdbBackend::Usb(UsbAdb::new_with_device(device, options).await?),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            AdbBackend::Shell(_) => BackendKind::Shell,
            AdbBackend::Server(_) => BackendKind::Server,
            AdbBackend::Usb(_) => BackendKind::Usb,
        }
    }
}

impl AdbClient for AdbBackend {
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
        match self {
            AdbBackend::Shell(s) => s.screen_capture_bytes().await,
            AdbBackend::Server(r) => r.screen_capture_bytes().await,
            AdbBackend::Usb(u) => u.screen_capture_bytes().await,
        }
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<()> {
        match self {
            AdbBackend::Shell(s) => s.tap(x, y).await,
            AdbBackend::Server(r) => r.tap(x, y).await,
            AdbBackend::Usb(u) => u.tap(x, y).await,
        }
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration: Option<u32>,
    ) -> AdbResult<()> {
        match self {
            AdbBackend::Shell(s) => s.swipe(x1, y1, x2, y2, duration).await,
            AdbBackend::Server(r) => r.swipe(x1, y1, x2, y2, duration).await,
            AdbBackend::Usb(u) => u.swipe(x1, y1, x2, y2, duration).await,
        }
    }

    async fn shell(&self, args: &[&str]) -> AdbResult<String> {
        match self {
            AdbBackend::Shell(s) => s.shell(args).await,
            AdbBackend::Server(r) => r.shell(args).await,
            AdbBackend::Usb(u) => u.shell(args).await,
        }
    }

    fn screen_dimensions(&self) -> (u32, u32) {
        match self {
            AdbBackend::Shell(s) => s.screen_dimensions(),
            AdbBackend::Server(r) => r.screen_dimensions(),
            AdbBackend::Usb(u) => u.screen_dimensions(),
        }
    }

    fn device_name(&self) -> &str {
        match self {
            AdbBackend::Shell(s) => s.device_name(),
            AdbBackend::Server(r) => r.device_name(),
            AdbBackend::Usb(u) => u.device_name(),
        }
    }
}
