// ADB module - device channel for screenshots and input events
// Three transports share one trait: the adb binary, the adb server protocol
// and direct USB (no daemon required).

pub mod backend;
mod blocking;
pub mod dry_run;
pub mod error;
pub mod framebuffer;
pub mod server;
pub mod shell;
pub mod types;
pub mod usb_impl;


// Re-export the main types and functions for easy access
pub use backend::AdbBackend;
pub use dry_run::DryRun;
pub use error::{AdbError, AdbResult};
pub use server::ServerAdb;
pub use shell::AdbShell;
pub use types::{AdbClient, BackendKind, ConnectOptions, Device, ImageCapture};
pub use usb_impl::UsbAdb;
