use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for ADB operations.
pub type AdbResult<T> = Result<T, AdbError>;

/// The error type for all device-channel operations.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("'{path}' not usable: {description}. Install Android Platform Tools or switch to --impl server/usb.")]
    AdbUnavailable { path: String, description: String },

    #[error("No devices available ({backend} backend)")]
    NoDevices { backend: &'static str },

    #[error("Device '{name}' not found")]
    DeviceNotFound { name: String },

    #[error("Failed to enumerate devices: {source}")]
    DeviceEnumerationFailed {
        #[from]
        source: adb_client::RustADBError,
    },

    #[error("ADB key not found at {path:?}. Please run 'adb devices' once to generate it.")]
    KeyNotFound { path: PathBuf },

    #[error("Failed to determine home directory for ADB key")]
    HomeDirectoryNotFound,

    #[error("Failed to connect to USB device: {source}")]
    ConnectionFailed { source: adb_client::RustADBError },

    #[error("Connection validation failed. The device may not be properly authorized: {source}")]
    ConnectionValidationFailed { source: adb_client::RustADBError },

    #[error("Shell command '{command}' failed: {source}")]
    ShellCommandFailed {
        command: String,
        source: adb_client::RustADBError,
    },

    #[error("adb {command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Operation timed out after {duration:?}: {description}")]
    Timeout {
        duration: Duration,
        description: String,
    },

    #[error("Task failed to complete: {source}")]
    JoinError {
        #[from]
        source: tokio::task::JoinError,
    },

    #[error("Could not parse screen size from 'wm size' output.")]
    ScreenSizeParseFailed,

    #[error("Failed to convert framebuffer to PNG: {description}")]
    FramebufferToPngFailed { description: String },

    #[error("Failed to decode screenshot: {source}")]
    ImageDecode {
        #[from]
        source: image::ImageError,
    },

    #[error("Input coordinates are out of bounds: x={x}, y={y}")]
    TapOutOfBounds { x: u32, y: u32 },

    #[error("ADB protocol desync (CLSE error) - connection needs to be re-established: {description}")]
    ProtocolDesync { description: String },
}

impl AdbError {
    /// Check if this error indicates a protocol desync that requires reconnection
    pub fn is_protocol_desync(&self) -> bool {
        match self {
            AdbError::ShellCommandFailed { source, .. } => is_desync_message(&source.to_string()),
            AdbError::ProtocolDesync { .. } => true,
            _ => false,
        }
    }

    /// Wrap an adb_client error, classifying protocol desyncs separately
    pub fn from_adb_error_with_desync_check(
        command: String,
        source: adb_client::RustADBError,
    ) -> Self {
        let err_str = source.to_string();
        if is_desync_message(&err_str) {
            AdbError::ProtocolDesync {
                description: format!("Command '{command}' failed with protocol error: {err_str}"),
            }
        } else {
            AdbError::ShellCommandFailed { command, source }
        }
    }
}

fn is_desync_message(message: &str) -> bool {
    message.contains("CLSE") || message.contains("no write endpoint")
}
