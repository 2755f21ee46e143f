use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Image processing failed: {source}")]
    Image {
        #[from]
        source: image::ImageError,
    },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Template directory not found: {path:?}")]
    TemplateDirMissing { path: PathBuf },

    #[error("Failed to run '{program}': {source}")]
    OcrSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Text recognition timed out after {duration:?}")]
    OcrTimeout { duration: Duration },

    #[error("Text recognition exited with {status}: {stderr}")]
    OcrFailed { status: String, stderr: String },

    #[error("Region {region} lies outside the {width}x{height} image")]
    RegionOutside {
        region: String,
        width: u32,
        height: u32,
    },
}
