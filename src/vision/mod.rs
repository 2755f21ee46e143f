//! Perception primitives
//!
//! Region geometry, image preprocessing, template matching and text
//! recognition. Everything here turns pixels into raw signals; deciding what
//! the signals mean is left to `game_automation`.

pub mod error;
pub mod image_ops;
pub mod ocr;
pub mod region;
pub mod template;


// Re-export main types and functions
pub use error::{VisionError, VisionResult};
pub use image_ops::PreprocessOptions;
pub use ocr::{RecognizedText, TesseractOptions, TesseractRecognizer, TextRecognizer};
pub use region::Region;
pub use template::{Template, TemplateHit, TemplateLibrary, save_template};
