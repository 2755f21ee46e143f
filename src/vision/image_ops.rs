//! Image primitives used before recognition

use super::region::Region;
use image::{DynamicImage, GrayImage, Luma, imageops};
use serde::{Deserialize, Serialize};

/// Preprocessing applied to a screenshot before text recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    pub grayscale: bool,
    /// Percentage change, 0 keeps contrast unchanged
    pub contrast: f32,
    pub brightness: i32,
    /// Gaussian sigma, 0 disables blurring
    pub blur_sigma: f32,
    /// Binarization cut-off; `None` keeps gray levels
    pub threshold: Option<u8>,
    /// Upscaling small text helps recognition
    pub scale: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            contrast: 20.0,
            brightness: 10,
            blur_sigma: 0.0,
            threshold: None,
            scale: 1.0,
        }
    }
}

/// Crop to `region` after clipping it to the image; `None` if nothing is left.
pub fn crop(image: &DynamicImage, region: Region) -> Option<DynamicImage> {
    let clipped = region.clip_to_screen(image.width(), image.height())?;
    Some(image.crop_imm(clipped.x, clipped.y, clipped.width, clipped.height))
}

pub fn grayscale(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

pub fn adjust(gray: &GrayImage, contrast: f32, brightness: i32) -> GrayImage {
    let mut out = if contrast != 0.0 {
        imageops::contrast(gray, contrast)
    } else {
        gray.clone()
    };
    if brightness != 0 {
        out = imageops::brighten(&out, brightness);
    }
    out
}

pub fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return gray.clone();
    }
    imageops::blur(gray, sigma)
}

/// Pixels above `threshold` become white, the rest black.
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn resize(image: &DynamicImage, scale: f32) -> DynamicImage {
    if (scale - 1.0).abs() < f32::EPSILON || scale <= 0.0 {
        return image.clone();
    }
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);
    image.resize_exact(width, height, imageops::FilterType::Triangle)
}

/// Mean RGB over `region`, `None` when the region misses the image.
pub fn average_color(image: &DynamicImage, region: Region) -> Option<[f64; 3]> {
    let patch = crop(image, region)?.to_rgb8();
    let count = patch.width() as f64 * patch.height() as f64;
    let mut sums = [0f64; 3];
    for pixel in patch.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += channel as f64;
        }
    }
    Some(sums.map(|s| s / count))
}

/// Run the configured pipeline: scale, grayscale, contrast/brightness, blur, binarize.
pub fn preprocess(image: &DynamicImage, options: &PreprocessOptions) -> DynamicImage {
    let scaled = resize(image, options.scale);
    if !options.grayscale {
        return scaled;
    }
    let mut gray = adjust(&grayscale(&scaled), options.contrast, options.brightness);
    gray = blur(&gray, options.blur_sigma);
    if let Some(threshold) = options.threshold {
        gray = binarize(&gray, threshold);
    }
    DynamicImage::ImageLuma8(gray)
}
