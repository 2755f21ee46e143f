// Framebuffer decoding shared by the adb_client backends
use super::error::{AdbError, AdbResult};
use image::{ImageBuffer, ImageFormat, codecs::png::PngEncoder};
use std::io::Cursor;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Largest header accepted in front of a raw framebuffer dump.
const MAX_HEADER: usize = 64;

/// Turn whatever `framebuffer_bytes()` returned into PNG bytes.
///
/// Encoded PNG passes through, JPEG is re-encoded, and raw RGBA / RGB /
/// RGB565 dumps are decoded using the known screen size.
pub fn framebuffer_to_png(data: Vec<u8>, width: u32, height: u32) -> AdbResult<Vec<u8>> {
    if data.starts_with(PNG_MAGIC) {
        return Ok(data);
    }
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8 {
        let img = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)?;
        return encode_png(&img);
    }

    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 {
        return Err(AdbError::FramebufferToPngFailed {
            description: "screen size unknown".to_string(),
        });
    }

    let (header, bytes_per_pixel) = detect_layout(data.len(), pixel_count).ok_or_else(|| {
        AdbError::FramebufferToPngFailed {
            description: format!(
                "{} bytes for {} pixels ({:.2} bytes/pixel)",
                data.len(),
                pixel_count,
                data.len() as f64 / pixel_count as f64
            ),
        }
    })?;
    log::debug!(
        "Framebuffer {}x{}: header={} bytes, {} bytes/pixel",
        width,
        height,
        header,
        bytes_per_pixel
    );

    let pixels = &data[header..header + pixel_count * bytes_per_pixel];
    let img = match bytes_per_pixel {
        4 => ImageBuffer::<image::Rgba<u8>, _>::from_raw(width, height, pixels.to_vec())
            .map(image::DynamicImage::ImageRgba8),
        3 => ImageBuffer::<image::Rgb<u8>, _>::from_raw(width, height, pixels.to_vec())
            .map(image::DynamicImage::ImageRgb8),
        _ => ImageBuffer::<image::Rgb<u8>, _>::from_raw(width, height, rgb565_to_rgb(pixels))
            .map(image::DynamicImage::ImageRgb8),
    }
    .ok_or_else(|| AdbError::FramebufferToPngFailed {
        description: format!("buffer does not fit {width}x{height}"),
    })?;
    encode_png(&img)
}

/// Pick bytes per pixel (4, 3 or 2) so that at most `MAX_HEADER` bytes are
/// left over; pixel data sits at the end of the buffer.
fn detect_layout(len: usize, pixel_count: usize) -> Option<(usize, usize)> {
    [4usize, 3, 2].into_iter().find_map(|bpp| {
        let header = len.checked_sub(pixel_count * bpp)?;
        (header <= MAX_HEADER).then_some((header, bpp))
    })
}

fn rgb565_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(2) {
        let pixel = u16::from_le_bytes([chunk[0], chunk[1]]);
        let r = ((pixel >> 11) & 0x1F) as u8;
        let g = ((pixel >> 5) & 0x3F) as u8;
        let b = (pixel & 0x1F) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}

fn encode_png(img: &image::DynamicImage) -> AdbResult<Vec<u8>> {
    let mut data = Vec::new();
    let encoder = PngEncoder::new(Cursor::new(&mut data));
    img.write_with_encoder(encoder)?;
    Ok(data)
}
