//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`, and
//! PNG files for saved crops.
//!
//! PNG is lossless, which keeps axis labels and table digits legible for the
//! model. `detail: "high"` asks GPT-4-class models for the full tile budget.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode an image as a base64 PNG ready for the VLM API.
///
/// When `max_pixels` is set and the longest edge exceeds it, the image is
/// downscaled (aspect preserved) before encoding. Crops are sent at full
/// resolution; whole pages are capped.
pub fn encode_image(img: &DynamicImage, max_pixels: Option<u32>) -> Result<ImageData, image::ImageError> {
    let resized;
    let img = match max_pixels {
        Some(max) if img.width().max(img.height()) > max => {
            resized = img.resize(max, max, image::imageops::FilterType::Triangle);
            &resized
        }
        _ => img,
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Write `img` as a PNG file, creating parent directories as needed.
pub fn save_png(img: &DynamicImage, path: &Path) -> Result<(), image::ImageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
    }
    img.save_with_format(path, image::ImageFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    fn decoded(data: &ImageData) -> DynamicImage {
        let bytes = STANDARD.decode(&data.data).expect("valid base64");
        image::load_from_memory(&bytes).expect("valid png")
    }

    #[test]
    fn encode_small_image() {
        let data = encode_image(&red(10, 10), None).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(decoded(&data).width(), 10);
    }

    #[test]
    fn large_page_is_capped() {
        let data = encode_image(&red(400, 200), Some(100)).unwrap();
        let img = decoded(&data);
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn small_image_not_upscaled() {
        let data = encode_image(&red(40, 20), Some(100)).unwrap();
        assert_eq!(decoded(&data).width(), 40);
    }

    #[test]
    fn save_png_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crops").join("a.png");
        save_png(&red(8, 8), &path).unwrap();
        assert_eq!(image::open(&path).unwrap().height(), 8);
    }
}
