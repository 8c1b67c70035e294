//! Image encoding: raw photo bytes → base64 `ImageData` of bounded size.
//!
//! Phone photos of notes are routinely 4000 × 3000 px. Vision APIs tile
//! large images and bill per tile, and beyond ~2000 px the extra pixels add
//! cost without adding legibility, so anything larger is downscaled and
//! re-encoded as JPEG. Images already within the cap are sent untouched.
//! `detail: "high"` keeps GPT-4-class models on the full tile budget so
//! small handwriting survives.

use crate::error::ModelError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode a photo for the VLM API, downscaling if either side exceeds
/// `max_dimension`.
pub fn encode_image(
    reference: &str,
    bytes: &[u8],
    declared_mime: Option<&str>,
    max_dimension: u32,
) -> Result<ImageData, ModelError> {
    let format = image::guess_format(bytes).ok();

    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            // Formats we cannot decode locally (e.g. HEIC) are passed through
            // when the source vouched for an image type.
            if let Some(mime) = declared_mime {
                debug!("Passing through undecodable {} ({})", mime, e);
                return Ok(wrap(STANDARD.encode(bytes), mime));
            }
            return Err(ModelError::Image {
                reference: reference.to_string(),
                detail: format!("not a decodable image: {e}"),
            });
        }
    };

    let (w, h) = img.dimensions();
    if w <= max_dimension && h <= max_dimension {
        let mime = format
            .map(|f| f.to_mime_type().to_string())
            .or_else(|| declared_mime.map(str::to_string))
            .unwrap_or_else(|| "image/png".to_string());
        return Ok(wrap(STANDARD.encode(bytes), &mime));
    }

    let resized = downscale(&img, max_dimension);
    let mut buf = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|e| ModelError::Image {
            reference: reference.to_string(),
            detail: format!("re-encoding failed: {e}"),
        })?;
    debug!(
        "Downscaled {}×{} → {}×{} ({} bytes)",
        w,
        h,
        resized.width(),
        resized.height(),
        buf.len()
    );
    Ok(wrap(STANDARD.encode(&buf), "image/jpeg"))
}

/// Fit the image inside `max × max`, preserving aspect ratio. JPEG has no
/// alpha channel, so the result is RGB.
fn downscale(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let resized = img.resize(max_dimension, max_dimension, FilterType::Triangle);
    DynamicImage::ImageRgb8(resized.to_rgb8())
}

fn wrap(b64: String, mime: &str) -> ImageData {
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, mime).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([20, 20, 20, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn small_image_passes_through() {
        let bytes = png(10, 10);
        let data = encode_image("p.png", &bytes, None, 2000).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn large_image_is_downscaled_to_jpeg() {
        let bytes = png(600, 300);
        let data = encode_image("p.png", &bytes, None, 256).unwrap();
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&STANDARD.decode(&data.data).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (256, 128));
    }

    #[test]
    fn garbage_without_declared_mime_is_rejected() {
        let err = encode_image("x.bin", b"not an image", None, 2000).unwrap_err();
        assert!(matches!(err, ModelError::Image { .. }));
    }

    #[test]
    fn undecodable_with_declared_mime_passes_through() {
        let data = encode_image("x.heic", b"opaque", Some("image/heic"), 2000).unwrap();
        assert_eq!(data.mime_type, "image/heic");
    }
}
