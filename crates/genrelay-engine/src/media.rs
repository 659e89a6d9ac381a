use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use genrelay_contracts::GenerationError;

use crate::llm::InlineImage;

/// Images above this size are re-encoded before upload.
pub const COMPRESS_THRESHOLD_BYTES: usize = 3 * 1024 * 1024;
/// 3.9 MiB.
pub const MAX_IMAGE_BYTES: usize = 4_089_446;
pub const MAX_DIMENSION: u32 = 3072;
const JPEG_QUALITY: u8 = 80;

/// Prepares an image attachment for the model, downscaling and re-encoding
/// oversized input as JPEG.
pub fn prepare_inline_image(
    bytes: Vec<u8>,
    mime_type: &str,
) -> Result<InlineImage, GenerationError> {
    if bytes.len() <= COMPRESS_THRESHOLD_BYTES {
        return Ok(InlineImage {
            mime_type: mime_type.to_string(),
            data: bytes,
        });
    }

    let original_len = bytes.len();
    let image = image::load_from_memory(&bytes)
        .map_err(|err| GenerationError::Compression(format!("cannot decode image: {err}")))?;
    let image = if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
        image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        image
    };
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|err| GenerationError::Compression(format!("cannot encode image: {err}")))?;
    if encoded.len() > MAX_IMAGE_BYTES {
        return Err(GenerationError::Compression(format!(
            "image is {} bytes after compression (limit {MAX_IMAGE_BYTES})",
            encoded.len()
        )));
    }
    tracing::debug!(
        before = original_len,
        after = encoded.len(),
        width = rgb.width(),
        height = rgb.height(),
        "compressed image attachment"
    );
    Ok(InlineImage {
        mime_type: "image/jpeg".to_string(),
        data: encoded,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn gradient_bmp(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut bytes, ImageFormat::Bmp)?;
        Ok(bytes.into_inner())
    }

    #[test]
    fn small_images_pass_through() -> anyhow::Result<()> {
        let bytes = gradient_bmp(64, 64)?;
        let prepared = prepare_inline_image(bytes.clone(), "image/bmp")?;
        assert_eq!(prepared.mime_type, "image/bmp");
        assert_eq!(prepared.data, bytes);
        Ok(())
    }

    #[test]
    fn large_images_are_reencoded_as_jpeg() -> anyhow::Result<()> {
        let bytes = gradient_bmp(1100, 1000)?;
        assert!(bytes.len() > COMPRESS_THRESHOLD_BYTES);
        let prepared = prepare_inline_image(bytes, "image/bmp")?;
        assert_eq!(prepared.mime_type, "image/jpeg");
        assert!(prepared.data.len() <= MAX_IMAGE_BYTES);
        let decoded = image::load_from_memory(&prepared.data)?;
        assert_eq!((decoded.width(), decoded.height()), (1100, 1000));
        Ok(())
    }

    #[test]
    fn oversized_dimensions_are_fit_inside_limit() -> anyhow::Result<()> {
        let bytes = gradient_bmp(3400, 400)?;
        let prepared = prepare_inline_image(bytes, "image/bmp")?;
        let decoded = image::load_from_memory(&prepared.data)?;
        assert_eq!(decoded.width(), MAX_DIMENSION);
        assert!(decoded.height() < 400);
        Ok(())
    }

    #[test]
    fn undecodable_large_input_is_a_compression_failure() {
        let err = prepare_inline_image(vec![0u8; COMPRESS_THRESHOLD_BYTES + 1], "image/png")
            .unwrap_err();
        assert!(matches!(err, GenerationError::Compression(_)));
    }
}
