//! Image decoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the
//! [`DynamicImage`] a pipeline runs on. The pixel layout of the file is
//! kept: gray stays gray, alpha stays alpha.

use image::DynamicImage;

use crate::types::PipelineError;

/// Decode raw image bytes.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let image = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "decoded input image"
    );
    Ok(image)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{ColorType, ExtendedColorType, ImageEncoder, codecs::png::PngEncoder};

    use super::*;

    fn png(pixels: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Vec<u8> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(pixels, width, height, color)
            .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode(&[]), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn rgba_png_keeps_alpha() {
        let pixels = [10, 20, 30, 40].repeat(6);
        let image = decode(&png(&pixels, 3, 2, ExtendedColorType::Rgba8)).unwrap();
        assert_eq!(image.color(), ColorType::Rgba8);
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.to_rgba8().get_pixel(2, 1).0, [10, 20, 30, 40]);
    }

    #[test]
    fn gray_png_stays_gray() {
        let image = decode(&png(&[7; 20], 5, 4, ExtendedColorType::L8)).unwrap();
        assert_eq!(image.color(), ColorType::L8);
        assert_eq!(image.to_luma8().get_pixel(4, 3).0[0], 7);
    }
}
