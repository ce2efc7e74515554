//! Built-in operations.
//!
//! Each operation is a plain function with the [`Handler`] signature,
//! grouped by what it does. Operations that need file or network access
//! are registered by front ends, not here.
//!
//! [`Handler`]: crate::registry::Handler

mod analysis;
mod blur;
mod color;
mod draw;
mod edge;
mod geometry;
mod morphology;
mod source;

use image::{ColorType, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgba, RgbaImage};

use crate::params::Params;
use crate::registry::{Registry, StageError};
use crate::state::ExecutionState;

pub use analysis::{Blob, detect_blobs, gras, lape};
pub use blur::{box_blur, gaussian_blur};
pub use draw::{palette, rotated_corners};
pub use edge::{MIN_THRESHOLD, canny};
pub use geometry::{Affine, Interpolation, resize, warp_affine};

/// Largest image, in pixels, an operation may create.
pub const MAX_PIXELS: u32 = 1 << 26;

/// Register every built-in operation.
pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.register("Mat", source::mat);
    registry.register("stageImage", source::stage_image);
    registry.register("resize", geometry::resize_stage);
    registry.register("warpAffine", geometry::warp_affine_stage);
    registry.register("blur", blur::blur);
    registry.register("GaussianBlur", blur::gaussian);
    registry.register("cvtColor", color::cvt_color);
    registry.register("convertTo", color::convert_to);
    registry.register("normalize", color::normalize);
    registry.register("split", color::split);
    registry.register("equalizeHist", color::equalize_hist);
    registry.register("dilate", morphology::dilate);
    registry.register("erode", morphology::erode);
    registry.register("Canny", edge::canny_stage);
    registry.register("calcHist", analysis::calc_hist);
    registry.register("sharpness", analysis::sharpness);
    registry.register("SimpleBlobDetector", analysis::blob_detector);
    registry.register("rectangle", draw::rectangle);
    registry.register("circle", draw::circle);
    registry.register("drawRects", draw::draw_rects);
    registry.register("drawKeypoints", draw::draw_keypoints);
}

/// Fail if there is no working image to operate on.
fn require_image(state: &ExecutionState) -> Result<(), StageError> {
    let dimensions = state.dimensions();
    if dimensions.is_degenerate() {
        return Err(StageError::invalid(format!(
            "expected a working image, found {dimensions}"
        )));
    }
    Ok(())
}

/// Fail if a `width` x `height` image would exceed [`MAX_PIXELS`].
fn check_area(width: impl Into<f64>, height: impl Into<f64>) -> Result<(), StageError> {
    let (width, height) = (width.into(), height.into());
    if width * height > f64::from(MAX_PIXELS) {
        return Err(StageError::invalid(format!(
            "a {width}x{height} image exceeds the limit of {MAX_PIXELS} pixels"
        )));
    }
    Ok(())
}

/// Read a strictly positive pixel size.
fn positive_u32(params: &Params<'_>, key: &str, default: u32) -> Result<u32, StageError> {
    let value = params.i64(key, i64::from(default))?;
    u32::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| StageError::invalid(format!("expected {key} > 0, got {value}")))
}

/// Round and clamp to the `u8` range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn saturate(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Opaque drawing colour from a parameter scalar.
fn opaque(scalar: [f64; 4]) -> Rgba<u8> {
    Rgba([saturate(scalar[0]), saturate(scalar[1]), saturate(scalar[2]), 255])
}

/// Apply a single-channel operation to every channel of an image.
///
/// 8-bit gray and RGB images keep their layout; anything else is
/// processed as RGBA.
fn map_channels(image: &DynamicImage, f: impl Fn(&GrayImage) -> GrayImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(f(gray)),
        DynamicImage::ImageRgb8(rgb) => DynamicImage::ImageRgb8(map_planes(rgb, f)),
        other => DynamicImage::ImageRgba8(map_planes(&other.to_rgba8(), f)),
    }
}

fn map_planes<P>(
    buffer: &ImageBuffer<P, Vec<u8>>,
    f: impl Fn(&GrayImage) -> GrayImage,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = buffer.dimensions();
    let planes: Vec<GrayImage> = (0..usize::from(P::CHANNEL_COUNT))
        .map(|c| GrayImage::from_fn(w, h, |x, y| Luma([buffer.get_pixel(x, y).channels()[c]])))
        .map(|plane| f(&plane))
        .collect();

    ImageBuffer::from_fn(w, h, |x, y| {
        let mut pixel = *buffer.get_pixel(x, y);
        for (sample, plane) in pixel.channels_mut().iter_mut().zip(&planes) {
            *sample = plane.get_pixel(x, y).0[0];
        }
        pixel
    })
}

/// Apply `f` to every 8-bit sample, alpha included.
///
/// Layouts other than 8-bit gray, gray-alpha, RGB and RGBA are first
/// converted to RGBA.
fn map_samples(image: &DynamicImage, f: impl Fn(u8) -> u8) -> DynamicImage {
    fn apply<P: Pixel<Subpixel = u8>>(
        mut buffer: ImageBuffer<P, Vec<u8>>,
        f: impl Fn(u8) -> u8,
    ) -> ImageBuffer<P, Vec<u8>> {
        for sample in buffer.iter_mut() {
            *sample = f(*sample);
        }
        buffer
    }

    match image {
        DynamicImage::ImageLuma8(buffer) => DynamicImage::ImageLuma8(apply(buffer.clone(), f)),
        DynamicImage::ImageLumaA8(buffer) => DynamicImage::ImageLumaA8(apply(buffer.clone(), f)),
        DynamicImage::ImageRgb8(buffer) => DynamicImage::ImageRgb8(apply(buffer.clone(), f)),
        other => DynamicImage::ImageRgba8(apply(other.to_rgba8(), f)),
    }
}

/// Convert an RGBA working copy back towards the layout it came from.
///
/// Gray stays gray, images with alpha keep it, everything else is RGB.
fn restore_layout(color: ColorType, rgba: RgbaImage) -> DynamicImage {
    let rgba = DynamicImage::ImageRgba8(rgba);
    match color {
        ColorType::L8 | ColorType::L16 => DynamicImage::ImageLuma8(rgba.to_luma8()),
        c if c.has_alpha() => rgba,
        _ => DynamicImage::ImageRgb8(rgba.to_rgb8()),
    }
}
