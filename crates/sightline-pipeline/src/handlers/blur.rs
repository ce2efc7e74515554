//! Box and Gaussian smoothing.
//!
//! Both filters work on one grayscale channel at a time; colour images
//! are blurred channel by channel, which is equivalent to blurring in
//! colour space since both filters are linear.

use image::GrayImage;

use super::{map_channels, positive_u32, require_image};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

/// Default Gaussian sigma.
pub const DEFAULT_SIGMA: f32 = 1.4;

/// Apply Gaussian blur to a grayscale image.
///
/// Higher `sigma` values produce more smoothing. Non-positive sigma values
/// (zero or negative) return the image unchanged, since `imageproc`'s
/// underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Mean filter over a `kernel_width` x `kernel_height` window.
///
/// Even kernel sizes are rounded down to the next odd size, so a kernel
/// of 1 or 2 leaves the image unchanged.
#[must_use = "returns the blurred image"]
pub fn box_blur(image: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    let x_radius = kernel_width.saturating_sub(1) / 2;
    let y_radius = kernel_height.saturating_sub(1) / 2;
    if x_radius == 0 && y_radius == 0 {
        return image.clone();
    }

    imageproc::filter::box_filter(image, x_radius, y_radius)
}

/// `blur`: box filter with kernel `ksize.width` x `ksize.height`.
pub(super) fn blur(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let width = positive_u32(params, "ksize.width", 3)?;
    let height = positive_u32(params, "ksize.height", 3)?;
    require_image(state)?;

    let blurred = map_channels(state.image(), |plane| box_blur(plane, width, height));
    state.set_image(blurred);
    Ok(())
}

/// `GaussianBlur`: Gaussian filter with standard deviation `sigma`.
pub(super) fn gaussian(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let sigma = params.f32("sigma", DEFAULT_SIGMA)?;
    if !sigma.is_finite() {
        return Err(StageError::invalid(format!("expected a finite sigma, got {sigma}")));
    }
    require_image(state)?;

    let blurred = map_channels(state.image(), |plane| gaussian_blur(plane, sigma));
    state.set_image(blurred);
    Ok(())
}
