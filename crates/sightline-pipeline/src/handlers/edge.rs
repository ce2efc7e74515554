//! Canny edge detection.
//!
//! Wraps [`imageproc::edges::canny`]. The result is a binary image where
//! white pixels (255) are edges and black pixels (0) are background.

use image::{DynamicImage, GrayImage};

use super::require_image;
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

/// Minimum allowed value for either Canny threshold.
///
/// A threshold of zero marks almost every pixel as an edge, so both
/// thresholds are raised to at least this value.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge.
///
/// Pixels with gradient magnitude above `high_threshold` are definite
/// edges; those between `low_threshold` and `high_threshold` are edges
/// only if connected to a definite edge.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);
    imageproc::edges::canny(image, low, high)
}

fn count_edge_pixels(edges: &GrayImage) -> u64 {
    edges.pixels().filter(|p| p.0[0] == 255).count() as u64
}

/// `Canny`: replace the working image with its edge map.
///
/// Reports the number of edge pixels as `edgePixels`.
pub(super) fn canny_stage(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let low = params.f32("threshold1", 0.0)?;
    let high = params.f32("threshold2", 50.0)?;
    if !low.is_finite() || !high.is_finite() {
        return Err(StageError::invalid("expected finite Canny thresholds"));
    }
    require_image(state)?;

    let edges = canny(&state.image().to_luma8(), low, high);
    report.insert("edgePixels", count_edge_pixels(&edges));
    state.set_image(DynamicImage::ImageLuma8(edges));
    Ok(())
}
