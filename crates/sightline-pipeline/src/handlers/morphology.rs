//! Grayscale dilation and erosion.

use image::{DynamicImage, GrayImage};
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};

use super::{map_channels, positive_u32, require_image};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

/// Structuring element shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Square window.
    Rect,
    /// Plus-like window, approximated by a diamond.
    Cross,
    /// Round window.
    Ellipse,
}

const SHAPES: [(&str, Shape); 3] = [
    ("MORPH_RECT", Shape::Rect),
    ("MORPH_CROSS", Shape::Cross),
    ("MORPH_ELLIPSE", Shape::Ellipse),
];

impl Shape {
    fn mask(self, radius: u8) -> Mask {
        match self {
            Self::Rect => Mask::square(radius),
            Self::Cross => Mask::diamond(radius),
            Self::Ellipse => Mask::disk(radius),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Dilate,
    Erode,
}

/// Structuring element parameters shared by both operations.
struct Element {
    shape: Shape,
    radius: u8,
    iterations: u32,
}

impl Element {
    fn from_params(params: &Params<'_>) -> Result<Self, StageError> {
        let width = positive_u32(params, "ksize.width", 3)?;
        let height = positive_u32(params, "ksize.height", 3)?;
        let shape = params.choice("shape", Shape::Rect, &SHAPES)?;
        let iterations = positive_u32(params, "iterations", 1)?;
        let radius = u8::try_from((width.max(height) - 1) / 2).map_err(|_| {
            StageError::invalid(format!("kernel {width}x{height} is too large"))
        })?;
        Ok(Self {
            shape,
            radius,
            iterations,
        })
    }

    fn apply(&self, op: Op, image: &GrayImage) -> GrayImage {
        if self.radius == 0 {
            return image.clone();
        }
        let mask = self.shape.mask(self.radius);
        let mut out = image.clone();
        for _ in 0..self.iterations {
            out = match op {
                Op::Dilate => grayscale_dilate(&out, &mask),
                Op::Erode => grayscale_erode(&out, &mask),
            };
        }
        out
    }
}

fn morph(op: Op, params: &Params<'_>, state: &mut ExecutionState) -> Result<(), StageError> {
    let element = Element::from_params(params)?;
    require_image(state)?;
    let out: DynamicImage = map_channels(state.image(), |plane| element.apply(op, plane));
    state.set_image(out);
    Ok(())
}

/// `dilate`: local maximum over the structuring element.
pub(super) fn dilate(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    morph(Op::Dilate, params, state)
}

/// `erode`: local minimum over the structuring element.
pub(super) fn erode(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    morph(Op::Erode, params, state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Luma;
    use serde_json::json;

    use super::*;
    use crate::handlers::testing::{apply, state_with};

    /// 9x9 black image with one white pixel in the middle.
    fn dot() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(9, 9, |x, y| {
            Luma([if (x, y) == (4, 4) { 255 } else { 0 }])
        }))
    }

    fn white_count(state: &ExecutionState) -> usize {
        state.image().to_luma8().pixels().filter(|p| p.0[0] == 255).count()
    }

    #[test]
    fn dilate_rect_grows_dot_to_square() {
        let mut state = state_with(dot());
        apply(dilate, &json!({}), &mut state).unwrap();
        assert_eq!(white_count(&state), 9);
    }

    #[test]
    fn dilate_cross_grows_dot_to_plus() {
        let mut state = state_with(dot());
        apply(dilate, &json!({"shape": "MORPH_CROSS"}), &mut state).unwrap();
        assert_eq!(white_count(&state), 5);
    }

    #[test]
    fn iterations_repeat_the_operation() {
        let mut state = state_with(dot());
        apply(dilate, &json!({"iterations": 2}), &mut state).unwrap();
        assert_eq!(white_count(&state), 25);
    }

    #[test]
    fn erode_removes_isolated_dot() {
        let mut state = state_with(dot());
        apply(erode, &json!({"ksize": {"width": 3, "height": 3}}), &mut state).unwrap();
        assert_eq!(white_count(&state), 0);
    }

    #[test]
    fn unit_kernel_is_identity() {
        let mut state = state_with(dot());
        apply(erode, &json!({"ksize.width": 1, "ksize.height": 1}), &mut state).unwrap();
        assert_eq!(state.image(), &dot());
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut state = state_with(dot());
        assert!(apply(dilate, &json!({"ksize.width": -3}), &mut state).is_err());
        assert!(apply(dilate, &json!({"shape": "MORPH_STAR"}), &mut state).is_err());
        assert!(apply(dilate, &json!({"ksize.width": 1000}), &mut state).is_err());
        assert!(apply(dilate, &json!({"iterations": 0}), &mut state).is_err());
    }
}
