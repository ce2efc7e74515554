//! Operations that replace the working image outright.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use super::{check_area, positive_u32, saturate};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatType {
    Gray,
    Rgb,
    Rgba,
}

const MAT_TYPES: [(&str, MatType); 4] = [
    ("CV_8U", MatType::Gray),
    ("CV_8UC1", MatType::Gray),
    ("CV_8UC3", MatType::Rgb),
    ("CV_8UC4", MatType::Rgba),
];

/// `Mat`: replace the working image with a solid colour.
pub(super) fn mat(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let current = state.dimensions();
    let width = positive_u32(params, "width", current.width)?;
    let height = positive_u32(params, "height", current.height)?;
    check_area(width, height)?;
    let kind = params.choice("type", MatType::Rgb, &MAT_TYPES)?;
    let color = params.scalar("color", [0.0; 4])?;
    if let Some(negative) = color.iter().find(|&&c| c < 0.0) {
        return Err(StageError::invalid(format!(
            "expected color components >= 0, got {negative}"
        )));
    }
    let [c0, c1, c2, c3] = color.map(saturate);

    let image = match kind {
        MatType::Gray => DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([c0]))),
        MatType::Rgb => DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([c0, c1, c2]))),
        MatType::Rgba => {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([c0, c1, c2, c3])))
        }
    };
    report.insert("rows", height);
    report.insert("cols", width);
    state.set_image(image);
    Ok(())
}

/// `stageImage`: restore the artifact cached by an earlier stage.
pub(super) fn stage_image(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let name = params.string("stage", "")?;
    if name.is_empty() {
        return Err(StageError::invalid("expected name of stage for image"));
    }
    let image = state
        .artifact(&name)
        .cloned()
        .ok_or(StageError::MissingReference(name))?;
    state.set_image(image);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::ColorType;
    use serde_json::json;

    use super::*;
    use crate::handlers::testing::{apply, luma_state as state};

    // --- Mat tests ---

    #[test]
    fn mat_defaults_to_current_size_rgb_black() {
        let mut state = state(5, 4);
        apply(mat, &json!({"op": "Mat"}), &mut state).unwrap();
        assert_eq!(state.image().color(), ColorType::Rgb8);
        assert_eq!((state.image().width(), state.image().height()), (5, 4));
        assert_eq!(state.image().to_rgb8().get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn mat_uses_type_size_and_color() {
        let mut state = state(1, 1);
        let report = apply(
            mat,
            &json!({"width": 3, "height": 2, "type": "CV_8UC1", "color": [200]}),
            &mut state,
        )
        .unwrap();
        assert_eq!(state.image().color(), ColorType::L8);
        assert_eq!(state.image().to_luma8().get_pixel(2, 1).0, [200]);
        assert_eq!(report.get("rows"), Some(&json!(2)));
        assert_eq!(report.get("cols"), Some(&json!(3)));
    }

    #[test]
    fn mat_rejects_zero_width_and_negative_color() {
        let mut state = state(2, 2);
        assert!(matches!(
            apply(mat, &json!({"width": 0}), &mut state),
            Err(StageError::Invalid(_))
        ));
        assert!(matches!(
            apply(mat, &json!({"color": [0, -1, 0]}), &mut state),
            Err(StageError::Invalid(_))
        ));
    }

    #[test]
    fn mat_on_empty_state_needs_explicit_size() {
        let mut state = state(0, 0);
        assert!(apply(mat, &json!({}), &mut state).is_err());
        apply(mat, &json!({"width": 4, "height": 4}), &mut state).unwrap();
        assert_eq!(state.dimensions().width, 4);
    }

    #[test]
    fn mat_rejects_oversized_canvas() {
        let mut state = state(2, 2);
        assert!(matches!(
            apply(mat, &json!({"width": 4_000_000_000_u32, "height": 4_000_000_000_u32}), &mut state),
            Err(StageError::Invalid(_))
        ));
    }

    #[test]
    fn mat_rejects_unknown_type() {
        let mut state = state(2, 2);
        assert!(apply(mat, &json!({"type": "CV_32FC1"}), &mut state).is_err());
    }

    // --- stageImage tests ---

    #[test]
    fn stage_image_restores_input() {
        let mut state = state(6, 3);
        state.set_image(DynamicImage::new_rgb8(1, 1));
        apply(stage_image, &json!({"stage": "input"}), &mut state).unwrap();
        assert_eq!(state.dimensions().width, 6);
    }

    #[test]
    fn stage_image_unknown_name_is_missing_reference() {
        let mut state = state(2, 2);
        let err = apply(stage_image, &json!({"stage": "later"}), &mut state).unwrap_err();
        assert!(matches!(err, StageError::MissingReference(ref name) if name == "later"));
    }

    #[test]
    fn stage_image_requires_stage() {
        let mut state = state(2, 2);
        assert!(matches!(
            apply(stage_image, &json!({}), &mut state),
            Err(StageError::Invalid(_))
        ));
    }
}
