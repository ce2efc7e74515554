//! Resizing and affine warps.

use std::fmt;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, Rgba};
use imageproc::geometric_transformations::{Interpolation as Warp, Projection, warp_into};

use super::{check_area, require_image, restore_layout, saturate};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

/// Resampling method used when resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    Linear,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    Cubic,
    /// Area averaging, approximated by a triangle filter.
    Area,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos,
}

const INTERPOLATIONS: [(&str, Interpolation); 5] = [
    ("INTER_NEAREST", Interpolation::Nearest),
    ("INTER_LINEAR", Interpolation::Linear),
    ("INTER_CUBIC", Interpolation::Cubic),
    ("INTER_AREA", Interpolation::Area),
    ("INTER_LANCZOS4", Interpolation::Lanczos),
];

impl Interpolation {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Linear | Self::Area => FilterType::Triangle,
            Self::Cubic => FilterType::CatmullRom,
            Self::Lanczos => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = INTERPOLATIONS
            .iter()
            .find(|(_, value)| value == self)
            .map_or("?", |&(name, _)| name);
        f.write_str(name)
    }
}

/// Scale `image` by `fx` horizontally and `fy` vertically.
///
/// Target sizes are rounded to the nearest pixel and may be zero.
#[must_use = "returns the resized image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resize(image: &DynamicImage, fx: f64, fy: f64, interpolation: Interpolation) -> DynamicImage {
    let width = (f64::from(image.width()) * fx).round().max(0.0) as u32;
    let height = (f64::from(image.height()) * fy).round().max(0.0) as u32;
    if (width, height) == (image.width(), image.height()) {
        return image.clone();
    }
    if width == 0 || height == 0 {
        return empty_like(image, width, height);
    }
    image.resize_exact(width, height, interpolation.to_image_filter())
}

fn empty_like(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    match image.color() {
        ColorType::L8 => DynamicImage::new_luma8(width, height),
        ColorType::La8 => DynamicImage::new_luma_a8(width, height),
        ColorType::Rgb8 => DynamicImage::new_rgb8(width, height),
        _ => DynamicImage::new_rgba8(width, height),
    }
}

/// `resize`: scale the working image by `fx`, `fy`.
pub(super) fn resize_stage(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let fx = params.f64("fx", 1.0)?;
    let fy = params.f64("fy", 1.0)?;
    if !(fx > 0.0 && fx.is_finite()) {
        return Err(StageError::invalid(format!("expected 0 < fx, got {fx}")));
    }
    if !(fy > 0.0 && fy.is_finite()) {
        return Err(StageError::invalid(format!("expected 0 < fy, got {fy}")));
    }
    let interpolation = params.choice("interpolation", Interpolation::Area, &INTERPOLATIONS)?;
    require_image(state)?;
    let current = state.dimensions();
    check_area(
        (f64::from(current.width) * fx).round(),
        (f64::from(current.height) * fy).round(),
    )?;

    let resized = resize(state.image(), fx, fy, interpolation);
    report.insert("interpolation", interpolation.to_string());
    state.set_image(resized);
    Ok(())
}

/// Rotation by `angle` degrees and uniform `scale` about (`cx`, `cy`),
/// followed by a shift of (`dx`, `dy`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    /// Uniform scale factor.
    pub scale: f32,
    /// Counter-clockwise rotation in degrees.
    pub angle: f32,
    /// Rotation centre, x.
    pub cx: f32,
    /// Rotation centre, y.
    pub cy: f32,
    /// Horizontal shift applied after rotation.
    pub dx: f32,
    /// Vertical shift applied after rotation.
    pub dy: f32,
}

impl Affine {
    /// Projection mapping source coordinates to output coordinates.
    #[must_use]
    pub fn projection(&self) -> Projection {
        // Image y points down, so a counter-clockwise turn is a negative
        // rotation in pixel coordinates.
        Projection::translate(self.cx + self.dx, self.cy + self.dy)
            * Projection::rotate(-self.angle.to_radians())
            * Projection::scale(self.scale, self.scale)
            * Projection::translate(-self.cx, -self.cy)
    }
}

/// Warp `image` into a `width` x `height` canvas, filling uncovered
/// pixels with `border`.
#[must_use = "returns the warped image"]
pub fn warp_affine(
    image: &DynamicImage,
    affine: &Affine,
    width: u32,
    height: u32,
    border: Rgba<u8>,
) -> DynamicImage {
    let source = image.to_rgba8();
    let mut out = image::RgbaImage::from_pixel(width, height, border);
    warp_into(&source, &affine.projection(), Warp::Bilinear, border, &mut out);
    restore_layout(image.color(), out)
}

/// `warpAffine`: rotate, scale and shift the working image.
#[allow(clippy::cast_precision_loss)]
pub(super) fn warp_affine_stage(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    require_image(state)?;
    let current = state.dimensions();
    let scale = params.f32("scale", 1.0)?;
    if !(scale > 0.0 && scale.is_finite()) {
        return Err(StageError::invalid(format!("expected 0 < scale, got {scale}")));
    }
    let affine = Affine {
        scale,
        angle: params.f32("angle", 0.0)?,
        cx: params.f32("cx", current.width as f32 / 2.0)?,
        cy: params.f32("cy", current.height as f32 / 2.0)?,
        dx: params.f32("dx", 0.0)?,
        dy: params.f32("dy", 0.0)?,
    };
    let width = super::positive_u32(params, "width", current.width)?;
    let height = super::positive_u32(params, "height", current.height)?;
    check_area(width, height)?;
    let border_mode = params.string("borderMode", "BORDER_CONSTANT")?;
    if border_mode != "BORDER_CONSTANT" {
        return Err(StageError::invalid(format!(
            "unsupported borderMode '{border_mode}', only BORDER_CONSTANT is available"
        )));
    }
    let [r, g, b, _] = params.scalar("borderValue", [0.0; 4])?.map(saturate);

    let warped = warp_affine(state.image(), &affine, width, height, Rgba([r, g, b, 255]));
    state.set_image(warped);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};
    use serde_json::json;

    use super::*;
    use crate::handlers::testing::{apply, state_with};

    fn gray(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([128])))
    }

    // --- resize tests ---

    #[test]
    fn resize_rounds_target_size() {
        let out = resize(&gray(10, 10), 0.25, 1.5, Interpolation::Linear);
        assert_eq!((out.width(), out.height()), (3, 15));
        assert_eq!(out.color(), ColorType::L8);
    }

    #[test]
    fn resize_to_zero_rows_is_empty_image() {
        let out = resize(&gray(10, 10), 1.0, 0.01, Interpolation::Area);
        assert_eq!((out.width(), out.height()), (10, 0));
    }

    #[test]
    fn identity_scale_returns_same_pixels() {
        let image = gray(4, 4);
        assert_eq!(resize(&image, 1.0, 1.0, Interpolation::Cubic), image);
    }

    #[test]
    fn resize_stage_reports_interpolation() {
        let mut state = state_with(gray(8, 8));
        let report = apply(
            resize_stage,
            &json!({"fx": 0.5, "fy": 0.5, "interpolation": "INTER_NEAREST"}),
            &mut state,
        )
        .unwrap();
        assert_eq!(state.dimensions().width, 4);
        assert_eq!(report.get("interpolation"), Some(&json!("INTER_NEAREST")));
    }

    #[test]
    fn resize_stage_rejects_non_positive_factors() {
        let mut state = state_with(gray(8, 8));
        assert!(apply(resize_stage, &json!({"fx": 0}), &mut state).is_err());
        assert!(apply(resize_stage, &json!({"fy": -1.0}), &mut state).is_err());
        assert!(apply(resize_stage, &json!({"interpolation": "INTER_MAGIC"}), &mut state).is_err());
    }

    #[test]
    fn resize_stage_refuses_huge_targets() {
        let mut state = state_with(gray(8, 8));
        let err = apply(resize_stage, &json!({"fx": 1e12}), &mut state).unwrap_err();
        assert!(matches!(err, StageError::Invalid(_)));
        assert_eq!(state.dimensions().width, 8);
    }

    // --- warpAffine tests ---

    #[test]
    fn identity_warp_preserves_pixels() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(6, 4, |x, y| {
            Luma([u8::try_from(x * 10 + y).unwrap()])
        }));
        let affine = Affine {
            scale: 1.0,
            angle: 0.0,
            cx: 3.0,
            cy: 2.0,
            dx: 0.0,
            dy: 0.0,
        };
        let out = warp_affine(&image, &affine, 6, 4, Rgba([0, 0, 0, 255]));
        assert_eq!(out.color(), ColorType::L8);
        assert_eq!(out.to_luma8().get_pixel(2, 1).0[0], 21);
    }

    #[test]
    fn shift_exposes_border_value() {
        let mut state = state_with(gray(8, 8));
        apply(
            warp_affine_stage,
            &json!({"dx": 4, "borderValue": [255, 255, 255]}),
            &mut state,
        )
        .unwrap();
        let out = state.image().to_luma8();
        assert_eq!(out.get_pixel(0, 4).0[0], 255);
        assert_eq!(out.get_pixel(7, 4).0[0], 128);
    }

    #[test]
    fn warp_stage_sets_canvas_size() {
        let mut state = state_with(gray(8, 8));
        apply(warp_affine_stage, &json!({"width": 12, "height": 5, "angle": 30}), &mut state)
            .unwrap();
        assert_eq!((state.dimensions().width, state.dimensions().height), (12, 5));
    }

    #[test]
    fn warp_stage_validates() {
        let mut state = state_with(gray(8, 8));
        assert!(apply(warp_affine_stage, &json!({"scale": 0}), &mut state).is_err());
        assert!(
            apply(warp_affine_stage, &json!({"borderMode": "BORDER_REPLICATE"}), &mut state)
                .is_err()
        );
        assert!(
            apply(warp_affine_stage, &json!({"width": 100_000, "height": 100_000}), &mut state)
                .is_err()
        );
    }
}
