//! Colour-space conversion and intensity transforms.

use image::{DynamicImage, GrayImage, Luma};

use super::{map_samples, require_image, saturate};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    ToGray,
    ToColor,
}

const CONVERSIONS: [(&str, Conversion); 6] = [
    ("CV_BGR2GRAY", Conversion::ToGray),
    ("CV_RGB2GRAY", Conversion::ToGray),
    ("CV_BGRA2GRAY", Conversion::ToGray),
    ("CV_GRAY2BGR", Conversion::ToColor),
    ("CV_GRAY2RGB", Conversion::ToColor),
    ("CV_GRAY2BGRA", Conversion::ToColor),
];

/// `cvtColor`: convert between gray and colour layouts.
///
/// Channel order is always RGB, so the `BGR` and `RGB` codes are
/// interchangeable.
pub(super) fn cvt_color(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let conversion = params.choice("code", Conversion::ToGray, &CONVERSIONS)?;
    let dst_cn = params.i32("dstCn", 0)?;
    if dst_cn < 0 {
        return Err(StageError::invalid(format!("expected 0 <= dstCn, got {dst_cn}")));
    }
    require_image(state)?;

    let converted = match (conversion, dst_cn) {
        (Conversion::ToGray, _) => DynamicImage::ImageLuma8(state.image().to_luma8()),
        (Conversion::ToColor, 4) => DynamicImage::ImageRgba8(state.image().to_rgba8()),
        (Conversion::ToColor, _) => DynamicImage::ImageRgb8(state.image().to_rgb8()),
    };
    state.set_image(converted);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    None,
    Log,
}

const TRANSFORMS: [(&str, Transform); 2] = [("", Transform::None), ("log", Transform::Log)];

/// `convertTo`: saturating `p * alpha + delta` on every sample.
///
/// With `transform: "log"` the natural logarithm of each sample is
/// scaled instead, and zero samples become 0.
pub(super) fn convert_to(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let alpha = params.f64("alpha", 1.0)?;
    let delta = params.f64("delta", 0.0)?;
    let transform = params.choice("transform", Transform::None, &TRANSFORMS)?;
    let r_type = params.string("rType", "CV_8U")?;
    if !matches!(r_type.as_str(), "CV_8U" | "CV_8UC1" | "CV_8UC3" | "CV_8UC4") {
        return Err(StageError::invalid(format!(
            "unsupported rType '{r_type}', only 8-bit types are available"
        )));
    }
    require_image(state)?;

    let converted = map_samples(state.image(), |p| match transform {
        Transform::None => saturate(f64::from(p).mul_add(alpha, delta)),
        Transform::Log if p == 0 => 0,
        Transform::Log => saturate(f64::from(p).ln().mul_add(alpha, delta)),
    });
    state.set_image(converted);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NormType {
    MinMax,
    Inf,
    L1,
    L2,
}

const NORM_TYPES: [(&str, NormType); 4] = [
    ("NORM_MINMAX", NormType::MinMax),
    ("NORM_INF", NormType::Inf),
    ("NORM_L1", NormType::L1),
    ("NORM_L2", NormType::L2),
];

/// Linear map `p * scale + shift` that normalizes `samples`.
///
/// For [`NormType::MinMax`] the output spans `[min(alpha, beta),
/// max(alpha, beta)]`; the other norms scale so the chosen norm equals
/// `alpha`.
fn normalization(samples: &[u8], norm: NormType, alpha: f64, beta: f64) -> (f64, f64) {
    let values = samples.iter().map(|&s| f64::from(s));
    match norm {
        NormType::MinMax => {
            let (lo, hi) = values.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
            let (out_lo, out_hi) = (alpha.min(beta), alpha.max(beta));
            if hi > lo {
                let scale = (out_hi - out_lo) / (hi - lo);
                (scale, scale.mul_add(-lo, out_lo))
            } else {
                (0.0, out_lo)
            }
        }
        NormType::Inf | NormType::L1 | NormType::L2 => {
            let norm = match norm {
                NormType::Inf => values.fold(0.0, f64::max),
                NormType::L1 => values.sum(),
                _ => values.map(|v| v * v).sum::<f64>().sqrt(),
            };
            if norm > 0.0 { (alpha / norm, 0.0) } else { (0.0, 0.0) }
        }
    }
}

/// `normalize`: rescale intensities by a norm.
pub(super) fn normalize(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let alpha = params.f64("alpha", 0.0)?;
    let beta = params.f64("beta", 255.0)?;
    let norm = params.choice("normType", NormType::MinMax, &NORM_TYPES)?;
    require_image(state)?;

    // the same samples map_samples rewrites, alpha included
    let samples = match state.image() {
        image @ (DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_)) => image.as_bytes().to_vec(),
        other => other.to_rgba8().into_raw(),
    };
    let (scale, shift) = normalization(&samples, norm, alpha, beta);
    report.insert("scale", scale);
    report.insert("shift", shift);

    let normalized = map_samples(state.image(), |p| saturate(f64::from(p).mul_add(scale, shift)));
    state.set_image(normalized);
    Ok(())
}

/// `split`: extract channel `fromTo[0]` as a gray image.
pub(super) fn split(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let from_to = params
        .int_array("fromTo")?
        .ok_or_else(|| StageError::invalid("expected fromTo channel pairs"))?;
    if from_to.is_empty() {
        return Err(StageError::invalid("expected fromTo channel pairs"));
    }
    if from_to.len() > 32 {
        return Err(StageError::invalid(format!(
            "too many channels in fromTo: {}",
            from_to.len()
        )));
    }
    require_image(state)?;

    let channels = usize::from(state.image().color().channel_count());
    let source = usize::try_from(from_to[0])
        .ok()
        .filter(|&c| c < channels)
        .ok_or_else(|| {
            StageError::invalid(format!(
                "fromTo[0] = {} is not a channel of a {channels}-channel image",
                from_to[0]
            ))
        })?;

    let rgba = state.image().to_rgba8();
    let gray = if channels <= 2 && source == 1 {
        // gray-alpha: channel 1 is alpha, stored in RGBA slot 3
        GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| Luma([rgba.get_pixel(x, y).0[3]]))
    } else {
        GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            Luma([rgba.get_pixel(x, y).0[source]])
        })
    };
    state.set_image(DynamicImage::ImageLuma8(gray));
    Ok(())
}

/// `equalizeHist`: grayscale histogram equalization.
pub(super) fn equalize_hist(
    _params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    require_image(state)?;
    let gray = state.image().to_luma8();
    state.set_image(DynamicImage::ImageLuma8(
        imageproc::contrast::equalize_histogram(&gray),
    ));
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{ColorType, Rgb, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::handlers::testing::{apply, state_with};

    fn gradient() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(4, 1, |x, _| Luma([50 + 10 * x as u8])))
    }

    fn rgb(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([r, g, b])))
    }

    // --- cvtColor tests ---

    #[test]
    fn cvt_color_default_is_gray() {
        let mut state = state_with(rgb(255, 0, 0));
        apply(cvt_color, &json!({}), &mut state).unwrap();
        assert_eq!(state.image().color(), ColorType::L8);
    }

    #[test]
    fn cvt_color_gray_to_color() {
        let mut state = state_with(gradient());
        apply(cvt_color, &json!({"code": "CV_GRAY2BGR"}), &mut state).unwrap();
        assert_eq!(state.image().color(), ColorType::Rgb8);
        apply(cvt_color, &json!({"code": "CV_GRAY2RGB", "dstCn": 4}), &mut state).unwrap();
        assert_eq!(state.image().color(), ColorType::Rgba8);
    }

    #[test]
    fn cvt_color_validates() {
        let mut state = state_with(gradient());
        assert!(apply(cvt_color, &json!({"dstCn": -1}), &mut state).is_err());
        assert!(apply(cvt_color, &json!({"code": "CV_BGR2HSV"}), &mut state).is_err());
    }

    // --- convertTo tests ---

    #[test]
    fn convert_to_scales_and_saturates() {
        let mut state = state_with(gradient());
        apply(convert_to, &json!({"alpha": 4, "delta": -100}), &mut state).unwrap();
        let out = state.image().to_luma8();
        // 50*4-100 = 100, 80*4-100 = 220, 60*4-100 = 140
        assert_eq!(out.get_pixel(0, 0).0[0], 100);
        assert_eq!(out.get_pixel(1, 0).0[0], 140);
        assert_eq!(out.get_pixel(3, 0).0[0], 220);

        apply(convert_to, &json!({"alpha": 2}), &mut state).unwrap();
        assert_eq!(state.image().to_luma8().get_pixel(3, 0).0[0], 255);
    }

    #[test]
    fn convert_to_log_transform() {
        let mut state = state_with(gradient());
        apply(convert_to, &json!({"transform": "log", "alpha": 50}), &mut state).unwrap();
        let out = state.image().to_luma8();
        // 50 ln 50 = 195.6, 50 ln 60 = 204.7, 50 ln 80 = 219.1
        assert_eq!(out.get_pixel(0, 0).0[0], 196);
        assert_eq!(out.get_pixel(1, 0).0[0], 205);
        assert_eq!(out.get_pixel(3, 0).0[0], 219);

        let mut state = state_with(DynamicImage::new_luma8(2, 2));
        apply(convert_to, &json!({"transform": "log", "alpha": 10, "delta": 40}), &mut state)
            .unwrap();
        assert_eq!(state.image().to_luma8().get_pixel(0, 0).0[0], 0);

        assert!(apply(convert_to, &json!({"transform": "exp"}), &mut state).is_err());
    }

    #[test]
    fn convert_to_rejects_float_types() {
        let mut state = state_with(gradient());
        assert!(apply(convert_to, &json!({"rType": "CV_32F"}), &mut state).is_err());
    }

    // --- normalize tests ---

    #[test]
    fn normalize_min_max_stretches_to_full_range() {
        let mut state = state_with(gradient());
        apply(normalize, &json!({}), &mut state).unwrap();
        let out = state.image().to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(3, 0).0[0], 255);
    }

    #[test]
    fn normalize_min_max_accepts_reversed_bounds() {
        let mut state = state_with(gradient());
        apply(normalize, &json!({"alpha": 200, "beta": 100}), &mut state).unwrap();
        let out = state.image().to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 100);
        assert_eq!(out.get_pixel(3, 0).0[0], 200);
    }

    #[test]
    fn normalize_inf_scales_peak_to_alpha() {
        let mut state = state_with(gradient());
        let report = apply(normalize, &json!({"normType": "NORM_INF", "alpha": 160}), &mut state)
            .unwrap();
        assert_eq!(state.image().to_luma8().get_pixel(3, 0).0[0], 160);
        assert_eq!(report.get("shift"), Some(&json!(0.0)));
    }

    #[test]
    fn normalize_uniform_image_collapses_to_lower_bound() {
        let mut state = state_with(rgb(7, 7, 7));
        apply(normalize, &json!({"alpha": 10, "beta": 20}), &mut state).unwrap();
        assert_eq!(state.image().to_rgb8().get_pixel(0, 0).0, [10, 10, 10]);
    }

    // --- split tests ---

    #[test]
    fn split_extracts_channel() {
        let mut state = state_with(rgb(1, 2, 3));
        apply(split, &json!({"fromTo": [2, 0]}), &mut state).unwrap();
        assert_eq!(state.image().color(), ColorType::L8);
        assert_eq!(state.image().to_luma8().get_pixel(0, 0).0[0], 3);
    }

    #[test]
    fn split_validates_channels() {
        let mut state = state_with(rgb(1, 2, 3));
        assert!(apply(split, &json!({}), &mut state).is_err());
        assert!(apply(split, &json!({"fromTo": []}), &mut state).is_err());
        assert!(apply(split, &json!({"fromTo": [3, 0]}), &mut state).is_err());
        assert!(apply(split, &json!({"fromTo": vec![0; 33]}), &mut state).is_err());
    }

    // --- equalizeHist tests ---

    #[test]
    fn equalize_hist_produces_gray_and_spreads_values() {
        let mut state = state_with(gradient());
        apply(equalize_hist, &json!({}), &mut state).unwrap();
        let out = state.image().to_luma8();
        assert_eq!(state.image().color(), ColorType::L8);
        assert_eq!(out.get_pixel(3, 0).0[0], 255);
        assert!(out.get_pixel(0, 0).0[0] < out.get_pixel(3, 0).0[0]);
    }
}
