//! Measurements that leave the working image untouched and write their
//! results into the stage report.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde_json::{Value, json};

use super::require_image;
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::ExecutionState;

/// `calcHist`: intensity histogram of the gray working image.
///
/// Writes `hist`, an array of `bins` counts over `[rangeMin, rangeMax)`,
/// and `locations`: for a positive `locations`, one array per bin holding
/// the `[x, y]` positions of up to that many of its pixels in row-major
/// order; otherwise an empty array.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(super) fn calc_hist(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let range_min = params.f64("rangeMin", 0.0)?;
    let range_max = params.f64("rangeMax", 256.0)?;
    if range_min > range_max {
        return Err(StageError::invalid(format!(
            "expected rangeMin <= rangeMax, got {range_min} > {range_max}"
        )));
    }
    let locations = params.i64("locations", 0)?;
    let Ok(locations) = usize::try_from(locations) else {
        return Err(StageError::invalid(format!("expected 0 <= locations, got {locations}")));
    };
    let bins = params.i64("bins", (range_max - range_min) as i64)?;
    if !(2..=256).contains(&bins) {
        return Err(StageError::invalid(format!("expected 2 <= bins <= 256, got {bins}")));
    }
    require_image(state)?;

    let bins = bins as usize;
    let mut hist = vec![0_u64; bins];
    let mut positions: Vec<Vec<Value>> = vec![Vec::new(); if locations > 0 { bins } else { 0 }];
    let span = range_max - range_min;
    for (x, y, pixel) in state.image().to_luma8().enumerate_pixels() {
        let v = f64::from(pixel.0[0]);
        if v >= range_min && v < range_max {
            let bin = (((v - range_min) * bins as f64 / span) as usize).min(bins - 1);
            hist[bin] += 1;
            if let Some(found) = positions.get_mut(bin).filter(|found| found.len() < locations) {
                found.push(json!([x, y]));
            }
        }
    }
    report.insert("hist", hist);
    report.insert("locations", positions);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    /// Mean squared horizontal gradient.
    Gras,
    /// Mean squared Laplacian.
    Lape,
}

const FOCUS_MEASURES: [(&str, Focus); 2] = [("GRAS", Focus::Gras), ("LAPE", Focus::Lape)];

/// Mean of squared differences between horizontal neighbours.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gras(image: &GrayImage) -> f64 {
    let (w, h) = image.dimensions();
    if w < 2 || h == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    for y in 0..h {
        for x in 1..w {
            let d = f64::from(image.get_pixel(x, y).0[0]) - f64::from(image.get_pixel(x - 1, y).0[0]);
            sum += d * d;
        }
    }
    sum / (f64::from(w - 1) * f64::from(h))
}

/// Mean of the squared Laplacian response.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lape(image: &GrayImage) -> f64 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let laplacian = imageproc::filter::laplacian_filter(image);
    let sum: f64 = laplacian
        .pixels()
        .map(|p| {
            let v = f64::from(p.0[0]);
            v * v
        })
        .sum();
    sum / (f64::from(w) * f64::from(h))
}

/// `sharpness`: focus measure of the gray working image.
pub(super) fn sharpness(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let method = params.choice("method", Focus::Gras, &FOCUS_MEASURES)?;
    require_image(state)?;

    let gray = state.image().to_luma8();
    let value = match method {
        Focus::Gras => gras(&gray),
        Focus::Lape => lape(&gray),
    };
    report.insert("sharpness", value);
    Ok(())
}

/// A connected region found by the blob detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    /// Centroid, x.
    pub x: f64,
    /// Centroid, y.
    pub y: f64,
    /// Pixel count.
    pub area: u64,
    /// Bounding box left edge.
    pub left: u32,
    /// Bounding box top edge.
    pub top: u32,
    /// Bounding box width.
    pub width: u32,
    /// Bounding box height.
    pub height: u32,
}

impl Blob {
    /// Diameter of a disc with the same area.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn diameter(&self) -> f64 {
        2.0 * (self.area as f64 / std::f64::consts::PI).sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    area: u64,
    sum_x: u64,
    sum_y: u64,
    min: (u32, u32),
    max: (u32, u32),
}

/// Find 8-connected regions of pixels darker than `threshold` (when
/// `dark` is set) or at least `threshold` otherwise.
///
/// Blobs are returned in label order, top-left first.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_blobs(image: &GrayImage, threshold: u8, dark: bool) -> Vec<Blob> {
    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        let foreground = if dark { v < threshold } else { v >= threshold };
        Luma([if foreground { 255 } else { 0 }])
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0_u8]));

    let mut regions: Vec<Option<Accumulator>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let Ok(index) = usize::try_from(label.0[0]) else {
            continue;
        };
        if index == 0 {
            continue;
        }
        if regions.len() < index {
            regions.resize(index, None);
        }
        let slot = &mut regions[index - 1];
        let acc = slot.get_or_insert(Accumulator {
            area: 0,
            sum_x: 0,
            sum_y: 0,
            min: (x, y),
            max: (x, y),
        });
        acc.area += 1;
        acc.sum_x += u64::from(x);
        acc.sum_y += u64::from(y);
        acc.min = (acc.min.0.min(x), acc.min.1.min(y));
        acc.max = (acc.max.0.max(x), acc.max.1.max(y));
    }

    regions
        .into_iter()
        .flatten()
        .map(|acc| Blob {
            x: acc.sum_x as f64 / acc.area as f64,
            y: acc.sum_y as f64 / acc.area as f64,
            area: acc.area,
            left: acc.min.0,
            top: acc.min.1,
            width: acc.max.0 - acc.min.0 + 1,
            height: acc.max.1 - acc.min.1 + 1,
        })
        .collect()
}

/// `SimpleBlobDetector`: threshold, label connected regions, and report
/// them as `keypoints` (centroid and equivalent diameter) and `rects`
/// (bounding boxes, centred).
#[allow(clippy::cast_precision_loss)]
pub(super) fn blob_detector(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let threshold = params.i64("threshold", 128)?;
    let threshold = u8::try_from(threshold)
        .map_err(|_| StageError::invalid(format!("expected 0 <= threshold <= 255, got {threshold}")))?;
    let blob_color = params.i64("blobColor", 0)?;
    let dark = match blob_color {
        0 => true,
        255 => false,
        other => {
            return Err(StageError::invalid(format!(
                "expected blobColor 0 or 255, got {other}"
            )));
        }
    };
    let filter_by_area = params.bool("filterByArea", true)?;
    let min_area = params.f64("minArea", 25.0)?;
    let max_area = params.f64("maxArea", 5000.0)?;
    if filter_by_area && min_area > max_area {
        return Err(StageError::invalid(format!(
            "expected minArea <= maxArea, got {min_area} > {max_area}"
        )));
    }
    require_image(state)?;

    let blobs: Vec<Blob> = detect_blobs(&state.image().to_luma8(), threshold, dark)
        .into_iter()
        .filter(|blob| {
            let area = blob.area as f64;
            !filter_by_area || (min_area..=max_area).contains(&area)
        })
        .collect();

    let keypoints: Vec<Value> = blobs
        .iter()
        .map(|blob| json!({"pt.x": blob.x, "pt.y": blob.y, "size": blob.diameter()}))
        .collect();
    let rects: Vec<Value> = blobs
        .iter()
        .map(|blob| {
            json!({
                "x": f64::from(blob.left) + f64::from(blob.width) / 2.0,
                "y": f64::from(blob.top) + f64::from(blob.height) / 2.0,
                "width": blob.width,
                "height": blob.height,
                "angle": 0.0,
            })
        })
        .collect();
    report.insert("keypoints", keypoints);
    report.insert("rects", rects);
    Ok(())
}
