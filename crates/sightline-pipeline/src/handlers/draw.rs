//! Annotation: rectangles, circles, and shapes taken from an earlier
//! stage's report.

use image::{ColorType, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;
use serde_json::Value;

use super::{check_area, opaque, require_image, restore_layout};
use crate::params::Params;
use crate::registry::StageError;
use crate::report::StageReport;
use crate::state::{ExecutionState, Variables};

/// Fill the `width` x `height` box at (`x`, `y`), clipped to the canvas.
fn fill(canvas: &mut RgbaImage, x: i64, y: i64, width: i64, height: i64, color: Rgba<u8>) {
    if width <= 0 || height <= 0 {
        return;
    }
    let (Ok(x), Ok(y), Ok(width), Ok(height)) = (
        i32::try_from(x),
        i32::try_from(y),
        u32::try_from(width),
        u32::try_from(height),
    ) else {
        return;
    };
    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(width, height), color);
}

/// Box outline `thickness` pixels wide, centred on the box edges.
fn outline(canvas: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, thickness: i64, color: Rgba<u8>) {
    let outer = thickness / 2;
    let inner = thickness - outer;
    let (left, top) = (x - outer, y - outer);
    let (span_w, span_h) = (w + 2 * outer, h + 2 * outer);
    fill(canvas, left, top, span_w, thickness, color);
    fill(canvas, left, y + h - inner, span_w, thickness, color);
    fill(canvas, left, top, thickness, span_h, color);
    fill(canvas, x + w - inner, top, thickness, span_h, color);
}

/// Circle outline `thickness` pixels wide.
#[allow(clippy::cast_possible_truncation)]
fn ring(canvas: &mut RgbaImage, center: (f64, f64), radius: f64, thickness: i64, color: Rgba<u8>) {
    let cx = center.0.round() as i32;
    let cy = center.1.round() as i32;
    let radius = radius.round() as i32;
    let thickness = i32::try_from(thickness.max(1)).unwrap_or(1);
    for step in 0..thickness {
        let r = radius - thickness / 2 + step;
        if r >= 0 {
            draw_hollow_circle_mut(canvas, (cx, cy), r, color);
        }
    }
}

/// Filled circle.
#[allow(clippy::cast_possible_truncation)]
fn disc(canvas: &mut RgbaImage, center: (f64, f64), radius: f64, color: Rgba<u8>) {
    let radius = radius.round() as i32;
    if radius >= 0 {
        draw_filled_circle_mut(canvas, (center.0.round() as i32, center.1.round() as i32), radius, color);
    }
}

/// Line segment `thickness` pixels wide.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn segment(canvas: &mut RgbaImage, from: (f32, f32), to: (f32, f32), thickness: i64, color: Rgba<u8>) {
    let thickness = thickness.max(1);
    for step in 0..thickness {
        let offset = (step - thickness / 2) as f32;
        draw_line_segment_mut(canvas, (from.0 + offset, from.1), (to.0 + offset, to.1), color);
        draw_line_segment_mut(canvas, (from.0, from.1 + offset), (to.0, to.1 + offset), color);
    }
}

/// Corners of a `width` x `height` box centred on (`cx`, `cy`) and turned
/// clockwise by `angle` degrees.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn rotated_corners(cx: f64, cy: f64, width: f64, height: f64, angle: f64) -> [(f32, f32); 4] {
    let (sin, cos) = angle.to_radians().sin_cos();
    let (a, b) = (sin * 0.5, cos * 0.5);
    let p0 = (cx - a * height - b * width, cy + b * height - a * width);
    let p1 = (cx + a * height - b * width, cy - b * height - a * width);
    let p2 = (2.0 * cx - p0.0, 2.0 * cy - p0.1);
    let p3 = (2.0 * cx - p1.0, 2.0 * cy - p1.1);
    [p0, p1, p2, p3].map(|(x, y)| (x as f32, y as f32))
}

/// Colour for the `index`-th shape when none was given: alternates
/// between orange-red and blue-green so neighbours stay distinct.
#[must_use]
pub const fn palette(index: usize) -> Rgba<u8> {
    let odd = index & 1 != 0;
    let green = if index & 2 != 0 { 128 } else { 192 };
    if odd {
        Rgba([0, green, 255, 255])
    } else {
        Rgba([255, green, 0, 255])
    }
}

fn palette_scalar(index: usize) -> [f64; 4] {
    palette(index).0.map(f64::from)
}

/// Drawing colour, or `None` when every colour component is negative.
///
/// An omitted alpha component reads as 255.
fn color_param(params: &Params<'_>) -> Result<Option<[f64; 4]>, StageError> {
    let color = params.scalar("color", [-1.0, -1.0, -1.0, 255.0])?;
    Ok(if color[..3].iter().all(|&c| c < 0.0) {
        None
    } else {
        Some(color)
    })
}

/// Layout for annotated output: gray becomes colour, alpha survives.
fn annotated_layout(color: ColorType) -> ColorType {
    if color.has_alpha() {
        ColorType::Rgba8
    } else {
        ColorType::Rgb8
    }
}

/// `rectangle`: outline a box, optionally filling its inside (`fill`) and
/// everything outside it (`flood`).
///
/// On an empty working image a black `width` x `height` canvas is created
/// first. A negative `thickness` fills the box with `color`.
pub(super) fn rectangle(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let current = state.dimensions();
    let x = params.i64("x", 0)?;
    let y = params.i64("y", 0)?;
    if x < 0 || y < 0 {
        return Err(StageError::invalid(format!("expected 0 <= x and 0 <= y, got ({x}, {y})")));
    }
    let width = params.i64("width", i64::from(current.width))?;
    let height = params.i64("height", i64::from(current.height))?;
    let thickness = params.i64("thickness", 1)?;
    let color = opaque(params.scalar("color", [0.0; 4])?);
    let inside = params.scalar("fill", [-1.0; 4])?;
    let outside = params.scalar("flood", [-1.0; 4])?;

    let (mut canvas, layout) = if current.is_degenerate() {
        let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
            return Err(StageError::invalid(format!(
                "expected a non-negative canvas size, got {width}x{height}"
            )));
        };
        check_area(w, h)?;
        (RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255])), ColorType::Rgb8)
    } else {
        (state.image().to_rgba8(), state.image().color())
    };

    if thickness < 0 {
        fill(&mut canvas, x, y, width, height, color);
    } else {
        if thickness > 0 {
            outline(&mut canvas, x, y, width, height, thickness, color);
        }
        let outer = thickness / 2;
        let inner = thickness - outer;
        if inside[0] >= 0.0 {
            let fill_color = opaque(inside);
            fill(&mut canvas, x + inner, y + inner, width - 2 * inner, height - 2 * inner, fill_color);
        }
        if outside[0] >= 0.0 {
            let flood = opaque(outside);
            let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
            let (left, top) = (x - outer, y - outer);
            let (right, bottom) = (x + width + outer, y + height + outer);
            fill(&mut canvas, 0, 0, cw, top, flood);
            fill(&mut canvas, 0, bottom, cw, ch - bottom, flood);
            fill(&mut canvas, 0, top, left, bottom - top, flood);
            fill(&mut canvas, right, top, cw - right, bottom - top, flood);
        }
    }

    state.set_image(restore_layout(layout, canvas));
    Ok(())
}

/// Point given as `[x, y]` or `{"x": .., "y": ..}`.
fn point(params: &Params<'_>, key: &str) -> Result<(f64, f64), StageError> {
    let (x_key, y_key) = (format!("{key}.x"), format!("{key}.y"));
    if params.contains(&x_key) || params.contains(&y_key) {
        return Ok((params.f64(&x_key, 0.0)?, params.f64(&y_key, 0.0)?));
    }
    let [x, y, ..] = params.scalar(key, [0.0; 4])?;
    Ok((x, y))
}

/// `circle`: outline a circle around `center`, optionally filling its
/// inside with `fill`.
///
/// A negative `thickness` fills the circle with `color`. Coordinates and
/// radius carry `shift` fractional bits.
pub(super) fn circle(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let center = point(params, "center")?;
    let radius = params.i64("radius", 0)?;
    if radius < 0 {
        return Err(StageError::invalid(format!("expected 0 <= radius, got {radius}")));
    }
    let shift = params.i32("shift", 0)?;
    if !(0..=16).contains(&shift) {
        return Err(StageError::invalid(format!("expected 0 <= shift <= 16, got {shift}")));
    }
    let thickness = params.i64("thickness", 1)?;
    let color = opaque(params.scalar("color", [0.0; 4])?);
    let inside = params.scalar("fill", [-1.0; 4])?;
    require_image(state)?;

    let scale = f64::from(1_u32 << shift);
    let center = (center.0 / scale, center.1 / scale);
    #[allow(clippy::cast_precision_loss)]
    let radius = radius as f64 / scale;

    let layout = state.image().color();
    let mut canvas = state.image().to_rgba8();
    if thickness < 0 {
        disc(&mut canvas, center, radius, color);
    } else {
        if thickness > 0 {
            ring(&mut canvas, center, radius, thickness, color);
        }
        if inside[0] >= 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let inner = (thickness - thickness / 2) as f64;
            disc(&mut canvas, center, radius - inner, opaque(inside));
        }
    }
    state.set_image(restore_layout(layout, canvas));
    Ok(())
}

/// Read the array `key` from the report of the earlier stage `model`.
fn model_array(state: &ExecutionState, model: &str, key: &str) -> Result<Vec<Value>, StageError> {
    let report = state
        .stage_report(model)
        .ok_or_else(|| StageError::MissingReference(model.to_owned()))?;
    match report.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(StageError::invalid(format!(
            "stage '{model}' reported no {key} array"
        ))),
    }
}

fn required(params: &Params<'_>, key: &str, what: &str) -> Result<f64, StageError> {
    if !params.contains(key) {
        return Err(StageError::invalid(format!("{what} requires {key}")));
    }
    params.f64(key, 0.0)
}

/// A rect from a report, centred on (`x`, `y`).
struct Marker {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    angle: Option<f64>,
    color: [f64; 4],
}

impl Marker {
    /// Parse one rect. Its own `color` overrides `color`.
    fn parse(item: &Value, variables: &Variables, color: [f64; 4]) -> Result<Self, StageError> {
        let params = Params::new(item, variables);
        let angle = if params.contains("angle") {
            Some(params.f64("angle", 0.0)?)
        } else {
            None
        };
        Ok(Self {
            x: required(&params, "x", "rect")?,
            y: required(&params, "y", "rect")?,
            width: params.f64("width", -1.0)?,
            height: params.f64("height", -1.0)?,
            angle,
            color: params.scalar("color", color)?,
        })
    }

    /// Radius used when the rect is drawn as a circle.
    #[allow(clippy::cast_precision_loss)]
    fn circle_radius(&self, radius: i64) -> f64 {
        if radius > 0 {
            radius as f64
        } else if self.width > 0.0 && self.height > 0.0 {
            self.width.min(self.height) / 2.0
        } else {
            5.0
        }
    }

    /// Draw as a circle, or as a turned box when the rect has an angle and
    /// no `radius` is forced. A zero alpha hides the rect.
    fn draw(&self, canvas: &mut RgbaImage, thickness: i64, radius: i64) {
        if self.color[3] == 0.0 {
            return;
        }
        let color = opaque(self.color);
        match self.angle {
            Some(angle) if radius <= 0 => {
                let corners = rotated_corners(self.x, self.y, self.width, self.height, angle);
                for i in 0..4 {
                    segment(canvas, corners[i], corners[(i + 1) % 4], thickness, color);
                }
            }
            _ => ring(canvas, (self.x, self.y), self.circle_radius(radius), thickness, color),
        }
    }
}

/// `drawRects`: draw the `rects` reported by the stage named in `model`.
///
/// Rects without an `angle` are drawn as circles, as are all rects when
/// `radius` is positive.
pub(super) fn draw_rects(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let color = color_param(params)?;
    let thickness = params.i64("thickness", 2)?;
    let radius = params.i64("radius", 0)?;
    let Some(model) = params.optional_string("model")? else {
        return Err(StageError::invalid("expected model to name a stage with rects"));
    };
    require_image(state)?;

    let markers = model_array(state, &model, "rects")?
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let color = color.unwrap_or_else(|| palette_scalar(index));
            Marker::parse(item, state.variables(), color)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let layout = annotated_layout(state.image().color());
    let mut canvas = state.image().to_rgba8();
    for marker in &markers {
        marker.draw(&mut canvas, thickness, radius);
    }
    state.set_image(restore_layout(layout, canvas));
    Ok(())
}

/// `drawKeypoints`: circle each of the `keypoints` reported by the stage
/// named in `model` (or `keypointStage`), with diameter `size`.
pub(super) fn draw_keypoints(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let color = color_param(params)?.map(opaque);
    let model = match params.optional_string("model")? {
        Some(model) => model,
        None => params
            .optional_string("keypointStage")?
            .ok_or_else(|| StageError::invalid("expected model to name a stage with keypoints"))?,
    };
    require_image(state)?;

    let keypoints = model_array(state, &model, "keypoints")?
        .iter()
        .map(|item| {
            let params = Params::new(item, state.variables());
            Ok((
                required(&params, "pt.x", "keypoint")?,
                required(&params, "pt.y", "keypoint")?,
                params.f64("size", 10.0)?,
            ))
        })
        .collect::<Result<Vec<_>, StageError>>()?;

    let layout = annotated_layout(state.image().color());
    let mut canvas = state.image().to_rgba8();
    for (index, &(x, y, size)) in keypoints.iter().enumerate() {
        ring(&mut canvas, (x, y), size / 2.0, 1, color.unwrap_or_else(|| palette(index)));
    }
    state.set_image(restore_layout(layout, canvas));
    Ok(())
}
