//! Operations that touch files or the console.
//!
//! The pipeline library never does I/O; these handlers are registered on
//! top of the built-in set when running from the command line.

use std::io::Write;
use std::sync::Arc;

use image::{ImageBuffer, Pixel};
use sightline_pipeline::types::describe;
use sightline_pipeline::{DynamicImage, ExecutionState, Params, Registry, StageError, StageReport};

/// Built-in operations plus `imread`, `imwrite` and `cout`.
pub fn registry() -> Arc<Registry> {
    let mut registry = Registry::with_builtins();
    registry.register("imread", imread);
    registry.register("imwrite", imwrite);
    registry.register("cout", cout);
    Arc::new(registry)
}

fn required_path(params: &Params<'_>, op: &str) -> Result<String, StageError> {
    params
        .optional_string("path")?
        .filter(|path| !path.is_empty())
        .ok_or_else(|| StageError::invalid(format!("expected path for {op}")))
}

/// `imread`: replace the working image with a colour image loaded from
/// `path`.
fn imread(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let path = required_path(params, "imread")?;
    let loaded = image::open(&path)?;
    let image = DynamicImage::ImageRgb8(loaded.to_rgb8());
    tracing::debug!(path = %path, width = image.width(), height = image.height(), "imread");
    report.insert("rows", image.height());
    report.insert("cols", image.width());
    state.set_image(image);
    Ok(())
}

/// `imwrite`: save the working image to `path`, format chosen by
/// extension.
fn imwrite(
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let path = required_path(params, "imwrite")?;
    let dimensions = state.dimensions();
    if dimensions.is_degenerate() {
        return Err(StageError::invalid(format!(
            "expected a working image, found {dimensions}"
        )));
    }
    state.image().save(&path)?;
    tracing::debug!(path = %path, size = %dimensions, "imwrite");
    report.insert("result", true);
    Ok(())
}

fn sample<P: Pixel>(
    buffer: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: u32,
    y: u32,
    channel: usize,
) -> Option<P::Subpixel> {
    buffer.get_pixel(x, y).channels().get(channel).copied()
}

/// One sample as text; floats keep `precision` decimals.
fn sample_text(image: &DynamicImage, x: u32, y: u32, channel: usize, precision: usize) -> String {
    let text = match image {
        DynamicImage::ImageLuma8(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageLumaA8(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageRgb8(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageRgba8(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageLuma16(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageLumaA16(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageRgb16(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageRgba16(b) => sample(b, x, y, channel).map(|v| v.to_string()),
        DynamicImage::ImageRgb32F(b) => sample(b, x, y, channel).map(|v| format!("{v:.precision$}")),
        DynamicImage::ImageRgba32F(b) => {
            sample(b, x, y, channel).map(|v| format!("{v:.precision$}"))
        }
        _ => None,
    };
    text.unwrap_or_else(|| "UNSUPPORTED-CONVERSION".to_owned())
}

fn non_negative(params: &Params<'_>, key: &str, default: i64) -> Result<usize, StageError> {
    let value = params.i64(key, default)?;
    usize::try_from(value)
        .map_err(|_| StageError::invalid(format!("expected 0 <= {key}, got {value}")))
}

/// Render the window of `image` selected by `row`, `col`, `rows` and
/// `cols` as a header line plus one line of `channel` samples per row.
fn sample_table(params: &Params<'_>, image: &DynamicImage) -> Result<String, StageError> {
    let row = params.i64("row", 0)?;
    let col = params.i64("col", 0)?;
    let rows = params.i64("rows", i64::from(image.height()))?;
    let cols = params.i64("cols", i64::from(image.width()))?;
    if row < 0 || col < 0 || rows <= 0 || cols <= 0 {
        return Err(StageError::invalid(format!(
            "expected 0 <= row, 0 <= col, 0 < rows and 0 < cols, got row {row}, col {col}, rows {rows}, cols {cols}"
        )));
    }
    let precision = non_negative(params, "precision", 1)?;
    let width = non_negative(params, "width", 5)?;
    let channel = non_negative(params, "channel", 0)?;
    let channels = usize::from(image.color().channel_count());
    if channel >= channels {
        return Err(StageError::invalid(format!(
            "expected channel < {channels}, got {channel}"
        )));
    }
    let comment = params.string("comment", "")?;

    let end_row = row.saturating_add(rows).min(i64::from(image.height()));
    let end_col = col.saturating_add(cols).min(i64::from(image.width()));
    let ys = u32::try_from(row).unwrap_or(u32::MAX)..u32::try_from(end_row).unwrap_or(0);
    let xs = u32::try_from(col).unwrap_or(u32::MAX)..u32::try_from(end_col).unwrap_or(0);

    let mut table = format!(
        "{} show:[{row}-{},{col}-{}]",
        describe(image),
        end_row - 1,
        end_col - 1
    );
    if !comment.is_empty() {
        table.push(' ');
        table.push_str(&comment);
    }
    table.push('\n');
    for y in ys {
        for x in xs.clone() {
            let text = sample_text(image, x, y, channel, precision);
            table.push_str(&format!("{text:>width$} "));
        }
        table.push('\n');
    }
    Ok(table)
}

/// `cout`: print a window of one channel of the working image.
///
/// Standard output carries the run report, so the table goes to standard
/// error.
fn cout(
    params: &Params<'_>,
    _report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), StageError> {
    let table = sample_table(params, state.image())?;
    std::io::stderr()
        .lock()
        .write_all(table.as_bytes())
        .map_err(|e| StageError::fault(format!("cannot write to stderr: {e}")))
}
