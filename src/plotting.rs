use plotters::prelude::*;
use std::path::Path;
use textplots::{Chart, Plot, Shape};

use crate::error::SweepError;
use crate::sweep::SweepResult;

/// Determine the best scale and unit for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1e6 {
        (1e-6, "M")
    } else if max_value >= 1e3 {
        (1e-3, "k")
    } else if max_value >= 1.0 || max_value == 0.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else {
        (1e6, "μ")
    }
}

/// Curve of one trigger level with missing points left out
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSeries {
    pub label: String,
    /// (current in µA, signal or mean rate)
    pub signal: Vec<(f64, f64)>,
    /// (current in µA, dark rate); empty for DCR
    pub dark: Vec<(f64, f64)>,
}

/// One series per trigger level
pub fn curve_series(result: &SweepResult) -> Vec<CurveSeries> {
    result
        .config
        .trigger_levels
        .iter()
        .enumerate()
        .map(|(j, level)| {
            let mut series = CurveSeries {
                label: format!("TL {}: {}", j + 1, level),
                signal: Vec::new(),
                dark: Vec::new(),
            };
            for point in &result.points {
                let Some(Some(reading)) = point.readings.get(j) else {
                    continue;
                };
                let value = reading.value();
                if value.is_finite() {
                    series.signal.push((point.current_ua, value));
                }
                if let Some(dark) = reading.dark().filter(|d| d.is_finite()) {
                    series.dark.push((point.current_ua, dark));
                }
            }
            series
        })
        .collect()
}

fn bounds<'a>(points: impl Iterator<Item = &'a (f64, f64)>) -> Option<((f64, f64), (f64, f64))> {
    points.fold(None, |acc, &(x, y)| match acc {
        None => Some(((x, x), (y, y))),
        Some(((x0, x1), (y0, y1))) => Some(((x0.min(x), x1.max(x)), (y0.min(y), y1.max(y)))),
    })
}

/// Widen a degenerate range so it can be drawn
fn padded(range: (f64, f64)) -> (f64, f64) {
    let span = range.1 - range.0;
    if span.abs() < f64::EPSILON {
        let pad = if range.0 == 0.0 { 1.0 } else { range.0.abs() * 0.1 };
        (range.0 - pad, range.1 + pad)
    } else {
        (range.0 - span * 0.05, range.1 + span * 0.05)
    }
}

/// Draw the curve measured so far in the terminal
///
/// # Examples
/// ```no_run
/// # fn demo(result: &pcr_sweep::SweepResult) {
/// use pcr_sweep::plotting::plot_curve;
///
/// plot_curve(result, Some(120), Some(40)).unwrap();
/// # }
/// ```
pub fn plot_curve(
    result: &SweepResult,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let series = curve_series(result);
    let Some(((x_min, x_max), (_, y_max))) = bounds(series.iter().flat_map(|s| s.signal.iter())) else {
        return Err("Nothing measured yet".into());
    };

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);
    let (value_scale, value_unit) = determine_scale(y_max.abs());

    let frames: Vec<Vec<(f32, f32)>> = series
        .iter()
        .map(|s| {
            s.signal
                .iter()
                .map(|&(x, y)| (x as f32, (y * value_scale) as f32))
                .collect()
        })
        .collect();

    println!("{} Curve", result.config.mode.name().to_uppercase());
    println!("X-axis: Bias Current (uA) | Y-axis: {}counts/s", value_unit);
    println!("{}", "─".repeat(width));

    let (x_lo, x_hi) = padded((x_min, x_max));
    for (s, frame) in series.iter().zip(&frames) {
        if frame.is_empty() {
            continue;
        }
        println!("{} ({} points)", s.label, frame.len());
        Chart::new(width as u32, height as u32, x_lo as f32, x_hi as f32)
            .lineplot(&Shape::Lines(frame))
            .nice();
    }

    println!("Bias Current →");

    Ok(())
}

const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

fn plot_error<E: std::fmt::Display>(e: E) -> SweepError {
    SweepError::Plot(e.to_string())
}

/// Save the final curve as a PNG.
///
/// One colour per trigger level: signal drawn solid with markers, dark
/// counts in a paler shade of the same colour.
///
/// plotters is built without a font backend, so the image carries no
/// title, axis labels or legend. The x axis is the bias current in µA and
/// the y axis the count rate; series follow the trigger-level order of
/// [`curve_series`].
pub fn save_curve_png(result: &SweepResult, path: &Path) -> Result<(), SweepError> {
    let series = curve_series(result);
    let all_points = series.iter().flat_map(|s| s.signal.iter().chain(s.dark.iter()));
    let ((x_min, x_max), (y_min, y_max)) = bounds(all_points).unwrap_or(((0.0, 1.0), (0.0, 1.0)));
    let (x_lo, x_hi) = padded((x_min, x_max));
    let (y_lo, y_hi) = padded((y_min, y_max));

    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(plot_error)?;

    chart
        .draw_series(std::iter::once(Rectangle::new(
            [(x_lo, y_lo), (x_hi, y_hi)],
            BLACK.stroke_width(1),
        )))
        .map_err(plot_error)?;

    for (j, s) in series.iter().enumerate() {
        let color = PALETTE[j % PALETTE.len()];
        let pale = color.mix(0.45);

        chart
            .draw_series(LineSeries::new(s.signal.iter().copied(), color.stroke_width(2)))
            .map_err(plot_error)?;
        chart
            .draw_series(
                s.signal
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 4, color.filled())),
            )
            .map_err(plot_error)?;

        if !s.dark.is_empty() {
            chart
                .draw_series(LineSeries::new(s.dark.iter().copied(), pale.stroke_width(2)))
                .map_err(plot_error)?;
        }
    }

    root.present().map_err(plot_error)?;
    Ok(())
}
