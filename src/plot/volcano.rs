//! Volcano plot: log2 fold change against -log10(padj)

use plotters::prelude::*;

use super::{encode_png, render_error, rgb_buffer};
use crate::config::PlotParams;
use crate::error::Result;
use crate::filter::FilteredResult;
use crate::testing::{ResultRow, StatResult};

/// Added before taking logs so padj = 0 stays finite
const PADJ_OFFSET: f64 = 1e-200;
const POINT_RADIUS: i32 = 3;
const BACKGROUND_POINT: RGBColor = RGBColor(128, 128, 128);
const HIGHLIGHT: RGBColor = RGBColor(214, 39, 40);

/// -log10(padj + 1e-200)
pub fn neg_log10_padj(padj: f64) -> f64 {
    -(padj + PADJ_OFFSET).log10()
}

fn point(row: &ResultRow) -> Option<(f64, f64)> {
    let y = neg_log10_padj(row.padj);
    (row.log2_fold_change.is_finite() && y.is_finite()).then_some((row.log2_fold_change, y))
}

/// Render the volcano plot
///
/// Every finite result is a grey semi-transparent point; filtered features are drawn
/// again in red. A dashed line marks -log10(alpha + 1e-200). Without finite results
/// only the axes and the threshold line are drawn.
pub fn render_volcano(all: &StatResult, filtered: &FilteredResult, alpha: f64, params: &PlotParams) -> Result<Vec<u8>> {
    let (width, height) = (params.volcano_width, params.volcano_height);
    let background: Vec<(f64, f64)> = all.rows.iter().filter_map(point).collect();
    let highlighted: Vec<(f64, f64)> = filtered.rows.iter().filter_map(point).collect();
    let threshold = neg_log10_padj(alpha);

    let x_limit = background
        .iter()
        .map(|p| p.0.abs())
        .fold(1.0_f64, f64::max)
        * 1.05;
    let y_limit = background
        .iter()
        .map(|p| p.1)
        .fold(threshold.max(1.0), f64::max)
        * 1.05;

    let mut buffer = rgb_buffer(width, height)?;
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Volcano Plot", ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(-x_limit..x_limit, 0.0..y_limit)
            .map_err(render_error)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("Log2 Fold Change")
            .y_desc("-log10(padj)")
            .axis_desc_style(("sans-serif", 16))
            .draw()
            .map_err(render_error)?;

        chart
            .draw_series(
                background
                    .iter()
                    .map(|&p| Circle::new(p, POINT_RADIUS, BACKGROUND_POINT.mix(0.5).filled())),
            )
            .map_err(render_error)?;
        chart
            .draw_series(highlighted.iter().map(|&p| Circle::new(p, POINT_RADIUS, HIGHLIGHT.filled())))
            .map_err(render_error)?;
        chart
            .draw_series(DashedLineSeries::new(
                vec![(-x_limit, threshold), (x_limit, threshold)],
                6,
                4,
                BLACK.stroke_width(1),
            ))
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
    }

    log::debug!(
        "Volcano: {} points, {} highlighted, threshold {:.3}",
        background.len(),
        highlighted.len(),
        threshold
    );
    encode_png(width, height, buffer)
}
