//! Clustered heatmap of z-scored log1p normalized counts

use std::collections::HashMap;

use ndarray::ArrayView2;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use super::cluster::{average_linkage, Dendrogram};
use super::colormap::diverging;
use super::{encode_png, render_error, rgb_buffer};
use crate::config::PlotParams;
use crate::error::Result;
use crate::filter::FilteredResult;
use crate::stats::mean_and_variance;

const MARGIN: i32 = 12;
const COLOUR_BAR_WIDTH: i32 = 18;
const COLOUR_BAR_GAP: i32 = 16;
const COLOUR_BAR_LABELS: i32 = 40;
const GREY: RGBColor = RGBColor(128, 128, 128);
const LIGHT_GREY: RGBColor = RGBColor(220, 220, 220);

/// Indices of filtered features to draw, capped to the `cap` smallest padj
///
/// Returned in model order.
pub fn heatmap_features(feature_ids: &[String], filtered: &FilteredResult, cap: usize) -> Vec<usize> {
    let index: HashMap<&str, usize> = feature_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut ranked: Vec<(usize, f64)> = filtered
        .rows
        .iter()
        .filter_map(|row| index.get(row.feature_id.as_str()).map(|&i| (i, row.padj)))
        .collect();
    if ranked.len() > cap {
        log::info!(
            "Heatmap limited to the {} features with the smallest padj (of {})",
            cap,
            ranked.len()
        );
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(cap);
    }

    let mut features: Vec<usize> = ranked.into_iter().map(|(i, _)| i).collect();
    features.sort_unstable();
    features
}

/// Row-wise z-scores with the sample standard deviation; constant rows are 0
pub fn z_scores(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| {
            let (mean, var) = mean_and_variance(row);
            let sd = var.sqrt();
            row.iter()
                .map(|&v| if sd > 0.0 && sd.is_finite() { (v - mean) / sd } else { 0.0 })
                .collect()
        })
        .collect()
}

/// Pixel boundaries splitting `[start, start + length)` into `n` bands
fn bands(start: i32, length: i32, n: usize) -> Vec<i32> {
    (0..=n)
        .map(|k| start + (k as f64 * length as f64 / n as f64).round() as i32)
        .collect()
}

fn label_style(size: u32, h: HPos) -> TextStyle<'static> {
    ("sans-serif", size).into_font().color(&BLACK).pos(Pos::new(h, VPos::Center))
}

fn draw_empty_state<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>) -> Result<()> {
    let (w, h) = area.dim_in_pixel();
    let (w, h) = (w as i32, h as i32);
    let corners = [(MARGIN, MARGIN), (w - MARGIN, h - MARGIN)];
    area.draw(&Rectangle::new(corners, LIGHT_GREY.filled()))
        .map_err(render_error)?;
    area.draw(&Rectangle::new(corners, GREY)).map_err(render_error)?;
    area.draw(&Text::new(
        "No features pass the thresholds",
        (w / 2, h / 2),
        label_style(18, HPos::Center),
    ))
    .map_err(render_error)?;
    Ok(())
}

/// Which side of the heatmap a dendrogram is drawn on
#[derive(Clone, Copy)]
enum Side {
    Left,
    Top,
}

/// Draw a dendrogram whose leaves face the heatmap
///
/// `centres` are the pixel centres of the leaves in drawing order; `base` is the pixel
/// coordinate of the leaf edge and `depth` the extent away from the heatmap.
fn draw_dendrogram<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    tree: &Dendrogram,
    centres: &[f64],
    base: i32,
    depth: i32,
    side: Side,
) -> Result<()> {
    let max_height = tree.max_height();
    if tree.merges.is_empty() || max_height <= 0.0 {
        return Ok(());
    }
    let positions = tree.node_positions();
    let heights = tree.node_heights();

    let along = |node: usize| -> i32 {
        let rank = positions[node];
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        (centres[lo] + frac * (centres[hi] - centres[lo])).round() as i32
    };
    let away = |h: f64| -> i32 { base - (h / max_height * depth as f64).round() as i32 };
    let oriented = |a: i32, d: i32| -> (i32, i32) {
        match side {
            Side::Left => (d, a),
            Side::Top => (a, d),
        }
    };

    let mut segments = Vec::with_capacity(3 * tree.merges.len());
    for (k, merge) in tree.merges.iter().enumerate() {
        let parent = away(heights[tree.n_leaves + k]);
        for child in [merge.left, merge.right] {
            let a = along(child);
            segments.push([oriented(a, away(heights[child])), oriented(a, parent)]);
        }
        segments.push([oriented(along(merge.left), parent), oriented(along(merge.right), parent)]);
    }
    for segment in segments {
        area.draw(&PathElement::new(segment.to_vec(), BLACK))
            .map_err(render_error)?;
    }
    Ok(())
}

fn draw_colour_bar<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, x0: i32, y0: i32, y1: i32, limit: f64) -> Result<()> {
    let span = (y1 - y0).max(1);
    let x1 = x0 + COLOUR_BAR_WIDTH;
    for y in y0..y1 {
        let value = limit * (1.0 - 2.0 * (y - y0) as f64 / span as f64);
        area.draw(&Rectangle::new([(x0, y), (x1, y)], diverging(value, limit).filled()))
            .map_err(render_error)?;
    }
    area.draw(&Rectangle::new([(x0, y0), (x1, y1)], BLACK))
        .map_err(render_error)?;

    let style = label_style(12, HPos::Left);
    let mid = y0 + span / 2;
    for (y, text) in [
        (y0, format!("{:.1}", limit)),
        (mid, "0".to_string()),
        (y1, format!("{:.1}", -limit)),
    ] {
        area.draw(&PathElement::new(vec![(x1, y), (x1 + 4, y)], BLACK))
            .map_err(render_error)?;
        area.draw(&Text::new(text, (x1 + 6, y), style.clone()))
            .map_err(render_error)?;
    }
    Ok(())
}

/// Cells, dendrograms and colour bar for z-scored features x samples
fn draw_clustered<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, z: &[Vec<f64>], n_samples: usize) -> Result<f64> {
    let columns: Vec<Vec<f64>> = (0..n_samples).map(|j| z.iter().map(|r| r[j]).collect()).collect();
    let row_tree = average_linkage(z);
    let col_tree = average_linkage(&columns);

    let limit = z
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let limit = if limit > 0.0 { limit } else { 1.0 };

    let (w, h) = area.dim_in_pixel();
    let (w, h) = (w as i32, h as i32);
    let left = (w as f64 * 0.15) as i32;
    let top = (h as f64 * 0.15) as i32;
    let x0 = MARGIN + left;
    let y0 = MARGIN + top;
    let x1 = w - MARGIN - COLOUR_BAR_LABELS - COLOUR_BAR_WIDTH - COLOUR_BAR_GAP;
    let y1 = h - MARGIN;

    let xs = bands(x0, x1 - x0, n_samples);
    let ys = bands(y0, y1 - y0, z.len());
    for (r, &feature) in row_tree.order.iter().enumerate() {
        for (c, &sample) in col_tree.order.iter().enumerate() {
            let colour = diverging(z[feature][sample], limit);
            area.draw(&Rectangle::new([(xs[c], ys[r]), (xs[c + 1], ys[r + 1])], colour.filled()))
                .map_err(render_error)?;
        }
    }
    area.draw(&Rectangle::new([(x0, y0), (x1, y1)], GREY))
        .map_err(render_error)?;

    let row_centres: Vec<f64> = (0..z.len()).map(|r| 0.5 * (ys[r] + ys[r + 1]) as f64).collect();
    let col_centres: Vec<f64> = (0..n_samples).map(|c| 0.5 * (xs[c] + xs[c + 1]) as f64).collect();
    draw_dendrogram(area, &row_tree, &row_centres, x0 - 2, left - 4, Side::Left)?;
    draw_dendrogram(area, &col_tree, &col_centres, y0 - 2, top - 4, Side::Top)?;

    draw_colour_bar(area, x1 + COLOUR_BAR_GAP, y0, y1, limit)?;
    Ok(limit)
}

/// Render the heatmap of the selected features
///
/// `log1p_counts` is samples x features. Rows of the image are features and columns
/// are samples, both reordered by average-linkage clustering with dendrograms drawn
/// on the left and top. No features or no samples give an empty-state image.
pub fn render_heatmap(log1p_counts: ArrayView2<f64>, feature_subset: &[usize], params: &PlotParams) -> Result<Vec<u8>> {
    let (width, height) = (params.heatmap_width, params.heatmap_height);
    let n_samples = log1p_counts.nrows();

    let mut buffer = rgb_buffer(width, height)?;
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        let body = root.titled("Heatmap", ("sans-serif", 24)).map_err(render_error)?;

        if feature_subset.is_empty() || n_samples == 0 {
            log::info!("No features to draw; rendering an empty heatmap");
            draw_empty_state(&body)?;
        } else {
            let rows: Vec<Vec<f64>> = feature_subset
                .iter()
                .map(|&f| log1p_counts.column(f).to_vec())
                .collect();
            let z = z_scores(&rows);
            let limit = draw_clustered(&body, &z, n_samples)?;
            log::debug!(
                "Heatmap: {} features x {} samples, z limit {:.2}",
                rows.len(),
                n_samples,
                limit
            );
        }
        root.present().map_err(render_error)?;
    }
    encode_png(width, height, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::{rdylbu_r, PNG_SIGNATURE};
    use crate::testing::ResultRow;
    use ndarray::Array2;

    fn decode(png: &[u8]) -> image::RgbImage {
        image::load_from_memory(png).unwrap().to_rgb8()
    }

    /// Dark pixels in the centred title band at the top of the image
    fn has_title(img: &image::RgbImage) -> bool {
        let mid = img.width() / 2;
        (0..40).any(|y| (mid - 50..mid + 50).any(|x| img.get_pixel(x, y).0.iter().all(|&c| c < 100)))
    }

    #[test]
    fn test_z_scores() {
        let z = z_scores(&[vec![1.0, 2.0, 3.0], vec![5.0, 5.0, 5.0]]);
        assert_eq!(z[0], vec![-1.0, 0.0, 1.0]);
        assert_eq!(z[1], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_heatmap_png() {
        let mut counts = Array2::zeros((4, 6));
        for j in 0..4 {
            for f in 0..6 {
                counts[[j, f]] = ((j * 3 + f * 7) % 5) as f64 + if j >= 2 && f < 3 { 4.0 } else { 0.0 };
            }
        }
        let params = PlotParams::default();
        let png = render_heatmap(counts.view(), &[0, 1, 2, 3, 4], &params).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        let img = decode(&png);
        assert_eq!(img.dimensions(), (params.heatmap_width, params.heatmap_height));
        assert!(has_title(&img));

        // The cell with the largest |z| takes one end of the scale
        let ends: Vec<[u8; 3]> = [rdylbu_r(0.0), rdylbu_r(1.0)]
            .iter()
            .map(|&RGBColor(r, g, b)| [r, g, b])
            .collect();
        assert!(img.pixels().any(|p| ends.contains(&p.0)));
    }

    #[test]
    fn test_empty_heatmap_is_valid_png() {
        let counts = Array2::zeros((4, 3));
        let params = PlotParams::default();
        let png = render_heatmap(counts.view(), &[], &params).unwrap();
        let img = decode(&png);
        assert_eq!(img.dimensions(), (800, 900));
        assert!(has_title(&img));
        assert!(img.pixels().any(|p| p.0 == [220, 220, 220]));
    }

    #[test]
    fn test_single_feature_and_constant_rows() {
        let counts = Array2::from_elem((3, 2), 1.5);
        let png = render_heatmap(counts.view(), &[1], &PlotParams::default()).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn test_feature_cap_keeps_smallest_padj() {
        let ids: Vec<String> = (0..4).map(|i| format!("g{}", i)).collect();
        let row = |id: &str, padj: f64| ResultRow {
            feature_id: id.to_string(),
            base_mean: 10.0,
            log2_fold_change: 2.0,
            lfc_se: 0.1,
            stat: 20.0,
            pvalue: padj,
            padj,
        };
        let filtered = FilteredResult {
            rows: vec![row("g0", 0.04), row("g2", 0.001), row("g3", 0.01)],
            alpha: 0.05,
            lfc: 1.0,
        };
        assert_eq!(heatmap_features(&ids, &filtered, 10), vec![0, 2, 3]);
        assert_eq!(heatmap_features(&ids, &filtered, 2), vec![2, 3]);
    }
}
