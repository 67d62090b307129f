//! Post-hoc filtering of test results by significance and effect size

use crate::testing::{ResultRow, StatResult};

/// Rows passing both thresholds, in result order
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredResult {
    pub rows: Vec<ResultRow>,
    pub alpha: f64,
    pub lfc: f64,
}

impl FilteredResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, feature_id: &str) -> bool {
        self.rows.iter().any(|r| r.feature_id == feature_id)
    }
}

fn passes(row: &ResultRow, alpha: f64, lfc: f64) -> bool {
    row.padj < alpha && row.log2_fold_change.abs() > lfc
}

/// Keep rows with `padj < alpha` and `|log2FoldChange| > lfc`; NaN never passes
pub fn filter_results(result: &StatResult, alpha: f64, lfc: f64) -> FilteredResult {
    let rows: Vec<ResultRow> = result
        .rows
        .iter()
        .filter(|row| passes(row, alpha, lfc))
        .cloned()
        .collect();
    log::info!(
        "{} of {} features pass padj < {} and |log2FC| > {}",
        rows.len(),
        result.rows.len(),
        alpha,
        lfc
    );
    FilteredResult { rows, alpha, lfc }
}
