//! Differential expression results

use serde::{Deserialize, Serialize};

/// Comparison of two levels of the design factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    /// Design factor name (e.g., "condition")
    pub variable: String,
    /// Level in the numerator of the fold change
    pub numerator: String,
    /// Level in the denominator, usually the reference
    pub denominator: String,
}

/// One feature's test result
///
/// Field names serialize to the canonical column names of the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Geneid")]
    pub feature_id: String,
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    #[serde(rename = "log2FoldChange")]
    pub log2_fold_change: f64,
    #[serde(rename = "lfcSE")]
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
}

impl ResultRow {
    /// Row for a feature that was not tested
    pub fn untested(feature_id: String, base_mean: f64) -> Self {
        Self {
            feature_id,
            base_mean,
            log2_fold_change: f64::NAN,
            lfc_se: f64::NAN,
            stat: f64::NAN,
            pvalue: f64::NAN,
            padj: f64::NAN,
        }
    }

    /// padj below `alpha`; NaN never is
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.padj < alpha
    }
}

/// Wald test results, one row per fitted feature in model order
#[derive(Debug, Clone, PartialEq)]
pub struct StatResult {
    pub contrast: Contrast,
    pub rows: Vec<ResultRow>,
    /// Features whose p-value was removed by Cook's filtering
    pub cooks_outliers: Vec<bool>,
    /// Base mean cutoff of independent filtering, if applied
    pub filter_cutoff: Option<f64>,
}

impl StatResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Significant rows with positive / negative fold change
    fn count_significant(&self, alpha: f64, direction: impl Fn(f64) -> bool) -> usize {
        self.rows
            .iter()
            .filter(|r| r.is_significant(alpha) && direction(r.log2_fold_change))
            .count()
    }

    /// Summary counts at a significance level
    pub fn summary(&self, alpha: f64) -> ResultSummary {
        ResultSummary {
            total: self.rows.len(),
            tested: self.rows.iter().filter(|r| r.pvalue.is_finite()).count(),
            significant: self.count_significant(alpha, |_| true),
            up: self.count_significant(alpha, |lfc| lfc > 0.0),
            down: self.count_significant(alpha, |lfc| lfc < 0.0),
            outliers: self.cooks_outliers.iter().filter(|&&o| o).count(),
            alpha,
        }
    }
}

/// Summary of a result set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultSummary {
    pub total: usize,
    /// Features with a finite p-value
    pub tested: usize,
    pub significant: usize,
    pub up: usize,
    pub down: usize,
    /// Features flagged by Cook's distance
    pub outliers: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Differential Expression Summary")?;
        writeln!(f, "===============================")?;
        writeln!(f, "Total features: {}", self.total)?;
        writeln!(f, "Features tested: {}", self.tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up: {}", self.up)?;
        writeln!(f, "  Down: {}", self.down)?;
        writeln!(f, "Cook's outliers: {}", self.outliers)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, lfc: f64, pvalue: f64, padj: f64) -> ResultRow {
        ResultRow {
            feature_id: id.to_string(),
            base_mean: 100.0,
            log2_fold_change: lfc,
            lfc_se: 0.2,
            stat: lfc / 0.2,
            pvalue,
            padj,
        }
    }

    #[test]
    fn test_summary_counts() {
        let result = StatResult {
            contrast: Contrast {
                variable: "condition".to_string(),
                numerator: "treated".to_string(),
                denominator: "control".to_string(),
            },
            rows: vec![
                row("a", 2.0, 0.001, 0.01),
                row("b", -1.5, 0.002, 0.02),
                row("c", 0.1, 0.5, 0.6),
                ResultRow::untested("d".to_string(), 0.0),
            ],
            cooks_outliers: vec![false, false, true, false],
            filter_cutoff: None,
        };

        let summary = result.summary(0.05);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.tested, 3);
        assert_eq!(summary.significant, 2);
        assert_eq!(summary.up, 1);
        assert_eq!(summary.down, 1);
        assert_eq!(summary.outliers, 1);
        assert!(summary.to_string().contains("Up: 1"));
    }

    #[test]
    fn test_nan_is_never_significant() {
        assert!(!ResultRow::untested("x".to_string(), 1.0).is_significant(1.0));
    }
}
