//! Run parameters and their defaults

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeaError, Result};

/// User-facing analysis parameters
///
/// Serializable so a run can be configured from a JSON file; CLI flags override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Replace Cook's outliers and refit affected features
    pub refit_cooks: bool,
    /// Minimum total read count for a feature to be kept
    pub min_reads_per_gene: u64,
    /// Adjusted p-value threshold, exclusive, in (0, 1)
    pub alpha_threshold: f64,
    /// Absolute log2 fold change threshold, exclusive, >= 0
    pub lfc_threshold: f64,
    /// Explicit contrast numerator level
    pub numerator: Option<String>,
    /// Explicit contrast denominator level
    pub denominator: Option<String>,
    /// Restrict BH adjustment to features above an optimal baseMean quantile
    pub independent_filtering: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            refit_cooks: true,
            min_reads_per_gene: 10,
            alpha_threshold: 0.05,
            lfc_threshold: 1.0,
            numerator: None,
            denominator: None,
            independent_filtering: true,
        }
    }
}

impl AnalysisParams {
    /// Load parameters from a JSON file; missing keys take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let params: AnalysisParams = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha_threshold > 0.0 && self.alpha_threshold < 1.0) {
            return Err(DeaError::invalid(format!(
                "alpha_threshold must lie in (0, 1), got {}",
                self.alpha_threshold
            )));
        }
        if !(self.lfc_threshold >= 0.0 && self.lfc_threshold.is_finite()) {
            return Err(DeaError::invalid(format!(
                "lfc_threshold must be a finite non-negative number, got {}",
                self.lfc_threshold
            )));
        }
        match (&self.numerator, &self.denominator) {
            (Some(n), Some(d)) if n == d => Err(DeaError::invalid(format!(
                "numerator and denominator must differ, both are '{}'",
                n
            ))),
            (Some(_), None) | (None, Some(_)) => Err(DeaError::invalid(
                "numerator and denominator must be given together",
            )),
            _ => Ok(()),
        }
    }
}

/// Numerical settings of the count model fit
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Lower bound on dispersion estimates
    pub min_disp: f64,
    /// Convergence tolerance of the gene-wise dispersion line search
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    /// Iteration cap for dispersion optimization
    pub disp_maxit: usize,
    /// Features whose gene-wise log dispersion exceeds the trend by this many prior SDs keep it
    pub outlier_sd: f64,
    /// Relative deviance tolerance for IRLS
    pub beta_tol: f64,
    /// Iteration cap for IRLS
    pub glm_maxit: usize,
    /// Replicates needed in a level before its outliers are replaced
    pub min_replicates_for_replace: usize,
    /// Fraction trimmed from each end when computing replacement counts
    pub trim: f64,
    /// Quantile of F(p, m - p) used as the Cook's distance cutoff
    pub cooks_quantile: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            disp_maxit: 100,
            outlier_sd: 2.0,
            beta_tol: 1e-8,
            glm_maxit: 100,
            min_replicates_for_replace: 7,
            trim: 0.2,
            cooks_quantile: 0.99,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_disp > 0.0) {
            return Err(DeaError::invalid("min_disp must be positive"));
        }
        if !(0.0..0.5).contains(&self.trim) {
            return Err(DeaError::invalid(format!("trim must lie in [0, 0.5), got {}", self.trim)));
        }
        if !(self.cooks_quantile > 0.0 && self.cooks_quantile < 1.0) {
            return Err(DeaError::invalid("cooks_quantile must lie in (0, 1)"));
        }
        if self.disp_maxit == 0 || self.glm_maxit == 0 {
            return Err(DeaError::invalid("iteration caps must be positive"));
        }
        Ok(())
    }
}

/// Image sizes and heatmap limits
#[derive(Debug, Clone)]
pub struct PlotParams {
    pub heatmap_width: u32,
    pub heatmap_height: u32,
    pub volcano_width: u32,
    pub volcano_height: u32,
    /// At most this many features are drawn; those with the smallest padj are kept
    pub max_heatmap_features: usize,
}

impl Default for PlotParams {
    fn default() -> Self {
        Self {
            heatmap_width: 800,
            heatmap_height: 900,
            volcano_width: 800,
            volcano_height: 600,
            max_heatmap_features: 500,
        }
    }
}

impl PlotParams {
    pub fn validate(&self) -> Result<()> {
        if self.heatmap_width < 200 || self.heatmap_height < 200 {
            return Err(DeaError::invalid("heatmap must be at least 200x200 pixels"));
        }
        if self.volcano_width < 200 || self.volcano_height < 200 {
            return Err(DeaError::invalid("volcano plot must be at least 200x200 pixels"));
        }
        if self.max_heatmap_features == 0 {
            return Err(DeaError::invalid("max_heatmap_features must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalysisParams::default().validate().is_ok());
        assert!(ModelParams::default().validate().is_ok());
        assert!(PlotParams::default().validate().is_ok());
    }

    #[test]
    fn test_alpha_bounds() {
        for alpha in [0.0, 1.0, -0.1, f64::NAN] {
            let params = AnalysisParams { alpha_threshold: alpha, ..Default::default() };
            assert!(matches!(params.validate(), Err(DeaError::InvalidParameter { .. })));
        }
    }

    #[test]
    fn test_contrast_pair_rules() {
        let one_sided = AnalysisParams { numerator: Some("B".into()), ..Default::default() };
        assert!(one_sided.validate().is_err());

        let same = AnalysisParams {
            numerator: Some("B".into()),
            denominator: Some("B".into()),
            ..Default::default()
        };
        assert!(same.validate().is_err());
    }

    #[test]
    fn test_json_file_with_partial_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"alpha_threshold": 0.1, "refit_cooks": false}}"#).unwrap();

        let params = AnalysisParams::from_json_file(file.path()).unwrap();
        assert_eq!(params.alpha_threshold, 0.1);
        assert!(!params.refit_cooks);
        assert_eq!(params.min_reads_per_gene, 10);
    }

    #[test]
    fn test_json_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"lfc_threshold": -2.0}}"#).unwrap();
        assert!(AnalysisParams::from_json_file(file.path()).is_err());
    }
}
