//! Design matrix for the single-factor model `~ design_factor`

use ndarray::{Array1, Array2};

use crate::data::SampleMetadata;
use crate::error::{DeaError, Result};

/// Treatment-coded design: an intercept plus one indicator per non-reference level
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Samples x coefficients
    pub matrix: Array2<f64>,
    /// Name of the design factor
    pub factor: String,
    /// Sorted levels; the first is the reference
    pub levels: Vec<String>,
    /// Level index of each sample
    pub sample_levels: Vec<usize>,
    pub coef_names: Vec<String>,
}

impl DesignMatrix {
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn reference_level(&self) -> &str {
        &self.levels[0]
    }

    /// Number of samples in each level, in level order
    pub fn replicates_per_level(&self) -> Vec<usize> {
        let mut counts = vec![0; self.levels.len()];
        for &l in &self.sample_levels {
            counts[l] += 1;
        }
        counts
    }

    /// Number of replicates of the level each sample belongs to
    pub fn replicates_per_sample(&self) -> Vec<usize> {
        let per_level = self.replicates_per_level();
        self.sample_levels.iter().map(|&l| per_level[l]).collect()
    }

    /// Contrast vector c with cᵀβ = log(numerator / denominator)
    pub fn contrast_vector(&self, numerator: &str, denominator: &str) -> Result<Array1<f64>> {
        let level_index = |name: &str| {
            self.levels.iter().position(|l| l == name).ok_or_else(|| {
                DeaError::invalid(format!(
                    "level '{}' not found in design factor '{}' (levels: {})",
                    name,
                    self.factor,
                    self.levels.join(", ")
                ))
            })
        };
        let num = level_index(numerator)?;
        let den = level_index(denominator)?;
        if num == den {
            return Err(DeaError::invalid("contrast numerator and denominator must differ"));
        }

        // Level k > 0 is coefficient k; the reference has no coefficient of its own
        let mut c = Array1::zeros(self.n_coefs());
        if num > 0 {
            c[num] += 1.0;
        }
        if den > 0 {
            c[den] -= 1.0;
        }
        Ok(c)
    }
}

/// Build the design matrix from the design factor of aligned metadata
///
/// Every level needs at least two samples and there must be at least two levels;
/// otherwise dispersions cannot be estimated.
pub fn create_design_matrix(metadata: &SampleMetadata) -> Result<DesignMatrix> {
    let factor = metadata.design_factor()?.to_string();
    let values = metadata.design_values()?;
    let levels = metadata.levels(&factor).unwrap_or_default();

    if levels.len() < 2 {
        return Err(DeaError::model_fit(format!(
            "design factor '{}' needs at least two levels, found {}",
            factor,
            levels.len()
        )));
    }

    let mut sample_levels = Vec::with_capacity(values.len());
    for (sample, value) in metadata.sample_ids().iter().zip(values) {
        let idx = levels.iter().position(|l| l == value).ok_or_else(|| {
            DeaError::model_fit(format!("sample '{}' has no level for '{}'", sample, factor))
        })?;
        sample_levels.push(idx);
    }

    let n_samples = sample_levels.len();
    let n_coefs = levels.len();
    let mut matrix = Array2::zeros((n_samples, n_coefs));
    for (i, &l) in sample_levels.iter().enumerate() {
        matrix[[i, 0]] = 1.0;
        if l > 0 {
            matrix[[i, l]] = 1.0;
        }
    }

    let mut coef_names = vec!["Intercept".to_string()];
    for level in levels.iter().skip(1) {
        coef_names.push(format!("{}_{}_vs_{}", factor, level, levels[0]));
    }

    let design = DesignMatrix {
        matrix,
        factor,
        levels,
        sample_levels,
        coef_names,
    };

    for (level, &n) in design.levels.iter().zip(design.replicates_per_level().iter()) {
        if n < 2 {
            return Err(DeaError::model_fit(format!(
                "level '{}' of '{}' has {} sample; every level needs at least 2 replicates",
                level, design.factor, n
            )));
        }
    }

    Ok(design)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Covariate;

    fn metadata(conditions: &[&str]) -> SampleMetadata {
        let ids = (1..=conditions.len()).map(|i| format!("s{}", i)).collect();
        SampleMetadata::new(
            ids,
            vec![Covariate::new("treatment", conditions.iter().map(|s| s.to_string()).collect())],
        )
        .unwrap()
    }

    #[test]
    fn test_design_matrix_creation() {
        let design = create_design_matrix(&metadata(&["control", "control", "treated", "treated"])).unwrap();

        assert_eq!(design.matrix.dim(), (4, 2));
        assert_eq!(design.reference_level(), "control");
        assert_eq!(design.coef_names[1], "treatment_treated_vs_control");
        assert_eq!(design.matrix[[0, 1]], 0.0);
        assert_eq!(design.matrix[[2, 0]], 1.0);
        assert_eq!(design.matrix[[2, 1]], 1.0);
    }

    #[test]
    fn test_three_level_contrasts() {
        let design = create_design_matrix(&metadata(&["high", "high", "low", "low", "medium", "medium"])).unwrap();
        assert_eq!(design.matrix.dim(), (6, 3));
        assert_eq!(design.reference_level(), "high");

        assert_eq!(design.contrast_vector("low", "high").unwrap().to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(design.contrast_vector("high", "low").unwrap().to_vec(), vec![0.0, -1.0, 0.0]);
        assert_eq!(design.contrast_vector("medium", "low").unwrap().to_vec(), vec![0.0, -1.0, 1.0]);
        assert!(design.contrast_vector("absent", "low").is_err());
    }

    #[test]
    fn test_single_sample_level_fails() {
        let result = create_design_matrix(&metadata(&["A", "A", "B"]));
        assert!(matches!(result, Err(DeaError::ModelFit { .. })));
    }

    #[test]
    fn test_single_level_fails() {
        let result = create_design_matrix(&metadata(&["A", "A", "A"]));
        assert!(matches!(result, Err(DeaError::ModelFit { .. })));
    }
}
