//! Cook's distance outlier detection, replacement and filtering
//!
//! cooks_ij = (y_ij - μ_ij)² / (μ_ij + α_i μ_ij²) / p · h_ij / (1 - h_ij)²
//! with α_i a robust method-of-moments dispersion.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::glm::{nb_variance, DesignMatrix};
use crate::stats::trimmed_mean;

/// Floor on the robust dispersion
const MIN_ROBUST_DISP: f64 = 0.04;

/// Trim fraction and scale constant of the trimmed variance, by cell size
fn trim_constants(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let sq: Vec<f64> = values.iter().map(|&v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// Robust method-of-moments dispersion per feature from normalized counts (features x samples)
///
/// With a level of at least 3 samples the variance is the largest trimmed within-level
/// variance; otherwise a trimmed variance across all samples.
pub fn robust_method_of_moments_disp(normalized: ArrayView2<f64>, design: &DesignMatrix) -> Vec<f64> {
    let per_level = design.replicates_per_level();
    let cells: Vec<Vec<usize>> = (0..design.levels.len())
        .filter(|&l| per_level[l] >= 3)
        .map(|l| {
            design
                .sample_levels
                .iter()
                .enumerate()
                .filter(|(_, &s)| s == l)
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    (0..normalized.nrows())
        .into_par_iter()
        .map(|i| {
            let row = normalized.row(i);
            let values = row.to_vec();
            let variance = if cells.is_empty() {
                let (trim, scale) = (1.0 / 8.0, 1.51);
                trimmed_variance(&values, trim, scale)
            } else {
                cells
                    .iter()
                    .map(|cell| {
                        let (trim, scale) = trim_constants(cell.len());
                        let cell_values: Vec<f64> = cell.iter().map(|&j| values[j]).collect();
                        trimmed_variance(&cell_values, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Cook's distances (features x samples); NaN where the hat value is degenerate
pub fn calculate_cooks_distance(
    counts: ArrayView2<f64>,
    mu: &Array2<f64>,
    hat_diagonals: &Array2<f64>,
    robust_disp: &[f64],
    n_coefs: usize,
) -> Array2<f64> {
    let p = n_coefs as f64;
    let mut cooks = Array2::from_elem(counts.dim(), f64::NAN);
    for ((i, j), c) in cooks.indexed_iter_mut() {
        let m = mu[[i, j]];
        let h = hat_diagonals[[i, j]];
        let v = nb_variance(m, robust_disp[i]);
        if v > 0.0 && h.is_finite() && h < 1.0 {
            let pearson_sq = (counts[[i, j]] - m).powi(2) / v;
            *c = pearson_sq / p * h / (1.0 - h).powi(2);
        }
    }
    cooks
}

/// Cutoff at the given quantile of F(p, m - p)
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize, quantile: f64) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    match FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64) {
        Ok(f) => f.inverse_cdf(quantile),
        Err(_) => f64::INFINITY,
    }
}

/// Largest Cook's distance per feature over the samples allowed to count
///
/// Returns (max, sample index); features without a finite value give (NaN, 0).
pub fn max_cooks_per_gene(cooks: &Array2<f64>, sample_mask: &[bool]) -> Vec<(f64, usize)> {
    cooks
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|(j, c)| sample_mask[*j] && c.is_finite())
                .fold((f64::NAN, 0), |best, (j, &c)| {
                    if best.0.is_nan() || c > best.0 {
                        (c, j)
                    } else {
                        best
                    }
                })
        })
        .collect()
}

/// Features whose p-value should be discarded as driven by a single outlier
///
/// In two-level designs a feature is kept when at least 3 samples have counts above
/// the outlier's count.
pub fn cooks_outliers(
    max_cooks: &[(f64, usize)],
    counts: ArrayView2<f64>,
    cutoff: f64,
    two_level: bool,
) -> Vec<bool> {
    max_cooks
        .iter()
        .enumerate()
        .map(|(i, &(max, sample))| {
            if !(max > cutoff) {
                return false;
            }
            if two_level {
                let outlier_count = counts[[i, sample]];
                let n_above = counts.row(i).iter().filter(|&&c| c > outlier_count).count();
                n_above < 3
            } else {
                true
            }
        })
        .collect()
}

/// Counts after outlier replacement
#[derive(Debug, Clone)]
pub struct ReplacedCounts {
    /// Features x samples, with outliers replaced
    pub counts: Array2<f64>,
    /// Cells that were replaced
    pub replaced: Array2<bool>,
    /// Features with at least one replaced cell
    pub features: Vec<usize>,
}

/// Replace outlier counts in replaceable samples by floor(trimmed mean of normalized counts × size factor)
pub fn replace_outliers(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    cooks: &Array2<f64>,
    cutoff: f64,
    replaceable: &[bool],
    trim: f64,
) -> ReplacedCounts {
    let mut new_counts = counts.to_owned();
    let mut replaced = Array2::from_elem(counts.dim(), false);
    let mut features = Vec::new();

    for i in 0..counts.nrows() {
        let outliers: Vec<usize> = (0..counts.ncols())
            .filter(|&j| replaceable[j] && cooks[[i, j]] > cutoff)
            .collect();
        if outliers.is_empty() {
            continue;
        }

        let normalized: Vec<f64> = counts
            .row(i)
            .iter()
            .zip(size_factors.iter())
            .map(|(&c, &s)| c / s)
            .collect();
        let trim_base_mean = trimmed_mean(&normalized, trim);
        for j in outliers {
            new_counts[[i, j]] = (trim_base_mean * size_factors[j]).floor();
            replaced[[i, j]] = true;
        }
        features.push(i);
    }

    ReplacedCounts {
        counts: new_counts,
        replaced,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Covariate, SampleMetadata};
    use crate::glm::create_design_matrix;
    use ndarray::array;

    fn design(per_group: usize) -> DesignMatrix {
        let mut conditions = vec!["A".to_string(); per_group];
        conditions.extend(vec!["B".to_string(); per_group]);
        let ids = (0..conditions.len()).map(|i| format!("s{}", i)).collect();
        create_design_matrix(&SampleMetadata::new(ids, vec![Covariate::new("c", conditions)]).unwrap()).unwrap()
    }

    #[test]
    fn test_default_cutoff() {
        let cutoff = default_cooks_cutoff(10, 2, 0.99);
        // qf(0.99, 2, 8) = 8.649
        assert!((cutoff - 8.649).abs() < 0.01);
        assert_eq!(default_cooks_cutoff(2, 2, 0.99), f64::INFINITY);
    }

    #[test]
    fn test_robust_disp_floor() {
        let normalized = array![[100.0, 100.0, 100.0, 100.0, 100.0, 100.0], [0.0; 6]];
        let disp = robust_method_of_moments_disp(normalized.view(), &design(3));
        assert_eq!(disp, vec![MIN_ROBUST_DISP, MIN_ROBUST_DISP]);
    }

    #[test]
    fn test_cooks_distance_flags_spike() {
        let counts = array![[10.0, 11.0, 9.0, 10.0, 12.0, 500.0]];
        let mu = Array2::from_elem((1, 6), 92.0);
        let hat = Array2::from_elem((1, 6), 1.0 / 3.0);
        let cooks = calculate_cooks_distance(counts.view(), &mu, &hat, &[0.1], 2);

        let max = max_cooks_per_gene(&cooks, &[true; 6]);
        assert_eq!(max[0].1, 5);

        let masked = max_cooks_per_gene(&cooks, &[true, true, true, true, true, false]);
        assert_ne!(masked[0].1, 5);
    }

    #[test]
    fn test_two_level_dont_filter_heuristic() {
        let counts = array![[0.0, 50.0, 60.0, 55.0], [500.0, 50.0, 60.0, 55.0]];
        let max = vec![(100.0, 0), (100.0, 0)];
        let flags = cooks_outliers(&max, counts.view(), 5.0, true);
        // Low outlier with three larger samples is kept; the high outlier is not
        assert_eq!(flags, vec![false, true]);
        assert_eq!(cooks_outliers(&max, counts.view(), 5.0, false), vec![true, true]);
    }

    #[test]
    fn test_replace_outliers_uses_trimmed_mean() {
        let counts = array![[10.0, 12.0, 11.0, 13.0, 9.0, 500.0, 10.0]];
        let sf = Array1::ones(7);
        let mut cooks = Array2::zeros((1, 7));
        cooks[[0, 5]] = 50.0;

        let result = replace_outliers(counts.view(), &sf, &cooks, 5.0, &[true; 7], 0.2);
        // floor(7 * 0.2) = 1 trimmed each end: mean of 10,10,11,12,13 = 11.2
        assert_eq!(result.counts[[0, 5]], 11.0);
        assert!(result.replaced[[0, 5]]);
        assert_eq!(result.features, vec![0]);

        let untouched = replace_outliers(counts.view(), &sf, &cooks, 5.0, &[false; 7], 0.2);
        assert!(untouched.features.is_empty());
        assert_eq!(untouched.counts[[0, 5]], 500.0);
    }
}
