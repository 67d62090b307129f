//! Size factor estimation using the median of ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{DeaError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFactorMethod {
    /// Median of ratios over features that are non-zero in every sample
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

/// Size factors for a features x samples count matrix
///
/// Uses the ratio method and falls back to positive counts when no feature is
/// expressed in every sample.
pub fn estimate_size_factors(counts: ArrayView2<f64>) -> Result<(Array1<f64>, SizeFactorMethod)> {
    let (n_features, n_samples) = counts.dim();
    if n_features == 0 || n_samples == 0 {
        return Err(DeaError::EmptyDataset {
            reason: "count matrix is empty".to_string(),
        });
    }

    match size_factors_with(counts, SizeFactorMethod::Ratio) {
        Ok(sf) => Ok((sf, SizeFactorMethod::Ratio)),
        Err(e) => {
            log::warn!("{}; falling back to positive-count size factors", e);
            let sf = size_factors_with(counts, SizeFactorMethod::PosCounts)?;
            Ok((sf, SizeFactorMethod::PosCounts))
        }
    }
}

/// Size factors with an explicit method
pub fn size_factors_with(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();

    // Log geometric mean per usable feature
    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(i, row)| {
            let usable = match method {
                SizeFactorMethod::Ratio => row.iter().all(|&x| x > 0.0),
                SizeFactorMethod::PosCounts => row.iter().any(|&x| x > 0.0),
            };
            if !usable {
                return None;
            }
            // Positive counts only, divided by the total number of samples
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            Some((i, log_sum / n_samples as f64))
        })
        .collect();

    if log_geo_means.is_empty() {
        return Err(DeaError::model_fit(match method {
            SizeFactorMethod::Ratio => "every feature has a zero in at least one sample",
            SizeFactorMethod::PosCounts => "no feature has a positive count",
        }));
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = log_geo_means
            .iter()
            .filter(|&&(i, _)| counts[[i, j]] > 0.0)
            .map(|&(i, log_geo)| (counts[[i, j]].ln() - log_geo).exp())
            .collect();

        size_factors[j] = if ratios.is_empty() {
            match method {
                SizeFactorMethod::Ratio => {
                    return Err(DeaError::model_fit(format!("no valid ratios for sample {}", j)))
                }
                SizeFactorMethod::PosCounts => 1.0,
            }
        } else {
            median(&ratios)
        };
    }

    if method == SizeFactorMethod::PosCounts {
        // Geometric mean of the size factors is one
        let log_center = size_factors.iter().map(|&x: &f64| x.ln()).sum::<f64>() / n_samples as f64;
        let center = log_center.exp();
        size_factors.mapv_inplace(|x| x / center);
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(DeaError::model_fit("invalid size factors computed"));
    }

    Ok(size_factors)
}

/// Counts divided by the per-sample size factor (features x samples)
pub fn normalize_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut column, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        column.mapv_inplace(|x| x / sf);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_size_factor_estimation() {
        let counts = array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0]
        ];
        let (sf, method) = estimate_size_factors(counts.view()).unwrap();
        assert_eq!(method, SizeFactorMethod::Ratio);
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // s2 has twice the depth of s1
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_poscounts_fallback() {
        let counts = array![[0.0, 10.0, 20.0], [10.0, 0.0, 20.0], [10.0, 10.0, 0.0]];
        let (sf, method) = estimate_size_factors(counts.view()).unwrap();
        assert_eq!(method, SizeFactorMethod::PosCounts);
        let log_center: f64 = sf.iter().map(|x| x.ln()).sum::<f64>() / 3.0;
        assert!(log_center.abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_is_error() {
        let counts = Array2::<f64>::zeros((3, 3));
        assert!(estimate_size_factors(counts.view()).is_err());
    }

    #[test]
    fn test_normalized_counts() {
        let counts = array![[100.0, 200.0, 80.0, 160.0], [50.0, 100.0, 40.0, 80.0]];
        let sf = array![1.0, 2.0, 0.8, 1.6];
        let normalized = normalize_counts(counts.view(), &sf);
        assert!(normalized.row(0).iter().all(|&v| (v - 100.0).abs() < 1e-9));
        assert!(normalized.row(1).iter().all(|&v| (v - 50.0).abs() < 1e-9));
    }
}
