//! Dispersion-mean trend

use crate::error::{DeaError, Result};

/// Fitted relationship between mean expression and dispersion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    /// α(μ) = asymptotic + extra_poisson / μ
    Parametric { asymptotic: f64, extra_poisson: f64 },
    /// Constant trend at the mean gene-wise dispersion
    Mean(f64),
}

impl DispersionTrend {
    /// Trended dispersion at a given normalized mean
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric { asymptotic, extra_poisson } => {
                if mean > 0.0 {
                    asymptotic + extra_poisson / mean
                } else {
                    asymptotic
                }
            }
            DispersionTrend::Mean(value) => value,
        }
    }
}

/// Fit the trend over features with a usable gene-wise estimate
///
/// Tries the parametric gamma fit first and falls back to the mean dispersion.
pub fn fit_dispersion_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    match fit_parametric_trend(&usable) {
        Ok((asymptotic, extra_poisson)) => {
            log::debug!("Parametric dispersion trend: a0={:.6}, a1={:.6}", asymptotic, extra_poisson);
            Ok(DispersionTrend::Parametric { asymptotic, extra_poisson })
        }
        Err(e) => {
            log::warn!("{}; using the mean dispersion as trend", e);
            mean_trend(dispersions, min_disp)
        }
    }
}

/// Mean of gene-wise dispersions above 10 · min_disp, trimmed by 0.1% on each side
fn mean_trend(dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<f64> = dispersions
        .iter()
        .filter(|&&d| d.is_finite() && d > 10.0 * min_disp)
        .copied()
        .collect();

    let value = if usable.is_empty() {
        let finite: Vec<f64> = dispersions.iter().filter(|d| d.is_finite()).copied().collect();
        if finite.is_empty() {
            return Err(DeaError::model_fit("no feature has a finite dispersion estimate"));
        }
        finite.iter().sum::<f64>() / finite.len() as f64
    } else {
        crate::stats::trimmed_mean(&usable, 0.001)
    };
    Ok(DispersionTrend::Mean(value.max(min_disp)))
}

/// Iterated gamma GLM with residual filtering: keep points with 1e-4 < disp/fit < 15
fn fit_parametric_trend(data: &[(f64, f64)]) -> Result<(f64, f64)> {
    let mut coefs = (0.1_f64, 1.0_f64);

    for _ in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                let residual = disp / fitted;
                fitted > 0.0 && residual > 1e-4 && residual < 15.0
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(DeaError::model_fit("too few features for a parametric dispersion trend"));
        }

        let (new_coefs, converged) = fit_gamma_identity(&good, coefs);
        coefs = new_coefs;

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(DeaError::model_fit(format!(
                "parametric dispersion trend has non-positive coefficients (a0={:.4}, a1={:.4})",
                coefs.0, coefs.1
            )));
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && converged {
            return Ok(coefs);
        }
    }

    Err(DeaError::model_fit("parametric dispersion trend did not converge"))
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma-family GLM with identity link, disp ~ a0 + a1 · (1/mean), weights 1/μ²
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_trend_recovers_coefficients() {
        let means: Vec<f64> = (1..200).map(|i| i as f64 * 5.0).collect();
        let disps: Vec<f64> = means.iter().map(|&m| 0.05 + 4.0 / m).collect();

        let trend = fit_dispersion_trend(&means, &disps, 1e-8).unwrap();
        match trend {
            DispersionTrend::Parametric { asymptotic, extra_poisson } => {
                assert!((asymptotic - 0.05).abs() < 1e-3);
                assert!((extra_poisson - 4.0).abs() < 1e-2);
            }
            other => panic!("expected parametric trend, got {:?}", other),
        }
        assert!((trend.evaluate(100.0) - 0.09).abs() < 1e-3);
    }

    #[test]
    fn test_mean_fallback_when_too_few_points() {
        let trend = fit_dispersion_trend(&[10.0, 20.0], &[0.2, 0.4], 1e-8).unwrap();
        match trend {
            DispersionTrend::Mean(v) => assert!((v - 0.3).abs() < 1e-12),
            other => panic!("expected mean trend, got {:?}", other),
        }
        assert_eq!(trend.evaluate(1e6), trend.evaluate(1.0));
    }

    #[test]
    fn test_no_finite_dispersion_is_error() {
        assert!(fit_dispersion_trend(&[1.0], &[f64::NAN], 1e-8).is_err());
    }
}
