//! MAP (maximum a posteriori) dispersion shrinkage toward the trend

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::{grid_search, line_search, max_dispersion, LogPrior};
use crate::config::ModelParams;
use crate::glm::DesignMatrix;
use crate::stats::{mad_squared, trigamma};

/// Floor on the prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

/// Spread of gene-wise estimates around the trend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionPrior {
    /// Prior variance of log α around the trend
    pub prior_var: f64,
    /// mad² of log residuals; drives the outlier threshold
    pub var_log_disp_ests: f64,
}

/// Prior variance = max(mad²(log gene-wise - log trend) - ψ₁((m - p) / 2), 0.25)
///
/// Features at the lower dispersion boundary do not contribute.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> DispersionPrior {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return DispersionPrior { prior_var: MIN_PRIOR_VAR, var_log_disp_ests: MIN_PRIOR_VAR };
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coefs {
        return DispersionPrior { prior_var: MIN_PRIOR_VAR, var_log_disp_ests };
    }

    let df = (n_samples - n_coefs) as f64;
    let prior_var = (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR);
    log::debug!(
        "Dispersion prior: df={}, varLogDispEsts={:.4}, prior variance={:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );

    DispersionPrior { prior_var, var_log_disp_ests }
}

/// MAP dispersion of one feature with a log-normal prior centred on the trend
pub fn fit_map_dispersion(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    params: &ModelParams,
) -> f64 {
    let max_disp = max_dispersion(counts.len());
    if !(trend_disp > 0.0 && trend_disp.is_finite()) {
        return gene_disp;
    }
    if !gene_disp.is_finite() {
        return trend_disp;
    }

    let prior = Some(LogPrior { mean: trend_disp.ln(), var: prior_var });
    // Start from the trend when the gene-wise estimate is far below it
    let start = if gene_disp > 0.1 * trend_disp { gene_disp } else { trend_disp };

    let search = line_search(counts, design, mu, start, max_disp, prior, params);
    let estimate = if search.converged {
        search.log_alpha.exp()
    } else {
        grid_search(counts, design, mu, params.min_disp, max_disp, prior)
    };
    estimate.clamp(params.min_disp, max_disp)
}

/// True when the gene-wise estimate lies more than `outlier_sd` prior SDs above the trend
pub fn is_dispersion_outlier(gene_disp: f64, trend_disp: f64, var_log_disp_ests: f64, outlier_sd: f64) -> bool {
    gene_disp.is_finite()
        && trend_disp.is_finite()
        && gene_disp > 0.0
        && trend_disp > 0.0
        && gene_disp.ln() - trend_disp.ln() > outlier_sd * var_log_disp_ests.sqrt()
}

/// Final dispersions: MAP for every included feature, gene-wise for upper outliers
///
/// Returns the dispersions and the outlier flags. Excluded features stay NaN.
#[allow(clippy::too_many_arguments)]
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    mu: &Array2<f64>,
    design: &DesignMatrix,
    gene_dispersions: &Array1<f64>,
    trended_dispersions: &Array1<f64>,
    prior: &DispersionPrior,
    features: &[usize],
    params: &ModelParams,
) -> Vec<(usize, f64, bool)> {
    let x = design.matrix.view();
    features
        .par_iter()
        .map(|&i| {
            let gene = gene_dispersions[i];
            let trend = trended_dispersions[i];
            if is_dispersion_outlier(gene, trend, prior.var_log_disp_ests, params.outlier_sd) {
                return (i, gene, true);
            }
            let y = counts.row(i).to_vec();
            let m = mu.row(i).to_vec();
            (i, fit_map_dispersion(&y, x, &m, gene, trend, prior.prior_var, params), false)
        })
        .collect()
}
