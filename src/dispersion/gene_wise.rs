//! Gene-wise dispersion estimation
//!
//! Maximizes the Cox-Reid adjusted profile likelihood over log α with an Armijo line
//! search, falling back to a grid search when the line search does not converge. The
//! same objective with a log-normal prior term gives the MAP estimate (see `map`).

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::config::ModelParams;
use crate::glm::linalg::{invert_symmetric, log_det_symmetric, xtwx};
use crate::glm::{DesignMatrix, MIN_MU};

/// Hard lower bound on proposed log α
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-increase constant
const ARMIJO_EPSILON: f64 = 1e-4;
const GRID_POINTS: usize = 20;

/// Log-normal prior on α: log α ~ N(mean, var)
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogPrior {
    pub mean: f64,
    pub var: f64,
}

/// Upper bound on dispersion estimates
pub fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Log-likelihood in α plus the Cox-Reid term -½ log|X'WX|, plus the prior if any
pub(crate) fn log_posterior(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let mut ll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        ll += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
        ll -= y * (m + alpha_inv).ln();
        ll -= alpha_inv * (1.0 + m * alpha).ln();
        weights.push(1.0 / (1.0 / m + alpha));
    }

    let cr = log_det_symmetric(xtwx(design, &weights).view())
        .map(|d| -0.5 * d)
        .unwrap_or(0.0);

    let prior_part = prior
        .map(|p| -0.5 * (log_alpha - p.mean).powi(2) / p.var)
        .unwrap_or(0.0);

    ll + cr + prior_part
}

/// Derivative of `log_posterior` with respect to log α
pub(crate) fn d_log_posterior(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let mut ll_sum = 0.0;
    let mut w = Vec::with_capacity(counts.len());
    let mut dw = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        ll_sum += digamma(alpha_inv) + (1.0 + m * alpha).ln() - m * alpha / (1.0 + m * alpha)
            - digamma(y + alpha_inv)
            + y / (m + alpha_inv);
        let wi = 1.0 / (1.0 / m + alpha);
        w.push(wi);
        dw.push(-wi * wi);
    }
    let ll_part = ll_sum * alpha_inv * alpha_inv;

    // d/dα of -½ log|B| = -½ tr(B⁻¹ dB)
    let b_inv = invert_symmetric(xtwx(design, &w).view());
    let db = xtwx(design, &dw);
    let trace: f64 = (0..b_inv.nrows())
        .map(|i| b_inv.row(i).dot(&db.column(i)))
        .sum();
    let cr_part = if trace.is_finite() { -0.5 * trace } else { 0.0 };

    let prior_part = prior.map(|p| -(log_alpha - p.mean) / p.var).unwrap_or(0.0);

    (ll_part + cr_part) * alpha + prior_part
}

pub(crate) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Armijo line search along the gradient of `log_posterior` in log α
pub(crate) fn line_search(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    alpha_init: f64,
    max_disp: f64,
    prior: Option<LogPrior>,
    params: &ModelParams,
) -> LineSearch {
    let min_log_alpha = (params.min_disp / 10.0).ln();

    let mut log_alpha = alpha_init.max(1e-10).ln().clamp(MIN_LOG_ALPHA_HARD, max_disp.ln());
    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;

    for iter in 0..params.disp_maxit {
        if !dlp.is_finite() {
            return LineSearch { log_alpha, initial_lp, last_lp: lp, iterations: iter + 1, converged: false };
        }

        let raw = log_alpha + kappa * dlp;
        if raw < MIN_LOG_ALPHA_HARD && dlp != 0.0 {
            kappa = (MIN_LOG_ALPHA_HARD - log_alpha) / dlp;
        }
        if raw > MAX_LOG_ALPHA_HARD && dlp != 0.0 {
            kappa = (MAX_LOG_ALPHA_HARD - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;

        let lp_new = log_posterior(counts, design, mu, proposal, prior);
        if -lp_new <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_new - lp;
            lp = lp_new;

            if change < params.disp_tol || log_alpha < min_log_alpha {
                return LineSearch { log_alpha, initial_lp, last_lp: lp, iterations: iter + 1, converged: true };
            }

            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        last_lp: lp,
        iterations: params.disp_maxit,
        converged: false,
    }
}

/// Coarse then fine grid over log α in [min_disp, max_disp]
pub(crate) fn grid_search(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<LogPrior>,
) -> f64 {
    let argmax = |grid: &[f64]| {
        grid.iter()
            .map(|&la| (la, log_posterior(counts, design, mu, la, prior)))
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(la, _)| la)
    };

    let lo = min_disp.ln();
    let hi = max_disp.ln();
    let delta = (hi - lo) / (GRID_POINTS - 1) as f64;
    let coarse: Vec<f64> = (0..GRID_POINTS).map(|i| lo + i as f64 * delta).collect();
    let best = match argmax(&coarse) {
        Some(la) => la,
        None => return min_disp,
    };

    let fine_delta = 2.0 * delta / (GRID_POINTS - 1) as f64;
    let fine: Vec<f64> = (0..GRID_POINTS)
        .map(|i| best - delta + i as f64 * fine_delta)
        .collect();
    argmax(&fine).unwrap_or(best).exp().clamp(min_disp, max_disp)
}

/// Per-sample group means of normalized counts
fn group_means(normalized: &[f64], design: &DesignMatrix) -> Vec<f64> {
    let n_levels = design.levels.len();
    let mut sums = vec![0.0; n_levels];
    let mut n = vec![0usize; n_levels];
    for (&x, &l) in normalized.iter().zip(&design.sample_levels) {
        sums[l] += x;
        n[l] += 1;
    }
    design
        .sample_levels
        .iter()
        .map(|&l| sums[l] / n[l].max(1) as f64)
        .collect()
}

/// Fitted means from the group-mean linear model, μ_j = s_j · mean of the group's normalized counts
pub(crate) fn linear_model_mu(counts: &[f64], size_factors: &[f64], design: &DesignMatrix) -> Vec<f64> {
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();
    group_means(&normalized, design)
        .iter()
        .zip(size_factors)
        .map(|(&m, &s)| (m * s).max(MIN_MU))
        .collect()
}

/// Σ((y - μ)² - μ) / μ² / (m - p) on normalized counts, floored at 0
fn rough_disp_estimate(normalized: &[f64], design: &DesignMatrix) -> f64 {
    let mu = group_means(normalized, design);
    let m = normalized.len();
    let p = design.n_coefs();
    let sum: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &mu)| {
            let mu = mu.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / (m - p) as f64).max(0.0)
}

/// (variance - xim · mean) / mean² on normalized counts
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let (mean, var) = crate::stats::mean_and_variance(normalized);
    if mean > 1e-10 {
        (var - xim * mean) / (mean * mean)
    } else {
        f64::INFINITY
    }
}

/// Gene-wise estimate together with the means it was computed with
#[derive(Debug, Clone)]
pub struct GeneDispersion {
    pub dispersion: f64,
    pub mu: Vec<f64>,
    pub converged: bool,
}

/// Estimate the dispersion of one feature
///
/// The start value is min(rough, moments) clamped to [min_disp, max_disp]. When the
/// line search does not raise the objective the start value is kept; when it does not
/// converge a grid search decides.
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &DesignMatrix,
    xim: f64,
    params: &ModelParams,
) -> GeneDispersion {
    let max_disp = max_dispersion(counts.len());
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu = linear_model_mu(counts, size_factors, design);
    let x = design.matrix.view();
    let search = line_search(counts, x, &mu, alpha_init, max_disp, None, params);

    let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut dispersion = if no_increase { alpha_init } else { search.log_alpha.exp() };

    let converged = search.converged && search.iterations != 1;
    if !converged && dispersion > params.min_disp * 10.0 {
        dispersion = grid_search(counts, x, &mu, params.min_disp, max_disp, None);
    }

    GeneDispersion {
        dispersion: dispersion.clamp(params.min_disp, max_disp),
        mu,
        converged,
    }
}

/// Gene-wise dispersions for every included feature
///
/// `counts` is features x samples. Excluded features get NaN and zero means.
pub fn estimate_gene_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &DesignMatrix,
    included: &[bool],
    params: &ModelParams,
) -> (Array1<f64>, Array2<f64>) {
    let sf: Vec<f64> = size_factors.to_vec();
    let n_samples = sf.len();
    let xim = sf.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;

    let fits: Vec<Option<GeneDispersion>> = (0..counts.nrows())
        .into_par_iter()
        .map(|i| {
            included[i].then(|| estimate_dispersion_gene(&counts.row(i).to_vec(), &sf, design, xim, params))
        })
        .collect();

    let mut dispersions = Array1::from_elem(fits.len(), f64::NAN);
    let mut mu = Array2::zeros((fits.len(), n_samples));
    let mut not_converged = 0;
    for (i, fit) in fits.into_iter().enumerate() {
        if let Some(fit) = fit {
            dispersions[i] = fit.dispersion;
            mu.row_mut(i).assign(&Array1::from(fit.mu));
            if !fit.converged {
                not_converged += 1;
            }
        }
    }
    if not_converged > 0 {
        log::debug!("{} gene-wise dispersion line searches fell back to grid search", not_converged);
    }

    (dispersions, mu)
}
