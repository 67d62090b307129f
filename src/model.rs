//! Negative binomial model fitting for a prepared dataset
//!
//! Runs size factors, dispersion estimation, the per-feature GLM and Cook's distance
//! diagnostics, with optional outlier replacement and refitting.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::ModelParams;
use crate::data::PreparedData;
use crate::dispersion::{
    estimate_dispersion_gene, estimate_dispersions, fit_map_dispersion, is_dispersion_outlier,
    DispersionPrior, DispersionTrend,
};
use crate::error::{DeaError, Result};
use crate::filter::{
    calculate_cooks_distance, default_cooks_cutoff, max_cooks_per_gene, replace_outliers,
    robust_method_of_moments_disp,
};
use crate::glm::{create_design_matrix, fit_single_gene, DesignMatrix, GlmFit};
use crate::normalization::{estimate_size_factors, normalize_counts, SizeFactorMethod};

/// Minimum replicates in a level for its samples to count in Cook's filtering
pub const MIN_REPLICATES_FOR_COOKS: usize = 3;

/// Everything the tester and the plots need from a fit
///
/// Per-feature vectors are indexed like `feature_ids`. Excluded features carry NaN
/// dispersions, coefficients and Cook's distances.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub design: DesignMatrix,
    pub size_factors: Array1<f64>,
    pub size_factor_method: SizeFactorMethod,
    /// Mean of normalized counts (after outlier replacement for refitted features)
    pub base_mean: Array1<f64>,
    /// False for features with identical counts in every sample
    pub included: Vec<bool>,
    pub gene_wise_dispersions: Array1<f64>,
    pub trended_dispersions: Array1<f64>,
    /// Dispersions used for the GLM
    pub dispersions: Array1<f64>,
    pub dispersion_outliers: Vec<bool>,
    pub trend: Option<DispersionTrend>,
    pub prior: Option<DispersionPrior>,
    /// Features x coefficients, natural-log scale
    pub coefficients: Array2<f64>,
    pub covariances: Vec<Array2<f64>>,
    pub converged: Vec<bool>,
    /// Raw counts as supplied (features x samples)
    pub counts: Array2<f64>,
    /// Cook's distances (features x samples); NaN for replaced cells
    pub cooks: Array2<f64>,
    /// Largest Cook's distance and its sample, over samples in levels with >= 3 replicates
    pub max_cooks: Vec<(f64, usize)>,
    pub cooks_cutoff: f64,
    pub refitted: Vec<bool>,
    pub replaced: Array2<bool>,
    /// Normalized counts, samples x features
    pub normalized_counts: Array2<f64>,
    /// ln(1 + normalized counts), samples x features
    pub log1p_counts: Array2<f64>,
}

impl FittedModel {
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_included(&self) -> usize {
        self.included.iter().filter(|&&i| i).count()
    }

    /// Number of features whose counts were replaced and refitted
    pub fn n_refitted(&self) -> usize {
        self.refitted.iter().filter(|&&r| r).count()
    }
}

/// Per-feature GLM results gathered into matrices
struct GlmBatch {
    coefficients: Array2<f64>,
    covariances: Vec<Array2<f64>>,
    converged: Vec<bool>,
    mu: Array2<f64>,
    hat: Array2<f64>,
}

impl GlmBatch {
    fn empty(n_features: usize, n_samples: usize, n_coefs: usize) -> Self {
        Self {
            coefficients: Array2::from_elem((n_features, n_coefs), f64::NAN),
            covariances: vec![Array2::from_elem((n_coefs, n_coefs), f64::NAN); n_features],
            converged: vec![false; n_features],
            mu: Array2::zeros((n_features, n_samples)),
            hat: Array2::from_elem((n_features, n_samples), f64::NAN),
        }
    }

    fn store(&mut self, i: usize, fit: GlmFit) {
        self.coefficients.row_mut(i).assign(&fit.coefficients);
        self.mu.row_mut(i).assign(&Array1::from(fit.mu));
        self.hat.row_mut(i).assign(&Array1::from(fit.hat_diagonals));
        self.converged[i] = fit.converged;
        self.covariances[i] = fit.covariance;
    }
}

fn fit_glms(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &DesignMatrix,
    dispersions: &Array1<f64>,
    features: &[usize],
    params: &ModelParams,
) -> Vec<(usize, GlmFit)> {
    let x = design.matrix.view();
    let sf = size_factors.view();
    features
        .par_iter()
        .map(|&i| (i, fit_single_gene(counts.row(i), x, sf, dispersions[i], params)))
        .collect()
}

fn row_means(matrix: &Array2<f64>) -> Array1<f64> {
    matrix
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(matrix.nrows()))
}

/// Cook's distances from the current counts and fit
fn cooks_for(
    counts: &Array2<f64>,
    size_factors: &Array1<f64>,
    design: &DesignMatrix,
    glm: &GlmBatch,
) -> Array2<f64> {
    let normalized = normalize_counts(counts.view(), size_factors);
    let robust = robust_method_of_moments_disp(normalized.view(), design);
    calculate_cooks_distance(counts.view(), &glm.mu, &glm.hat, &robust, design.n_coefs())
}

/// Fit the model `~ design_factor` to prepared (samples-by-rows) counts
pub fn fit_model(data: &PreparedData, params: &ModelParams, refit_cooks: bool) -> Result<FittedModel> {
    params.validate()?;
    let design = create_design_matrix(&data.metadata)?;

    let counts = data.counts.features_by_samples().to_owned();
    let (n_features, n_samples) = counts.dim();
    if n_features == 0 {
        return Err(DeaError::EmptyDataset {
            reason: "no features to fit".to_string(),
        });
    }
    if n_samples != design.n_samples() {
        return Err(DeaError::model_fit(format!(
            "count matrix has {} samples but the design has {}",
            n_samples,
            design.n_samples()
        )));
    }

    log::info!("Estimating size factors");
    let (size_factors, size_factor_method) = estimate_size_factors(counts.view())?;
    log::debug!("Size factors ({:?}): {:?}", size_factor_method, size_factors.to_vec());

    let normalized = normalize_counts(counts.view(), &size_factors);
    let mut base_mean = row_means(&normalized);

    let included: Vec<bool> = counts
        .rows()
        .into_iter()
        .map(|row| row.iter().any(|&c| c != row[0]))
        .collect();
    let fit_idx: Vec<usize> = (0..n_features).filter(|&i| included[i]).collect();
    if fit_idx.len() < n_features {
        log::info!(
            "{} features have identical counts in every sample and are not tested",
            n_features - fit_idx.len()
        );
    }

    let mut glm = GlmBatch::empty(n_features, n_samples, design.n_coefs());
    let mut gene_wise = Array1::from_elem(n_features, f64::NAN);
    let mut trended = Array1::from_elem(n_features, f64::NAN);
    let mut dispersions = Array1::from_elem(n_features, f64::NAN);
    let mut dispersion_outliers = vec![false; n_features];
    let mut trend = None;
    let mut prior = None;

    if fit_idx.is_empty() {
        log::warn!("No feature varies across samples; skipping model fitting");
    } else {
        let estimates = estimate_dispersions(counts.view(), &size_factors, &base_mean, &design, &included, params)?;

        log::info!("Fitting negative binomial GLMs");
        for (i, fit) in fit_glms(
            counts.view(),
            &size_factors,
            &design,
            &estimates.final_dispersions,
            &fit_idx,
            params,
        ) {
            glm.store(i, fit);
        }

        gene_wise = estimates.gene_wise;
        trended = estimates.trended;
        dispersions = estimates.final_dispersions;
        dispersion_outliers = estimates.outliers;
        trend = Some(estimates.trend);
        prior = Some(estimates.prior);
    }

    let not_converged = fit_idx.iter().filter(|&&i| !glm.converged[i]).count();
    if not_converged > 0 {
        log::warn!("{} features did not converge in the GLM fit", not_converged);
    }

    log::info!("Calculating Cook's distances");
    let mut cooks = cooks_for(&counts, &size_factors, &design, &glm);
    let cooks_cutoff = default_cooks_cutoff(n_samples, design.n_coefs(), params.cooks_quantile);
    log::debug!("Cook's distance cutoff: {:.4}", cooks_cutoff);

    let mut refitted = vec![false; n_features];
    let mut replaced = Array2::from_elem((n_features, n_samples), false);

    let replaceable: Vec<bool> = design
        .replicates_per_sample()
        .iter()
        .map(|&n| n >= params.min_replicates_for_replace)
        .collect();

    if let (true, true, Some(trend), Some(prior)) = (refit_cooks, replaceable.contains(&true), trend, prior) {
        let replacement = replace_outliers(
            counts.view(),
            &size_factors,
            &cooks,
            cooks_cutoff,
            &replaceable,
            params.trim,
        );

        if !replacement.features.is_empty() {
            log::info!(
                "Replacing outliers and refitting {} features",
                replacement.features.len()
            );
            let new_counts = replacement.counts;
            let new_base_mean = row_means(&normalize_counts(new_counts.view(), &size_factors));
            let refits = refit_features(
                new_counts.view(),
                &size_factors,
                &new_base_mean,
                &design,
                &trend,
                &prior,
                &replacement.features,
                params,
            );

            for (i, refit) in refits {
                gene_wise[i] = refit.gene_wise;
                trended[i] = refit.trended;
                dispersions[i] = refit.dispersion;
                dispersion_outliers[i] = refit.outlier;
                base_mean[i] = new_base_mean[i];
                glm.store(i, refit.glm);
                refitted[i] = true;
            }

            cooks = cooks_for(&new_counts, &size_factors, &design, &glm);
            replaced = replacement.replaced;
        }
    }

    for ((i, j), &was_replaced) in replaced.indexed_iter() {
        if was_replaced {
            cooks[[i, j]] = f64::NAN;
        }
    }

    let cooks_samples: Vec<bool> = design
        .replicates_per_sample()
        .iter()
        .map(|&n| n >= MIN_REPLICATES_FOR_COOKS)
        .collect();
    let max_cooks = max_cooks_per_gene(&cooks, &cooks_samples);

    let normalized_counts = normalized.t().to_owned();
    let log1p_counts = normalized_counts.mapv(f64::ln_1p);

    Ok(FittedModel {
        feature_ids: data.counts.feature_ids().to_vec(),
        sample_ids: data.counts.sample_ids().to_vec(),
        design,
        size_factors,
        size_factor_method,
        base_mean,
        included,
        gene_wise_dispersions: gene_wise,
        trended_dispersions: trended,
        dispersions,
        dispersion_outliers,
        trend,
        prior,
        coefficients: glm.coefficients,
        covariances: glm.covariances,
        converged: glm.converged,
        counts,
        cooks,
        max_cooks,
        cooks_cutoff,
        refitted,
        replaced,
        normalized_counts,
        log1p_counts,
    })
}

struct Refit {
    gene_wise: f64,
    trended: f64,
    dispersion: f64,
    outlier: bool,
    glm: GlmFit,
}

/// Gene-wise dispersion, MAP shrinkage against the original trend and prior, then GLM
#[allow(clippy::too_many_arguments)]
fn refit_features(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    base_mean: &Array1<f64>,
    design: &DesignMatrix,
    trend: &DispersionTrend,
    prior: &DispersionPrior,
    features: &[usize],
    params: &ModelParams,
) -> Vec<(usize, Refit)> {
    let sf: Vec<f64> = size_factors.to_vec();
    let xim = sf.iter().map(|&s| 1.0 / s).sum::<f64>() / sf.len() as f64;
    let x = design.matrix.view();

    features
        .par_iter()
        .map(|&i| {
            let y = counts.row(i).to_vec();
            let gene = estimate_dispersion_gene(&y, &sf, design, xim, params);
            let trended = trend.evaluate(base_mean[i]);
            let outlier =
                is_dispersion_outlier(gene.dispersion, trended, prior.var_log_disp_ests, params.outlier_sd);
            let dispersion = if outlier {
                gene.dispersion
            } else {
                fit_map_dispersion(&y, x, &gene.mu, gene.dispersion, trended, prior.prior_var, params)
            };
            let glm = fit_single_gene(counts.row(i), x, size_factors.view(), dispersion, params);
            (
                i,
                Refit {
                    gene_wise: gene.dispersion,
                    trended,
                    dispersion,
                    outlier,
                    glm,
                },
            )
        })
        .collect()
}
