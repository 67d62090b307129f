//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions, max_dispersion, GeneDispersion};
pub use map::{
    estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, is_dispersion_outlier,
    DispersionPrior,
};
pub use trend::{fit_dispersion_trend, DispersionTrend};

use ndarray::{Array1, Array2, ArrayView2};

use crate::config::ModelParams;
use crate::error::Result;
use crate::glm::DesignMatrix;

/// All dispersion quantities of a fit, indexed by feature
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    /// MAP estimate, or the gene-wise one for upper outliers
    pub final_dispersions: Array1<f64>,
    pub outliers: Vec<bool>,
    pub trend: DispersionTrend,
    pub prior: DispersionPrior,
    /// Means used for the gene-wise fit (features x samples)
    pub mu: Array2<f64>,
}

/// Gene-wise estimates, trend, prior and MAP shrinkage for the included features
///
/// `counts` is features x samples; `base_means` are normalized means per feature.
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    base_means: &Array1<f64>,
    design: &DesignMatrix,
    included: &[bool],
    params: &ModelParams,
) -> Result<DispersionEstimates> {
    let n_features = counts.nrows();

    log::info!("Estimating gene-wise dispersions");
    let (gene_wise, mu) = estimate_gene_dispersions(counts, size_factors, design, included, params);

    log::info!("Fitting dispersion trend");
    let fit_idx: Vec<usize> = (0..n_features).filter(|&i| included[i]).collect();
    let means: Vec<f64> = fit_idx.iter().map(|&i| base_means[i]).collect();
    let disps: Vec<f64> = fit_idx.iter().map(|&i| gene_wise[i]).collect();
    let trend = fit_dispersion_trend(&means, &disps, params.min_disp)?;

    let trended = Array1::from_iter((0..n_features).map(|i| {
        if included[i] {
            trend.evaluate(base_means[i])
        } else {
            f64::NAN
        }
    }));

    let fitted_gene: Vec<f64> = fit_idx.iter().map(|&i| gene_wise[i]).collect();
    let fitted_trend: Vec<f64> = fit_idx.iter().map(|&i| trended[i]).collect();
    let prior = estimate_prior_variance(
        &fitted_gene,
        &fitted_trend,
        design.n_samples(),
        design.n_coefs(),
        params.min_disp,
    );

    log::info!("Shrinking dispersions toward the trend");
    let mut final_dispersions = Array1::from_elem(n_features, f64::NAN);
    let mut outliers = vec![false; n_features];
    for (i, disp, outlier) in
        estimate_map_dispersions(counts, &mu, design, &gene_wise, &trended, &prior, &fit_idx, params)
    {
        final_dispersions[i] = disp;
        outliers[i] = outlier;
    }
    log::debug!(
        "{} features kept their gene-wise dispersion as upper outliers",
        outliers.iter().filter(|&&o| o).count()
    );

    Ok(DispersionEstimates {
        gene_wise,
        trended,
        final_dispersions,
        outliers,
        trend,
        prior,
        mu,
    })
}
