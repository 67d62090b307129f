//! Wald test for differential expression

use std::f64::consts::LN_2;

use super::fdr::benjamini_hochberg;
use super::pvalue::calculate_pvalue;
use super::results::{Contrast, ResultRow, StatResult};
use crate::error::{DeaError, Result};
use crate::filter::{cooks_outliers, independent_filtering};
use crate::glm::DesignMatrix;
use crate::model::FittedModel;

/// Pick the numerator and denominator levels of the design factor
///
/// An explicit pair must name two distinct levels of the factor. Without one, a
/// two-level factor compares the second level against the reference; more levels are
/// ambiguous.
pub fn resolve_contrast(
    design: &DesignMatrix,
    numerator: Option<&str>,
    denominator: Option<&str>,
) -> Result<Contrast> {
    let (numerator, denominator) = match (numerator, denominator) {
        (Some(num), Some(den)) => {
            if num == den {
                return Err(DeaError::invalid(format!(
                    "numerator and denominator are both '{}'",
                    num
                )));
            }
            for level in [num, den] {
                if !design.levels.iter().any(|l| l == level) {
                    return Err(DeaError::invalid(format!(
                        "level '{}' not found in design factor '{}' (levels: {})",
                        level,
                        design.factor,
                        design.levels.join(", ")
                    )));
                }
            }
            (num.to_string(), den.to_string())
        }
        (None, None) => {
            if design.levels.len() != 2 {
                return Err(DeaError::AmbiguousContrast {
                    factor: design.factor.clone(),
                    levels: design.levels.clone(),
                });
            }
            (design.levels[1].clone(), design.levels[0].clone())
        }
        _ => {
            return Err(DeaError::invalid(
                "a contrast needs both a numerator and a denominator",
            ))
        }
    };

    Ok(Contrast {
        variable: design.factor.clone(),
        numerator,
        denominator,
    })
}

/// Wald test of one contrast over every feature of a fitted model
///
/// lfc = cᵀβ / ln 2, lfcSE = √(cᵀΣc) / ln 2, stat = cᵀβ / √(cᵀΣc), two-sided normal
/// p-values. Cook's outliers lose their p-value. Adjusted p-values use BH, optionally
/// restricted by independent filtering at `alpha`.
pub fn wald_test(
    model: &FittedModel,
    contrast: &Contrast,
    alpha: f64,
    independent: bool,
) -> Result<StatResult> {
    if contrast.variable != model.design.factor {
        return Err(DeaError::invalid(format!(
            "contrast variable '{}' is not the design factor '{}'",
            contrast.variable, model.design.factor
        )));
    }
    let c = model.design.contrast_vector(&contrast.numerator, &contrast.denominator)?;

    let two_level = model.design.levels.len() == 2;
    let outliers = cooks_outliers(
        &model.max_cooks,
        model.counts.view(),
        model.cooks_cutoff,
        two_level,
    );

    let mut rows: Vec<ResultRow> = (0..model.n_features())
        .map(|i| {
            let id = model.feature_ids[i].clone();
            let base_mean = model.base_mean[i];
            if !model.included[i] {
                return ResultRow::untested(id, base_mean);
            }

            let beta = model.coefficients.row(i);
            let effect = c.dot(&beta);
            let variance = c.dot(&model.covariances[i].dot(&c));
            let se = if variance > 0.0 { variance.sqrt() } else { f64::NAN };
            let stat = effect / se;
            let pvalue = if outliers[i] { f64::NAN } else { calculate_pvalue(stat) };

            ResultRow {
                feature_id: id,
                base_mean,
                log2_fold_change: effect / LN_2,
                lfc_se: se / LN_2,
                stat,
                pvalue,
                padj: f64::NAN,
            }
        })
        .collect();

    let n_outliers = outliers.iter().filter(|&&o| o).count();
    if n_outliers > 0 {
        log::info!("{} features flagged as Cook's distance outliers", n_outliers);
    }

    let pvalues: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
    let (padj, filter_cutoff) = if independent {
        let base_means: Vec<f64> = rows.iter().map(|r| r.base_mean).collect();
        let filtered = independent_filtering(&base_means, &pvalues, alpha);
        (filtered.padj, Some(filtered.cutoff))
    } else {
        (benjamini_hochberg(&pvalues), None)
    };
    for (row, p) in rows.iter_mut().zip(padj) {
        row.padj = p;
    }

    Ok(StatResult {
        contrast: contrast.clone(),
        rows,
        cooks_outliers: outliers,
        filter_cutoff,
    })
}
