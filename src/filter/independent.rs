//! Independent filtering on mean expression
//!
//! Features with a low base mean have little power. Adjusting only among features
//! above a base mean quantile reduces the multiple-testing burden.

use crate::stats::quantile_sorted;
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;
/// Below this many rejections no filtering is applied
const MIN_REJECTIONS: usize = 10;

/// Outcome of independent filtering
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentFilter {
    /// Adjusted p-values; NaN for features below the cutoff
    pub padj: Vec<f64>,
    /// Quantile of base means used as the cutoff
    pub theta: f64,
    /// Base mean cutoff; features with a smaller base mean are filtered
    pub cutoff: f64,
    pub rejections: usize,
}

/// BH adjustment restricted to features above the base mean quantile that maximises
/// rejections at `alpha`
///
/// Thetas are spaced evenly from the fraction of zero means up to 0.95. When no theta
/// gives more than 10 rejections, the smallest theta is used.
pub fn independent_filtering(base_means: &[f64], pvalues: &[f64], alpha: f64) -> IndependentFilter {
    let n = base_means.len();
    let mut sorted: Vec<f64> = base_means.iter().filter(|m| m.is_finite()).copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    if n == 0 || sorted.is_empty() {
        return IndependentFilter {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: f64::NEG_INFINITY,
            rejections: 0,
        };
    }

    let zeros = base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count();
    let lower = zeros as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };

    let candidates: Vec<IndependentFilter> = (0..N_THETA)
        .map(|k| {
            let theta = lower + (upper - lower) * k as f64 / (N_THETA - 1) as f64;
            let cutoff = quantile_sorted(&sorted, theta);
            let filtered: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cutoff && p.is_finite() { p } else { f64::NAN })
                .collect();
            let padj = benjamini_hochberg(&filtered);
            let rejections = padj.iter().filter(|&&p| p < alpha).count();
            IndependentFilter {
                padj,
                theta,
                cutoff,
                rejections,
            }
        })
        .collect();

    let max_rej = candidates.iter().map(|c| c.rejections).max().unwrap_or(0);
    let best = if max_rej <= MIN_REJECTIONS {
        0
    } else {
        candidates
            .iter()
            .position(|c| c.rejections == max_rej)
            .unwrap_or(0)
    };

    let chosen = candidates.into_iter().nth(best).unwrap_or_else(|| IndependentFilter {
        padj: benjamini_hochberg(pvalues),
        theta: 0.0,
        cutoff: f64::NEG_INFINITY,
        rejections: 0,
    });
    log::info!(
        "Independent filtering: theta={:.3}, cutoff={:.2}, rejections={}",
        chosen.theta,
        chosen.cutoff,
        chosen.rejections
    );
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_few_rejections_keeps_everything() {
        let base_means = vec![1.0, 10.0, 100.0, 1000.0];
        let pvalues = vec![0.5, 0.01, 0.2, 0.04];
        let result = independent_filtering(&base_means, &pvalues, 0.05);
        assert_eq!(result.theta, 0.0);
        assert_eq!(result.padj, benjamini_hochberg(&pvalues));
    }

    #[test]
    fn test_low_mean_features_filtered() {
        // 50 high-mean features with tiny p-values, 150 low-mean null features
        let mut base_means = Vec::new();
        let mut pvalues = Vec::new();
        for i in 0..150 {
            base_means.push(1.0 + i as f64 * 0.01);
            pvalues.push(0.2 + 0.8 * (i as f64 / 150.0));
        }
        for i in 0..50 {
            base_means.push(1000.0 + i as f64);
            pvalues.push(0.004);
        }

        let result = independent_filtering(&base_means, &pvalues, 0.01);
        assert!(result.theta > 0.0);
        assert!(result.padj[0].is_nan());
        assert!(result.padj[199] < 0.01);
        assert_eq!(result.rejections, 50);
        // Unfiltered BH would not reject at 0.01
        assert!(benjamini_hochberg(&pvalues)[199] > 0.01);
    }

    #[test]
    fn test_empty_input() {
        let result = independent_filtering(&[], &[], 0.1);
        assert!(result.padj.is_empty());
    }
}
