//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values
///
/// Only finite p-values count as tests; the rest come back NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut padj = vec![f64::NAN; pvalues.len()];
    let mut order: Vec<usize> = (0..pvalues.len())
        .filter(|&i| pvalues[i].is_finite())
        .collect();
    let m = order.len();
    if m == 0 {
        return padj;
    }

    // Largest p-value first so the running minimum enforces monotonicity
    order.sort_by(|&a, &b| pvalues[b].total_cmp(&pvalues[a]));
    let mut running = 1.0_f64;
    for (k, &i) in order.iter().enumerate() {
        let rank = (m - k) as f64;
        running = running.min(pvalues[i] * m as f64 / rank);
        padj[i] = running;
    }
    padj
}
