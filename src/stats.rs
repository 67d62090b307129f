//! Statistical utility functions shared across modules

use std::cmp::Ordering;

fn sort_finite(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

/// Median of a slice; NaN when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sort_finite(&mut sorted);
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Squared median absolute deviation, scaled by 1.4826 for consistency with the normal SD
pub fn mad_squared(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let center = median(values);
    let abs_devs: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    let mad = median(&abs_devs) * 1.4826;
    mad * mad
}

/// Mean after removing `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sort_finite(&mut sorted);
    let n = sorted.len();
    let k = ((n as f64) * trim).floor() as usize;
    let kept = &sorted[k.min(n / 2)..n - k.min(n / 2)];
    if kept.is_empty() {
        return median(values);
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample quantile with linear interpolation (type 7) over an already sorted slice
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Mean and sample variance (n - 1 denominator)
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, var)
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    if x >= 8.0 {
        let x2 = x * x;
        return 1.0 / x + 0.5 / x2 + 1.0 / (6.0 * x2 * x) - 1.0 / (30.0 * x2 * x2 * x)
            + 1.0 / (42.0 * x2 * x2 * x2 * x);
    }

    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    result + trigamma(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_mad_squared() {
        // deviations from median 3: 2,1,0,1,2 -> MAD 1
        let mad2 = mad_squared(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((mad2 - 1.4826 * 1.4826).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        // floor(5 * 0.2) = 1 value trimmed from each end
        assert_eq!(trimmed_mean(&values, 0.2), 3.0);
        assert_eq!(trimmed_mean(&values, 0.0), 22.0);
    }

    #[test]
    fn test_quantile_type7() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(quantile_sorted(&sorted, 1.0), 4.0);
        assert!((quantile_sorted(&sorted, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma() {
        let t1 = trigamma(1.0);
        assert!((t1 - std::f64::consts::PI.powi(2) / 6.0).abs() < 1e-6);

        let t2 = trigamma(2.0);
        assert!((t2 - (std::f64::consts::PI.powi(2) / 6.0 - 1.0)).abs() < 1e-6);
    }
}
