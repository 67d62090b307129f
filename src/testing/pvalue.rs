//! P-values from test statistics

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value of a standard normal statistic, 2 · Φ(-|z|)
///
/// Non-finite statistics give NaN.
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => 2.0 * normal.cdf(-z.abs()),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        assert!((calculate_pvalue(2.0) - calculate_pvalue(-2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_pvalue_known_values() {
        assert!((calculate_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((calculate_pvalue(1.959964) - 0.05).abs() < 1e-6);
        assert!(calculate_pvalue(f64::NAN).is_nan());
        assert!(calculate_pvalue(f64::INFINITY).is_nan());
    }
}
