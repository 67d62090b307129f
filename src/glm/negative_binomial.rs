//! Negative binomial count model: mean, variance, likelihood, IRLS weights

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during IRLS
pub const MIN_MU: f64 = 0.5;

/// IRLS stops early once any |β| exceeds this (natural-log scale)
pub const MAX_BETA: f64 = 30.0;

/// Clamp on the linear predictor to keep exp() finite
const MAX_ETA: f64 = 700.0;

/// μ = s · exp(η)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = μ + αμ²
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// log P(Y = y) with mean μ and dispersion α (size 1/α)
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

/// IRLS working weight μ / (1 + αμ)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}
