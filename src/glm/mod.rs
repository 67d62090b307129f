//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use design::{create_design_matrix, DesignMatrix};
pub use fitting::{fit_single_gene, GlmFit};
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_BETA, MIN_MU};
