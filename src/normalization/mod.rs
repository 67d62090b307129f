//! Normalization of RNA-seq count data

mod size_factors;

pub use size_factors::{estimate_size_factors, normalize_counts, size_factors_with, SizeFactorMethod};
