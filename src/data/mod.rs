//! Count and sample data structures

mod count_matrix;
pub(crate) mod metadata;
mod preprocess;

pub use count_matrix::{CountMatrix, Orientation};
pub use metadata::{is_missing, Covariate, CovariateKind, SampleMetadata};
pub use preprocess::{preprocess, PreparedData};
