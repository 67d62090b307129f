//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod results;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use results::{Contrast, ResultRow, ResultSummary, StatResult};
pub use wald::{resolve_contrast, wald_test};
