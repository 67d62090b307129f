//! Outlier handling, independent filtering and threshold filtering of results

mod cooks;
mod independent;
mod threshold;

pub use cooks::{
    calculate_cooks_distance, cooks_outliers, default_cooks_cutoff, max_cooks_per_gene, replace_outliers,
    robust_method_of_moments_disp, ReplacedCounts,
};
pub use independent::{independent_filtering, IndependentFilter};
pub use threshold::{filter_results, FilteredResult};
