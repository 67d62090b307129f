//! rust_dea: differential expression analysis runs in Rust
//!
//! A run takes a raw count table and sample metadata, fits a DESeq2-style negative
//! binomial GLM on the first metadata column, Wald-tests one contrast, keeps the
//! features passing both thresholds and renders a text artifact plus heatmap and
//! volcano PNGs.
//!
//! # Example
//!
//! ```ignore
//! use rust_dea::prelude::*;
//!
//! let input = AnalysisInput::new(counts_csv, metadata_csv, AnalysisParams::default());
//! let output = run_analysis(&input)?;
//! let view = parse(&output.artifact)?;
//! println!("{}", view.table);
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod jobs;
pub mod model;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{AnalysisParams, ModelParams, PlotParams};
    pub use crate::data::{preprocess, CountMatrix, PreparedData, SampleMetadata};
    pub use crate::error::{DeaError, Result};
    pub use crate::filter::{filter_results, FilteredResult};
    pub use crate::io::{parse, read_count_matrix, read_metadata, serialize, ArtifactContent, ResultView};
    pub use crate::jobs::{RunHandle, RunQueue, RunStatus};
    pub use crate::model::{fit_model, FittedModel};
    pub use crate::pipeline::{run_analysis, AnalysisInput, RunOutput};
    pub use crate::plot::{render_heatmap, render_volcano};
    pub use crate::testing::{resolve_contrast, wald_test, Contrast, ResultRow, StatResult};
}
