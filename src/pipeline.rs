//! One differential expression run, from uploaded tables to artifact and images

use std::path::Path;

use crate::config::{AnalysisParams, ModelParams, PlotParams};
use crate::data::preprocess;
use crate::error::Result;
use crate::filter::filter_results;
use crate::io::{read_count_table, read_metadata_table, serialize, ArtifactContent};
use crate::model::fit_model;
use crate::plot::{heatmap_features, render_heatmap, render_volcano};
use crate::testing::{resolve_contrast, wald_test};

/// Owned inputs of a run
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub counts_csv: Vec<u8>,
    pub metadata_csv: Vec<u8>,
    /// Display name of the count table, recorded in the artifact
    pub counts_name: String,
    pub metadata_name: String,
    pub params: AnalysisParams,
    pub model_params: ModelParams,
    pub plot_params: PlotParams,
}

impl AnalysisInput {
    pub fn new(counts_csv: Vec<u8>, metadata_csv: Vec<u8>, params: AnalysisParams) -> Self {
        Self {
            counts_csv,
            metadata_csv,
            counts_name: "counts.csv".to_string(),
            metadata_name: "metadata.csv".to_string(),
            params,
            model_params: ModelParams::default(),
            plot_params: PlotParams::default(),
        }
    }

    pub fn with_names(mut self, counts_name: impl Into<String>, metadata_name: impl Into<String>) -> Self {
        self.counts_name = counts_name.into();
        self.metadata_name = metadata_name.into();
        self
    }
}

/// Products of a successful run
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub artifact: String,
    pub heatmap_png: Vec<u8>,
    pub volcano_png: Vec<u8>,
}

/// Last path component, or the name unchanged
fn display_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Run the full analysis
///
/// Load, preprocess, fit, test, filter, render both images and serialize the
/// artifact. Any stage error aborts the run and nothing is returned.
pub fn run_analysis(input: &AnalysisInput) -> Result<RunOutput> {
    let params = &input.params;
    params.validate()?;
    input.model_params.validate()?;
    input.plot_params.validate()?;

    let counts = read_count_table(input.counts_csv.as_slice())?;
    let metadata = read_metadata_table(input.metadata_csv.as_slice())?;
    log::info!(
        "Loaded {} features x {} samples, {} metadata rows",
        counts.n_features(),
        counts.n_samples(),
        metadata.n_samples()
    );

    let prepared = preprocess(&counts, &metadata, params.min_reads_per_gene)?;
    log::info!(
        "Preprocessed: {} features kept, design factor '{}'",
        prepared.counts.n_features(),
        prepared.design_factor
    );

    let model = fit_model(&prepared, &input.model_params, params.refit_cooks)?;
    log::info!(
        "Model fitted: {} features tested, {} refitted after outlier replacement",
        model.n_included(),
        model.n_refitted()
    );

    let contrast = resolve_contrast(
        &model.design,
        params.numerator.as_deref(),
        params.denominator.as_deref(),
    )?;
    let result = wald_test(&model, &contrast, params.alpha_threshold, params.independent_filtering)?;
    let summary = result.summary(params.alpha_threshold);
    log::info!("{}", summary);

    let filtered = filter_results(&result, params.alpha_threshold, params.lfc_threshold);

    let subset = heatmap_features(&model.feature_ids, &filtered, input.plot_params.max_heatmap_features);
    let heatmap_png = render_heatmap(model.log1p_counts.view(), &subset, &input.plot_params)?;
    let volcano_png = render_volcano(&result, &filtered, params.alpha_threshold, &input.plot_params)?;

    let content = ArtifactContent {
        counts_file: display_name(&input.counts_name),
        metadata_file: display_name(&input.metadata_name),
        refit_cooks: params.refit_cooks,
        min_reads_per_gene: params.min_reads_per_gene,
        design_factor: prepared.design_factor.clone(),
        condition_1: contrast.numerator.clone(),
        condition_2: contrast.denominator.clone(),
        alpha_thres: params.alpha_threshold,
        lfc_thres: params.lfc_threshold,
        summary,
        rows: filtered.rows,
    };

    Ok(RunOutput {
        artifact: serialize(&content),
        heatmap_png,
        volcano_png,
    })
}
