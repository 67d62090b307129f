//! Command-line interface for rust_dea

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AnalysisParams;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "rust_dea")]
#[command(version)]
#[command(about = "Differential expression analysis runs with result plots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a differential expression analysis
    #[command(
        long_about = "Run a differential expression analysis\n\n\
            Fits a negative binomial GLM on the first metadata column, tests the\n\
            contrast with a Wald test and writes results.txt, heatmap.png and\n\
            volcano.png to the output directory.",
        after_long_help = "\
Examples:
  # Two-level design, default thresholds
  rust_dea run -c counts.csv -m metadata.csv -o run1

  # Explicit contrast and stricter thresholds
  rust_dea run -c counts.csv -m metadata.csv --numerator treated \\
    --denominator control --alpha 0.01 --lfc 2

  # Parameters from a JSON file, one flag overridden
  rust_dea run -c counts.csv -m metadata.csv --config params.json --no-refit-cooks"
    )]
    Run(RunArgs),

    /// Print a results artifact
    #[command(
        long_about = "Print a results artifact\n\n\
            Shows the run parameters and the table of features passing both\n\
            thresholds, or the table alone as CSV with --csv.",
        after_long_help = "\
Examples:
  rust_dea show -i run1/results.txt
  rust_dea show -i run1/results.txt --csv > significant.csv"
    )]
    Show {
        /// Path to a results.txt artifact
        #[arg(short, long)]
        input: PathBuf,

        /// Print the table as CSV
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to count matrix CSV file
    #[arg(short, long,
        long_help = "Path to count matrix CSV file.\n\
            Format: first column = feature IDs, remaining columns = raw counts per sample.\n\
            Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
    pub counts: PathBuf,

    /// Path to sample metadata CSV file
    #[arg(short, long,
        long_help = "Path to sample metadata CSV file.\n\
            Format: first column = sample IDs (a superset of the count matrix columns),\n\
            second column = design factor, further columns = other covariates.")]
    pub metadata: PathBuf,

    /// JSON file with analysis parameters
    #[arg(long, value_name = "FILE",
        long_help = "JSON file with analysis parameters. Missing keys take their defaults;\n\
            flags given on the command line override values from the file.\n\
            Keys: refit_cooks, min_reads_per_gene, alpha_threshold, lfc_threshold,\n\
            numerator, denominator, independent_filtering.")]
    pub config: Option<PathBuf>,

    /// Output directory [default: dea_results]
    #[arg(short, long, default_value = "dea_results")]
    pub output: PathBuf,

    /// Adjusted p-value threshold [default: 0.05]
    #[arg(short, long)]
    pub alpha: Option<f64>,

    /// Absolute log2 fold change threshold [default: 1.0]
    #[arg(long)]
    pub lfc: Option<f64>,

    /// Minimum total reads per feature [default: 10]
    #[arg(long)]
    pub min_reads: Option<u64>,

    /// Numerator level for the contrast
    #[arg(long,
        long_help = "Numerator level for the contrast.\n\
            Required together with --denominator when the design factor has more\n\
            than two levels. Otherwise the second level (alphabetically) is compared\n\
            against the first.")]
    pub numerator: Option<String>,

    /// Denominator level for the contrast
    #[arg(long)]
    pub denominator: Option<String>,

    /// Do not replace Cook's outliers and refit
    #[arg(long)]
    pub no_refit_cooks: bool,

    /// Disable independent filtering (apply BH to all tested features)
    #[arg(long)]
    pub no_independent_filtering: bool,

    /// Number of threads (0 = auto) [default: 0]
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

impl RunArgs {
    /// Parameters from `--config` (or defaults) with command-line overrides applied
    pub fn analysis_params(&self) -> Result<AnalysisParams> {
        let mut params = match &self.config {
            Some(path) => AnalysisParams::from_json_file(path)?,
            None => AnalysisParams::default(),
        };
        if let Some(alpha) = self.alpha {
            params.alpha_threshold = alpha;
        }
        if let Some(lfc) = self.lfc {
            params.lfc_threshold = lfc;
        }
        if let Some(min_reads) = self.min_reads {
            params.min_reads_per_gene = min_reads;
        }
        if self.numerator.is_some() || self.denominator.is_some() {
            params.numerator = self.numerator.clone();
            params.denominator = self.denominator.clone();
        }
        if self.no_refit_cooks {
            params.refit_cooks = false;
        }
        if self.no_independent_filtering {
            params.independent_filtering = false;
        }
        params.validate()?;
        Ok(params)
    }
}
