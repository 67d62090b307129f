//! rust_dea command-line interface

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::{info, LevelFilter};

use rust_dea::cli::{Cli, Commands, RunArgs};
use rust_dea::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Show { input, csv } => show(&input, csv),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn run(args: &RunArgs) -> Result<()> {
    let params = args.analysis_params()?;
    info!("Counts: {}", args.counts.display());
    info!("Metadata: {}", args.metadata.display());

    let input = AnalysisInput::new(fs::read(&args.counts)?, fs::read(&args.metadata)?, params)
        .with_names(display_name(&args.counts), display_name(&args.metadata));

    let queue = RunQueue::new(args.threads)?;
    let handle = queue.submit(input);
    queue.wait(&handle);
    let output = match queue.take(&handle) {
        Some(RunStatus::Done(output)) => output,
        Some(RunStatus::Failed(e)) => {
            return Err(Arc::try_unwrap(e).unwrap_or_else(|e| DeaError::Internal {
                reason: e.to_string(),
            }))
        }
        Some(RunStatus::Pending) | None => {
            return Err(DeaError::Internal {
                reason: "run finished without a status".to_string(),
            })
        }
    };

    fs::create_dir_all(&args.output)?;
    let results_path = args.output.join("results.txt");
    fs::write(&results_path, &output.artifact)?;
    fs::write(args.output.join("heatmap.png"), &output.heatmap_png)?;
    fs::write(args.output.join("volcano.png"), &output.volcano_png)?;

    info!("Results written to {}", results_path.display());
    info!("Plots written to {}", args.output.display());
    Ok(())
}

fn show(path: &Path, as_csv: bool) -> Result<()> {
    let text = fs::read_to_string(path)?;
    let view = parse(&text)?;

    if as_csv {
        print!("{}", view.to_csv()?);
        return Ok(());
    }

    for (key, value) in &view.scalars {
        println!("{}: {}", key, value);
    }
    println!();
    println!("{}", view.table);
    Ok(())
}
