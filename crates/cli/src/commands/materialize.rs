use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::path::PathBuf;

use xrag_eval::analytics::read_document;
use xrag_eval::report::TableFormat;
use xrag_eval::{ComparisonResult, ExplanationSources, Mode, ReportMaterializer, ReviewTable};

#[derive(Args, Debug)]
pub struct MaterializeArgs {
    /// Comparison document written by `compare`
    #[arg(long)]
    pub comparison: PathBuf,

    #[arg(long)]
    pub baseline_results: PathBuf,

    #[arg(long)]
    pub baseline_mode: Mode,

    #[arg(long)]
    pub comparison_results: PathBuf,

    #[arg(long)]
    pub comparison_mode: Mode,

    /// Dataset root the source code is read from
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long, default_value = "source")]
    pub source_representation: String,

    /// Directory receiving one JSON file per contract
    #[arg(short, long)]
    pub output: PathBuf,

    /// Review table; `.json` writes JSON, anything else Markdown
    #[arg(long)]
    pub table: Option<PathBuf>,
}

pub fn execute(args: MaterializeArgs) -> Result<()> {
    let comparison: ComparisonResult = read_document(&args.comparison)?;

    let materializer = ReportMaterializer::new(ExplanationSources {
        baseline_results: args.baseline_results,
        baseline_mode: args.baseline_mode,
        comparison_results: args.comparison_results,
        comparison_mode: args.comparison_mode,
        dataset_root: args.dataset,
        source_representation: args.source_representation,
    });

    let entries = materializer.materialize(&comparison);
    let written = materializer.write_entries(&entries, &args.output);

    println!(
        "{}",
        format!("📝 {} contracts misclassified by both runs", entries.len())
            .bright_blue()
            .bold()
    );
    if written.len() < entries.len() {
        println!(
            "{}",
            format!("⚠️  {} entries could not be written", entries.len() - written.len()).yellow()
        );
    }
    println!("💾 Review entries in {}", args.output.display());

    if let Some(path) = &args.table {
        let table = ReviewTable::from_entries(&entries);
        let rendered = table.render(TableFormat::from_extension(path))?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write review table {}", path.display()))?;
        println!("📋 Review table in {}", path.display());
    }

    Ok(())
}
