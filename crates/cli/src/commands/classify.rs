//! Classification run over a dataset
//!
//! Resolves the model and strategy once, then hands the dataset to the analyzer.
//! Per-contract failures only show up in the summary; configuration problems
//! (unknown model, missing credentials, missing dataset) abort before any call.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use xrag_eval::{
    ContractAnalyzer, EvalConfig, ModelId, Mode, OpenAIProvider, ResultStore, RunSummary,
};

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Dataset root laid out as <representation>/<label>/<contract>
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// direct, retrieval, staged or staged-retrieval
    #[arg(long, default_value = "direct")]
    pub mode: Mode,

    /// Overrides the model from the config file and XRAG_MODEL
    #[arg(long)]
    pub model: Option<String>,

    /// Classify contracts concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Result store root
    #[arg(short, long, default_value = "results")]
    pub output: PathBuf,

    /// YAML or JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only load these data representations (repeatable)
    #[arg(long = "representation")]
    pub representations: Vec<String>,

    /// Keep existing records instead of classifying those contracts again
    #[arg(long)]
    pub skip_existing: bool,

    /// Also write the run summary as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

pub async fn execute(args: ClassifyArgs) -> Result<()> {
    let start = Instant::now();
    let config = load_config(&args)?;

    if !args.dataset.is_dir() {
        anyhow::bail!("Dataset root not found: {}", args.dataset.display());
    }

    let provider = OpenAIProvider::from_config(&config)
        .with_context(|| format!("Cannot reach {}", config.model))?;

    println!(
        "{}",
        format!("🔍 Classifying with {} ({} mode)", config.model, args.mode)
            .bright_blue()
            .bold()
    );
    println!("📁 Dataset: {}", args.dataset.display());
    println!("💾 Results: {}", args.output.display());

    let analyzer = ContractAnalyzer::new(
        config,
        args.mode,
        Arc::new(provider),
        ResultStore::new(&args.output),
    )
    .skip_existing(args.skip_existing);

    let summary = analyzer
        .analyze_path(&args.dataset, args.representations.clone(), args.parallel)
        .await?;

    print_summary(&summary);
    println!("⏱️  Time: {:.2}s", start.elapsed().as_secs_f64());

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    Ok(())
}

/// Config file, then `XRAG_*` variables, then the command line.
fn load_config(args: &ClassifyArgs) -> Result<EvalConfig> {
    let mut config = match &args.config {
        Some(path) => EvalConfig::from_file(path)?,
        None => EvalConfig::default(),
    };
    config.apply_env()?;

    if let Some(model) = &args.model {
        config.model = model.parse::<ModelId>()?;
    }
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "✅ Run complete".green().bold());
    println!("📊 Statistics:");
    println!("  • Contracts: {}", summary.total);
    println!("  • Processed: {}", summary.processed);
    if summary.already_done > 0 {
        println!("  • Already classified: {}", summary.already_done);
    }

    let skipped = summary.skipped_total();
    if skipped > 0 {
        println!("  • {}", format!("Skipped: {}", skipped).yellow());
        for (reason, count) in &summary.skipped {
            println!("      {}: {}", reason, count);
        }
    } else {
        println!("  • Skipped: 0");
    }

    match summary.accuracy() {
        Some(accuracy) => {
            let text = format!("{:.2}% ({}/{})", accuracy * 100.0, summary.correct, summary.processed);
            let text = if accuracy >= 0.8 {
                text.green()
            } else if accuracy >= 0.5 {
                text.yellow()
            } else {
                text.red()
            };
            println!("  • Accuracy: {}", text);
        }
        None => println!("  • Accuracy: n/a"),
    }

    for (label, tally) in &summary.per_label {
        println!("      {}: {}/{} correct", label, tally.correct, tally.processed);
    }

    println!(
        "  • Tokens: {} ({} prompt, {} completion)",
        summary.usage.total_tokens, summary.usage.prompt_tokens, summary.usage.completion_tokens
    );
}
