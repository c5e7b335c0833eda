use anyhow::Result;
use clap::Args;
use colored::*;
use std::path::PathBuf;

use xrag_eval::analytics::{reduce_run, write_document};
use xrag_eval::{Mode, RunReport};

#[derive(Args, Debug)]
pub struct ReduceArgs {
    /// Result store root written by `classify`
    #[arg(short, long)]
    pub results: PathBuf,

    #[arg(long)]
    pub mode: Mode,

    /// Statistics document to write
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn execute(args: ReduceArgs) -> Result<()> {
    let report = reduce_run(&args.results, args.mode)?;
    write_document(&args.output, &report)?;

    print_report(&report);
    println!("\n💾 Statistics written to {}", args.output.display());
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.is_empty() {
        println!("{}", "⚠️  No records found for this mode".yellow());
        return;
    }

    println!("{}", "📊 Misclassification statistics".bright_blue().bold());
    println!("| Model | Total | Reentrant | Safe | Missed reentrant | Missed safe |");
    println!("|-------|-------|-----------|------|------------------|-------------|");
    for (model, stats) in report {
        println!(
            "| {} | {} | {} | {} | {} | {} |",
            model,
            stats.total,
            stats.reentrant,
            stats.safe,
            stats.misclassified_reentrant,
            stats.misclassified_safe
        );
    }
}
