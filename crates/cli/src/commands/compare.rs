use anyhow::Result;
use clap::Args;
use colored::*;
use std::path::PathBuf;

use xrag_eval::analytics::{read_document, write_document};
use xrag_eval::{compare, ComparisonResult, RunReport};

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Statistics document of the baseline run
    #[arg(short, long)]
    pub baseline: PathBuf,

    /// Statistics document of the run measured against the baseline
    #[arg(short, long)]
    pub comparison: PathBuf,

    /// Comparison document to write
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn execute(args: CompareArgs) -> Result<()> {
    let baseline: RunReport = read_document(&args.baseline)?;
    let comparison: RunReport = read_document(&args.comparison)?;

    let result = compare(&baseline, &comparison);
    write_document(&args.output, &result)?;

    print_comparison(&result);
    println!("\n💾 Comparison written to {}", args.output.display());
    Ok(())
}

fn print_comparison(result: &ComparisonResult) {
    println!("{}", "🔄 Baseline vs comparison".bright_blue().bold());
    println!("| Model | Representation | Label | Union | Both wrong | Improvement |");
    println!("|-------|----------------|-------|-------|------------|-------------|");

    for (model, representations) in result {
        for (representation, labels) in representations {
            for (label, cmp) in labels {
                let improvement = match cmp.improvement {
                    n if n > 0 => format!("+{}", n).green(),
                    n if n < 0 => n.to_string().red(),
                    n => n.to_string().normal(),
                };
                println!(
                    "| {} | {} | {} | {} | {} | {} |",
                    model,
                    representation,
                    label,
                    cmp.union.len(),
                    cmp.intersection.len(),
                    improvement
                );
            }
        }
    }
}
