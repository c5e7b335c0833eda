use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{
    classify::ClassifyArgs, compare::CompareArgs, materialize::MaterializeArgs,
    reduce::ReduceArgs,
};

#[derive(Parser)]
#[command(name = "xrag")]
#[command(about = "Reentrancy classification runs and misclassification analytics")]
#[command(version)]
#[command(author = "XRAG Eval Team")]
struct Cli {
    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every contract of a dataset and store one record per contract
    Classify(ClassifyArgs),

    /// Reduce the stored records of one mode into per-model statistics
    Reduce(ReduceArgs),

    /// Compare the statistics of a baseline run with those of another run
    Compare(CompareArgs),

    /// Export contracts both runs misclassified for manual review
    Materialize(MaterializeArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.verbose);

    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!("Ignoring unreadable .env file: {}", e);
        }
    }

    match cli.command {
        Commands::Classify(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::classify::execute(args))
        }
        Commands::Reduce(args) => commands::reduce::execute(args),
        Commands::Compare(args) => commands::compare::execute(args),
        Commands::Materialize(args) => commands::materialize::execute(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
