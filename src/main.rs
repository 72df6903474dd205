//! Kolosal Ensemble - Main Entry Point
//!
//! Command-line front end for k-fold stacking and seed bagging.

use clap::Parser;
use kolosal_ensemble::cli::{cmd_bag, cmd_stack, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_ensemble=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stack { data, family, folds, groups, regression } => {
            cmd_stack(&data, family, folds, groups.as_deref(), regression)?;
        }
        Commands::Bag { data, family, rounds, regression, no_update_seed } => {
            cmd_bag(&data, family, rounds, regression, no_update_seed)?;
        }
    }

    Ok(())
}
