mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use rangedl::Outcome;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(crate::commands::run_download(args))?;

    Ok(match outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::PartialFailure => ExitCode::from(2),
    })
}
