#![warn(missing_docs)]

//! `hactl`: poll, inspect and edit an HA cluster.

use anyhow::Result;
use clap::Parser;
use hacore_engine::cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let plain = (!cli.log_json).then(|| fmt::layer());
    let json = cli.log_json.then(|| fmt::layer().json());
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("hactl starting");
    cli.run().await
}
