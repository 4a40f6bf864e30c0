mod cli;
mod demo;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use demo::Demo;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let args = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to forward log records")?;

    info!(
        "Simulating {:?} with {} targets, {} requests of {} SG elements",
        args.family, args.targets, args.requests, args.sg_elements
    );

    Demo::new(&args)?.run(&args)
}
