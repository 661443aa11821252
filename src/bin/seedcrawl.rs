use anyhow::{Context, Result};
use clap::Parser;
use seedcrawl::{runtime, Cli};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_filter.as_deref() {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter {directive:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.build_config().context("invalid configuration")?;
    let summary = runtime::run(config)?;

    info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        "batch done"
    );
    Ok(())
}
