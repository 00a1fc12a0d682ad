use anyhow::{Context, Result};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opportunity_history::{run, PipelineConfig, VERSION};

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let config = if args.len() > 1 {
        PipelineConfig::from_file(&args[1])
            .with_context(|| format!("Failed to load config: {}", args[1]))?
    } else {
        PipelineConfig::default()
    };

    tracing::info!(version = VERSION, "starting opportunity history reconstruction");

    let report = run(&config).context("Opportunity history run failed")?;

    if report.has_failures() {
        tracing::warn!(
            failed = report.entities_failed.len(),
            "some entities were skipped; see warnings above"
        );
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opportunity_history=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
