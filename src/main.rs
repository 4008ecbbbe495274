//! Conduit - Resilient Tool Execution Core
//!
//! CLI entry point wiring the orchestrator, job workers, communication
//! manager and event bus.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod engine;

use engine::{Engine, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = engine::load_config()?;
    let json = config.logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit=info".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let cli = cli::Cli::parse();
    let engine = Engine::build(&config)?;

    let result = cli::run(cli, &engine).await;
    engine.shutdown().await;
    result
}
