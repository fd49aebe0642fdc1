//! analyst-agent service entry point.
//!
//! Initializes logging, builds the pipeline from environment configuration,
//! and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use analyst_agent::llm::{Generator, LlmClient};
use analyst_agent::pipeline::{Pipeline, PipelineConfig};
use analyst_agent::server::{self, AppState};

/// Agentic data-analyst service.
#[derive(Parser, Debug)]
#[command(name = "analyst-agent", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "ANALYST_PORT")]
    port: u16,

    /// Total time budget per request, in seconds.
    #[arg(long, default_value_t = 290, env = "ANALYST_DEADLINE_SECS")]
    deadline_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with environment filter
    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let config = PipelineConfig::from_env()?;
    config.validate()?;

    let client = Arc::new(LlmClient::from_env());
    let generator = Generator::from_env(client);

    let state = AppState {
        deadline: Duration::from_secs(cli.deadline_secs),
        log_dir: config.log_dir.clone(),
        pipeline: Arc::new(Pipeline::new(config, generator)),
    };

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("analyst-agent listening on {addr}");

    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
