use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cloud_logging_mcp::config::{CliArgs, Config, ServerMode};
use cloud_logging_mcp::dispatcher::Dispatcher;
use cloud_logging_mcp::http::serve_http;
use cloud_logging_mcp::mcp::run_stdio;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout carries the stdio protocol, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = CliArgs::parse();
    if let Err(e) = run(&cli).await {
        error!("fatal error, exiting: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: &CliArgs) -> anyhow::Result<()> {
    let config = Config::from_env_and_args(cli)?;
    info!(
        mode = ?config.server.mode,
        listing_failure = ?config.tools.project_listing_failure,
        "starting Google Cloud Logging MCP server"
    );

    let dispatcher = Arc::new(Dispatcher::google(config.tools.clone())?);
    match config.server.mode {
        ServerMode::Stdio => run_stdio(dispatcher).await?,
        ServerMode::Sse => serve_http(&config, dispatcher).await?,
    }
    Ok(())
}
