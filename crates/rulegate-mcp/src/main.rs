//! Rulegate MCP Server
//!
//! This binary runs the rulegate compliance checks as an MCP server over
//! stdio. It exposes `check_commands` and `plan_and_check` tools so an agent
//! can filter its shell commands through the stored compliance rules.

use std::sync::Arc;

use clap::Parser;
use rmcp::ServiceExt;
use rulegate::EngineArgs;
use rulegate_mcp::RulegateServer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Rulegate MCP Server - compliance checks for agent shell commands
#[derive(Parser, Debug)]
#[command(name = "rulegate-mcp")]
struct Args {
    #[command(flatten)]
    engine: EngineArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - output to stderr so it doesn't interfere with MCP stdio
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.engine.load()?;
    tracing::info!(rules_dir = %config.rules_dir.display(), "Starting rulegate MCP server");

    let store = Arc::new(config.rule_store());
    let orchestrator = config.orchestrator(store, config.completion.build());
    let server = RulegateServer::new(Arc::new(orchestrator));

    // Serve over stdio
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP service: {}", e);
        })?;

    tracing::info!("Rulegate MCP server running");

    service.waiting().await?;

    tracing::info!("Rulegate MCP server shutting down");

    Ok(())
}
