//! Rulegate HTTP Server
//!
//! Serves compliance evaluation and rule management over HTTP.

use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rulegate::EngineArgs;
use rulegate_server::AppState;

/// Rulegate HTTP Server - compliance gate for LLM-planned commands
#[derive(Parser, Debug)]
#[command(name = "rulegate-server")]
#[command(about = "HTTP server gating LLM-planned shell commands with document-derived rules")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RULEGATE_ADDR", default_value = "127.0.0.1:8000")]
    addr: SocketAddr,

    #[command(flatten)]
    engine: EngineArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.engine.load()?;
    tracing::info!(
        rules_dir = %config.rules_dir.display(),
        backend = %config.completion.backend,
        model = %config.completion.model,
        "starting rulegate server"
    );

    let state = AppState::from_config(config);
    let shutdown = state.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    rulegate_server::run(state, args.addr).await
}
