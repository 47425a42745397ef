use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inbox_bridge::aggregate::Aggregator;
use inbox_bridge::api::{ApiConfig, ApiServer, AppState};
use inbox_bridge::config::AppConfig;
use inbox_bridge::connectors::{
    CallRecordConnector, ChatLogConnector, Connectors, ExternalCallConnector,
    LiveMessagingConnector,
};
use inbox_bridge::routing::MessageRouter;
use inbox_bridge::store::UnifiedStore;
use inbox_bridge::sync::SyncOrchestrator;

/// Unified inbox bridge: aggregates conversations from the live messaging
/// upstream, relational chat/call logs, and the external call API behind one
/// HTTP surface.
#[derive(Debug, Parser)]
#[command(name = "inbox-bridge", version, about)]
struct Cli {
    /// Path to a configuration file (overrides the standard lookup chain)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load()?,
    };

    // Initialize logging based on config
    let log_level = config.logging.level.to_lowercase();
    let default_directive = format!("inbox_bridge={}", log_level);
    let env_override = env::var("RUST_LOG").unwrap_or_default();
    let combined_filter = if env_override.trim().is_empty() {
        default_directive.clone()
    } else if env_override.contains("inbox_bridge") {
        env_override
    } else {
        format!("{},{}", env_override, default_directive)
    };

    tracing_subscriber::fmt()
        .with_env_filter(combined_filter)
        .with_target(true)
        .init();

    let store = UnifiedStore::new(&config.database.path).context("opening unified store")?;

    let connectors = Arc::new(Connectors {
        live: LiveMessagingConnector::new(
            &config.live.endpoint,
            &config.live.access_token,
            &config.live.account_id,
        ),
        chatlog: Arc::new(
            ChatLogConnector::new(&config.chatlog.db_path).context("opening chat-log source")?,
        ),
        callrec: Arc::new(
            CallRecordConnector::new(&config.callrec.db_path)
                .context("opening call-record source")?,
        ),
        extcall: Arc::new(ExternalCallConnector::new(&config.extcall.base_url)),
    });

    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        connectors.clone(),
        Duration::from_secs(config.sync.interval_secs),
    );
    orchestrator.start().await;

    let aggregator = Arc::new(Aggregator::new(store.clone(), connectors.clone()));
    let router = Arc::new(MessageRouter::new(store.clone(), connectors.clone()));
    let state = AppState::new(aggregator, router, orchestrator.clone());

    let api_config = ApiConfig::new()
        .with_host(cli.host.unwrap_or_else(|| config.server.host.clone()))
        .with_port(cli.port.unwrap_or(config.server.port))
        .with_cors(config.server.enable_cors);

    tracing::info!("inbox-bridge listening on {}", api_config.bind_address());

    let server = ApiServer::new(api_config, state);
    server
        .run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    orchestrator.shutdown();
    store.checkpoint()?;

    Ok(())
}
