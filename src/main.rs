use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use tandem_engine::RelayLimits;
use tandem_server::ServerConfig;
use tandem_settings::{LogLevel, TandemSettings};
use tandem_store::SqliteStore;
use tandem_telemetry::TelemetryConfig;

/// One-to-one realtime chat server.
#[derive(Debug, Parser)]
#[command(name = "tandem", version)]
struct Args {
    /// Settings file (defaults to ~/.tandem/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long, short)]
    port: Option<u16>,
    /// SQLite database file.
    #[arg(long)]
    db_path: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => tandem_settings::load_settings_from_path(path),
        None => tandem_settings::load_settings(),
    }
    .context("failed to load settings")?;
    apply_cli_overrides(&mut settings, &args)?;
    settings.validate().context("invalid settings")?;

    tandem_telemetry::init_telemetry(&telemetry_config(&settings))
        .context("failed to initialize logging")?;

    tracing::info!("Starting Tandem server");

    let db_path = settings.store.resolved_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "Database opened");

    let handle = tandem_server::start(server_config(&settings), Arc::new(store))
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "Tandem server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown();
    Ok(())
}

fn apply_cli_overrides(settings: &mut TandemSettings, args: &Args) -> anyhow::Result<()> {
    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(path) = &args.db_path {
        settings.store.path = path.clone();
    }
    if let Some(level) = &args.log_level {
        settings.logging.level =
            LogLevel::parse(level).with_context(|| format!("unknown log level: {level}"))?;
    }
    Ok(())
}

fn to_tracing_level(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Trace => tracing::Level::TRACE,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

fn telemetry_config(settings: &TandemSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: to_tracing_level(settings.logging.level),
        module_levels: settings
            .logging
            .module_levels
            .iter()
            .map(|(module, level)| (module.clone(), to_tracing_level(*level)))
            .collect(),
        json: settings.logging.json,
    }
}

fn server_config(settings: &TandemSettings) -> ServerConfig {
    let server = &settings.server;
    let chat = &settings.chat;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_send_queue: server.max_send_queue,
        heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
        client_timeout: Duration::from_secs(server.client_timeout_secs),
        join_timeout: Duration::from_secs(server.join_timeout_secs),
        relay: RelayLimits {
            max_message_length: chat.max_message_length,
            default_page_size: chat.default_page_size,
            max_page_size: chat.max_page_size,
        },
        recent_messages_limit: chat.recent_messages_limit,
        disconnect_grace: Duration::from_secs(chat.disconnect_grace_secs),
        ..ServerConfig::default()
    }
}
