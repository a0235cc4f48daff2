//! # Nudge: messaging gateway
//!
//! Keeps one authenticated chat session alive, exposes a small HTTP control
//! API for sends and broadcasts, and nudges everyone who has not filed
//! their monthly activity record.
//!
//! Usage:
//!   nudge                          # Start with ~/.nudge/config.toml (or defaults)
//!   nudge --config ./nudge.toml    # Explicit config file
//!   nudge --port 8080 --verbose    # Override the listen port, debug logging
//!   nudge --print-config           # Print the effective config and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nudge_channels::{
    BridgeTransport, ConnectionManager, Dispatcher, LoopbackTransport, ReconnectPolicy,
    SqliteCredentialStore,
};
use nudge_core::NudgeConfig;
use nudge_core::config::expand_path;
use nudge_core::traits::Transport;
use nudge_scheduler::{DailySchedule, ReminderScheduler, SqliteReminderSource};

#[derive(Parser)]
#[command(
    name = "nudge",
    version,
    about = "📨 Nudge — messaging gateway with paced broadcasts and monthly reminders"
)]
struct Cli {
    /// Config file (defaults to $NUDGE_CONFIG or ~/.nudge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Control API bind address
    #[arg(long)]
    host: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "nudge=debug,nudge_channels=debug,nudge_scheduler=debug,nudge_gateway=debug,tower_http=debug"
    } else {
        "nudge=info,nudge_channels=info,nudge_scheduler=info,nudge_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => NudgeConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NudgeConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("📨 Nudge v{} starting", env!("CARGO_PKG_VERSION"));

    // Credentials
    let creds_path = expand_path(&config.credentials.path);
    let store = Arc::new(
        SqliteCredentialStore::open(&creds_path)
            .with_context(|| format!("opening credential store {}", creds_path.display()))?,
    );
    tracing::info!("💾 Credential store: {}", creds_path.display());

    // Transport + connection manager
    let transport: Arc<dyn Transport> = match config.connection.transport.as_str() {
        "loopback" => {
            tracing::warn!("⚠️ Using the loopback transport — no real messages will be delivered");
            Arc::new(LoopbackTransport::new())
        }
        "bridge" => Arc::new(BridgeTransport::from_config(&config.connection)),
        other => anyhow::bail!("unknown connection.transport {other:?} (expected \"bridge\" or \"loopback\")"),
    };
    let manager = ConnectionManager::new(
        transport,
        store,
        ReconnectPolicy::from_config(&config.connection),
    );
    let connection = manager.handle();
    manager.spawn();

    // Dispatch lane
    let (dispatcher, dispatch) = Dispatcher::new(connection.clone(), &config.dispatch);
    dispatcher.spawn();

    // Reminders
    let records_path = expand_path(&config.reminder.database_path);
    let reminders = Arc::new(ReminderScheduler::new(
        DailySchedule::from_config(&config.reminder)?,
        Arc::new(SqliteReminderSource::new(&records_path)),
        Arc::new(dispatch.clone()),
        connection.subscribe(),
        config.reminder.message.clone(),
    ));
    if config.reminder.enabled {
        tracing::info!(
            "⏰ Reminders at {:02}:{:02} {} on days {:?} (records: {})",
            config.reminder.hour,
            config.reminder.minute,
            config.reminder.timezone,
            config.reminder.days_of_month,
            records_path.display()
        );
        reminders.clone().spawn();
    } else {
        tracing::info!("⏰ Scheduled reminders disabled (manual runs still available)");
    }

    // Control API
    let api_key = nudge_gateway::resolve_api_key(&config.gateway);
    let state = nudge_gateway::AppState::new(connection, dispatch, reminders, api_key);
    nudge_gateway::start(&config.gateway, state, shutdown_signal()).await?;

    tracing::info!("👋 Nudge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown requested");
}
