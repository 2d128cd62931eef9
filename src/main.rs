//! CLI entry point (§10.3): parses flags, builds an [`App`], and runs it
//! until an interrupt or terminate signal triggers a graceful shutdown.
//!
//! The overall `#[tokio::main]` + `clap::Parser` shape is kept; any
//! interactive terminal setup/teardown and foreign protocol event loop are
//! replaced entirely by the scheduler started through `App::run`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use simplyprint_ws_client::app::{App, AppConfig, StoreKind};
use simplyprint_ws_client::backend::Backend;
use simplyprint_ws_client::connection::ConnectionMode;
use simplyprint_ws_client::settings::Settings;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    Single,
    Multi,
}

#[derive(Parser, Debug)]
#[command(name = "simplyprint-ws-client")]
#[command(about = "Host-side agent connecting printers to the SimplyPrint cloud")]
#[command(version)]
struct Args {
    /// Directory holding the persisted printer config store and connectivity
    /// reports. Defaults to `$XDG_CONFIG_HOME/simplyprint-ws-client`.
    #[arg(long, env = "SIMPLYPRINT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Which config store backs persisted printers. Overrides the
    /// `store` value in `settings.toml`, if any; defaults to JSON.
    #[arg(long, value_enum)]
    store: Option<StoreKindArg>,

    /// Which SimplyPrint deployment to connect to.
    #[arg(long, value_enum, env = "SIMPLYPRINT_BACKEND")]
    backend: Option<Backend>,

    /// Whether every configured printer gets its own socket (`single`) or
    /// shares one socket (`multi`), §6.
    #[arg(long, value_enum, default_value_t = ModeArg::Single)]
    mode: ModeArg,

    /// Deletes the persisted config store before starting, so every printer
    /// re-enters setup.
    #[arg(long)]
    reset: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StoreKindArg {
    Json,
    Sqlite,
}

impl From<StoreKindArg> for StoreKind {
    fn from(value: StoreKindArg) -> Self {
        match value {
            StoreKindArg::Json => StoreKind::Json,
            StoreKindArg::Sqlite => StoreKind::Sqlite,
        }
    }
}

impl From<ModeArg> for ConnectionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Single => ConnectionMode::Single,
            ModeArg::Multi => ConnectionMode::Multi,
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("simplyprint-ws-client")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);

    let settings = Settings::load(&config_dir).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load settings.toml, using defaults");
        Settings::default()
    });

    let store_kind = args
        .store
        .map(StoreKind::from)
        .unwrap_or_else(|| settings.store.map(StoreKind::from).unwrap_or(StoreKind::Json));

    let config = AppConfig {
        config_dir,
        store_kind,
        mode: args.mode.into(),
        backend: Backend::resolve(args.backend.or(settings.backend)),
        tick_rate: Duration::from_secs(settings.tick_rate_secs()),
        reset: args.reset,
    };

    let app = App::new(config).context("failed to initialize application")?;
    info!(clients = app.client_ids().len(), "agent starting");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("shutdown signal received");
        }
        signal_token.cancel();
    });

    app.run(shutdown).await;
    info!("agent stopped");
    Ok(())
}

/// Waits for Ctrl-C or, on Unix, SIGTERM — whichever arrives first.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
