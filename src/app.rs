//! `App`: wires a [`ConfigStore`] and a [`Scheduler`] together from CLI/env
//! input and owns the process's graceful-shutdown wiring (§4.9, §5, §10.3).
//!
//! `App::new` builds an `App` from parsed `Args` before entering the event
//! loop, the way a CLI agent's entry point typically does, adapted here for
//! a headless scheduler instead of an interactive terminal UI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::{self, Backend};
use crate::config::{ConfigHandle, ConfigStore, JsonConfigStore, PrinterConfig, SqliteConfigStore};
use crate::connection::ConnectionMode;
use crate::scheduler::Scheduler;

/// Which on-disk format persists printer configs (§4.9, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
}

/// Resolved settings `App::new` needs; `main.rs` builds this from `Args`.
pub struct AppConfig {
    pub config_dir: PathBuf,
    pub store_kind: StoreKind,
    pub mode: ConnectionMode,
    pub backend: Backend,
    pub tick_rate: Duration,
    pub reset: bool,
}

/// Owns the scheduler (and, through it, the config store) and exposes the
/// lifecycle the binary entry point drives: construct, run, shut down.
pub struct App {
    scheduler: Scheduler,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        backend::set_active_backend(config.backend);

        std::fs::create_dir_all(&config.config_dir)
            .with_context(|| format!("failed to create config directory {:?}", config.config_dir))?;

        if config.reset {
            Self::reset_store(&config)?;
        }

        let store: Box<dyn ConfigStore> = match config.store_kind {
            StoreKind::Json => {
                Box::new(JsonConfigStore::at_path(config.config_dir.join("printers.json")))
            }
            StoreKind::Sqlite => Box::new(
                SqliteConfigStore::open(config.config_dir.join("printers.db"))
                    .context("failed to open the sqlite config store")?,
            ),
        };

        let report_dir = config.config_dir.join("connectivity_reports");
        let mut scheduler = Scheduler::new(store, config.mode, config.tick_rate, report_dir)
            .context("failed to load persisted printer configs")?;

        if scheduler.client_ids().is_empty() {
            info!("no printers configured yet, registering a blank pending printer");
            scheduler.submit(ConfigHandle::new(PrinterConfig::blank()));
        }

        Ok(Self { scheduler })
    }

    fn reset_store(config: &AppConfig) -> Result<()> {
        let path = match config.store_kind {
            StoreKind::Json => config.config_dir.join("printers.json"),
            StoreKind::Sqlite => config.config_dir.join("printers.db"),
        };
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("failed to remove {path:?}"))?;
        }
        Ok(())
    }

    /// The `unique_id` of every client currently registered, for diagnostics
    /// and tests.
    pub fn client_ids(&self) -> Vec<String> {
        self.scheduler.client_ids()
    }

    /// Runs the scheduler until `shutdown` is cancelled, then drains it
    /// through its own teardown (disconnecting every connection).
    pub async fn run(self, shutdown: CancellationToken) {
        let token = self.scheduler.cancellation_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            token.cancel();
        });
        self.scheduler.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: PathBuf) -> AppConfig {
        AppConfig {
            config_dir: dir,
            store_kind: StoreKind::Json,
            mode: ConnectionMode::Single,
            backend: Backend::Test,
            tick_rate: Duration::from_millis(50),
            reset: false,
        }
    }

    #[test]
    fn new_app_seeds_a_blank_pending_printer() {
        let dir = std::env::temp_dir().join(format!("sp-app-test-{}", uuid::Uuid::new_v4()));
        let app = App::new(test_config(dir.clone())).unwrap();
        assert_eq!(app.client_ids().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reset_removes_existing_store_file() {
        let dir = std::env::temp_dir().join(format!("sp-app-reset-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("printers.json"), "[]").unwrap();

        let mut config = test_config(dir.clone());
        config.reset = true;
        let _app = App::new(config).unwrap();
        assert!(!dir.join("printers.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
