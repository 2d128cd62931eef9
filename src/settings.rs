//! Process-level settings file (§10.3): backend selection, scheduler tick
//! rate, and config-store choice, persisted as TOML alongside the printer
//! config store rather than passed on every invocation.
//!
//! Generalized from "one printer's connection details" to "this agent's own
//! process defaults" (`Config::load`/`save` against `dirs::config_dir` plus
//! an atomic-ish `fs::write`) — printer identity/credentials are a separate
//! concern, handled by [`crate::config::ConfigStore`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::app::StoreKind;
use crate::backend::Backend;

const FILE_NAME: &str = "settings.toml";
const DEFAULT_TICK_RATE_SECS: u64 = 1;

/// On-disk process settings; every field is optional so a partially-filled
/// file (or none at all) still loads, with CLI flags/env vars taking
/// priority over whatever is present here (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub tick_rate_secs: Option<u64>,
    #[serde(default)]
    pub store: Option<StoreKindSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKindSetting {
    Json,
    Sqlite,
}

impl From<StoreKindSetting> for StoreKind {
    fn from(value: StoreKindSetting) -> Self {
        match value {
            StoreKindSetting::Json => StoreKind::Json,
            StoreKindSetting::Sqlite => StoreKind::Sqlite,
        }
    }
}

impl Settings {
    /// Loads `<dir>/settings.toml`, returning the default (all-`None`)
    /// settings if the file doesn't exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {path:?}"))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
        let content = toml::to_string_pretty(self).context("failed to serialize settings")?;
        fs::write(dir.join(FILE_NAME), content).with_context(|| format!("failed to write {:?}", dir.join(FILE_NAME)))
    }

    pub fn tick_rate_secs(&self) -> u64 {
        self.tick_rate_secs.unwrap_or(DEFAULT_TICK_RATE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = std::env::temp_dir().join(format!("sp-settings-missing-{}", uuid::Uuid::new_v4()));
        let settings = Settings::load(&dir).unwrap();
        assert!(settings.backend.is_none());
        assert_eq!(settings.tick_rate_secs(), DEFAULT_TICK_RATE_SECS);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("sp-settings-test-{}", uuid::Uuid::new_v4()));
        let settings = Settings {
            backend: Some(Backend::Staging),
            tick_rate_secs: Some(5),
            store: Some(StoreKindSetting::Sqlite),
        };
        settings.save(&dir).unwrap();

        let reloaded = Settings::load(&dir).unwrap();
        assert_eq!(reloaded.backend, Some(Backend::Staging));
        assert_eq!(reloaded.tick_rate_secs(), 5);
        assert_eq!(reloaded.store, Some(StoreKindSetting::Sqlite));

        let _ = fs::remove_dir_all(&dir);
    }
}
