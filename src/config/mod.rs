//! Printer identity/config and the pluggable config-store interface (§3,
//! §4.9, §6).
//!
//! Grounded in `config/config.py` and `core/config/manager.py`, following
//! the serde + file-path conventions common to this style of agent
//! (`dirs::config_dir`, atomic rewrite).
//!
//! Config instances are compared and hashed by *identity*, not value (§9):
//! two blank configs constructed independently must never collapse into one
//! another in a `HashSet`. [`ConfigHandle`] captures this by wrapping an
//! `Arc<Mutex<PrinterConfig>>` and implementing `PartialEq`/`Hash` over the
//! `Arc`'s pointer.

pub mod json_store;
pub mod memory_store;
pub mod sqlite_store;

pub use json_store::JsonConfigStore;
pub use memory_store::MemoryConfigStore;
pub use sqlite_store::SqliteConfigStore;

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::error::ConfigStoreError;

/// Identity + credentials for one printer (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrinterConfig {
    /// Server-issued id; 0 means pending (not yet registered).
    #[serde(default)]
    pub id: i64,
    /// Server-issued auth token.
    #[serde(default)]
    pub token: String,
    /// Client-generated stable identity, survives restarts and re-pairing.
    pub unique_id: String,
    #[serde(default)]
    pub in_setup: bool,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

impl PrinterConfig {
    /// A blank, pending config: `id=0`, fresh `unique_id`, everything else
    /// unset. Mirrors `Config.get_blank()`.
    pub fn blank() -> Self {
        Self {
            id: 0,
            token: String::new(),
            unique_id: uuid::Uuid::new_v4().to_string(),
            in_setup: true,
            short_id: None,
            name: None,
            public_ip: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id == 0
    }

    /// Called on a `remove_connection`/delete notification (§7): the
    /// printer is kicked back to pending setup.
    pub fn reset_to_pending(&mut self) {
        self.id = 0;
        self.token.clear();
        self.in_setup = true;
        self.short_id = None;
    }
}

/// A shared, identity-comparable handle to a [`PrinterConfig`].
///
/// Cloning a handle shares the underlying config (mutations through one
/// clone are visible through all others); `PartialEq`/`Hash` compare the
/// `Arc`'s address so two independently-constructed blank configs are never
/// equal, matching `Config.__eq__`/`__hash__` in the original.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<Mutex<PrinterConfig>>);

impl ConfigHandle {
    pub fn new(config: PrinterConfig) -> Self {
        Self(Arc::new(Mutex::new(config)))
    }

    pub fn snapshot(&self) -> PrinterConfig {
        self.0.lock().expect("config lock poisoned").clone()
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut PrinterConfig) -> R) -> R {
        f(&mut self.0.lock().expect("config lock poisoned"))
    }

    pub fn unique_id(&self) -> String {
        self.0.lock().expect("config lock poisoned").unique_id.clone()
    }
}

/// A short, stable display name for log lines: the server-issued `id` once
/// assigned, falling back to the first 8 characters of `unique_id` while
/// still pending. Keeps multi-client logs legible without printing a full
/// UUID on every line.
///
/// Grounded in `shared/logging/client_name.py`'s `ClientName`, which wraps
/// `unique_id` for the same purpose; we don't carry its push/pop breadcrumb
/// stack since `tracing`'s span fields already give that context.
pub fn client_display_name(config: &PrinterConfig) -> String {
    if config.id != 0 {
        return config.id.to_string();
    }
    config.unique_id.chars().take(8).collect()
}

impl PartialEq for ConfigHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ConfigHandle {}

impl Hash for ConfigHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Pluggable persistence for [`PrinterConfig`]s (§4.9). Credentials are
/// looked up by `unique_id`, not `(id, token)`, because `id` can be `0`
/// during setup.
///
/// Implementations perform blocking I/O; callers on the scheduler's loop
/// thread must dispatch through `tokio::task::spawn_blocking` (§5) rather
/// than calling these directly from async code that must not block.
pub trait ConfigStore: Send {
    /// Loads all persisted configs into the in-memory set, returning them.
    fn load(&mut self) -> Result<Vec<ConfigHandle>, ConfigStoreError>;

    /// Registers `config` with the store (in-memory only; call `flush` to
    /// persist). No-ops if already registered.
    fn persist(&mut self, config: ConfigHandle);

    /// Drops `config` from the in-memory set and from storage.
    fn remove(&mut self, config: &ConfigHandle) -> Result<(), ConfigStoreError>;

    /// Writes all registered configs (or just `config`, if given) to
    /// storage.
    fn flush(&mut self, config: Option<&ConfigHandle>) -> Result<(), ConfigStoreError>;

    fn all(&self) -> Vec<ConfigHandle>;

    fn find(&self, predicate: &dyn Fn(&PrinterConfig) -> bool) -> Option<ConfigHandle> {
        self.all()
            .into_iter()
            .find(|c| predicate(&c.snapshot()))
    }

    fn by_id(&self, id: i64) -> Option<ConfigHandle> {
        self.find(&|c| c.id == id)
    }

    fn by_token(&self, token: &str) -> Option<ConfigHandle> {
        self.find(&|c| c.token == token)
    }

    fn by_unique_id(&self, unique_id: &str) -> Option<ConfigHandle> {
        self.find(&|c| c.unique_id == unique_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_configs_are_not_equal() {
        let a = ConfigHandle::new(PrinterConfig::blank());
        let b = ConfigHandle::new(PrinterConfig::blank());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn reset_to_pending_clears_credentials() {
        let mut cfg = PrinterConfig::blank();
        cfg.id = 42;
        cfg.token = "abc".into();
        cfg.short_id = Some("XYZ".into());
        cfg.in_setup = false;

        cfg.reset_to_pending();

        assert_eq!(cfg.id, 0);
        assert!(cfg.token.is_empty());
        assert!(cfg.in_setup);
        assert!(cfg.short_id.is_none());
    }
}
