//! In-memory config store — no persistence, matching `config/memory.py`.

use super::{ConfigHandle, ConfigStore};
use crate::error::ConfigStoreError;

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: Vec<ConfigHandle>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<Vec<ConfigHandle>, ConfigStoreError> {
        Ok(self.configs.clone())
    }

    fn persist(&mut self, config: ConfigHandle) {
        if !self.configs.contains(&config) {
            self.configs.push(config);
        }
    }

    fn remove(&mut self, config: &ConfigHandle) -> Result<(), ConfigStoreError> {
        self.configs.retain(|c| c != config);
        Ok(())
    }

    fn flush(&mut self, _config: Option<&ConfigHandle>) -> Result<(), ConfigStoreError> {
        Ok(())
    }

    fn all(&self) -> Vec<ConfigHandle> {
        self.configs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterConfig;

    #[test]
    fn persist_then_find_by_unique_id() {
        let mut store = MemoryConfigStore::new();
        let cfg = ConfigHandle::new(PrinterConfig::blank());
        let uid = cfg.unique_id();
        store.persist(cfg);

        assert!(store.by_unique_id(&uid).is_some());
        assert!(store.by_unique_id("missing").is_none());
    }

    #[test]
    fn remove_drops_config() {
        let mut store = MemoryConfigStore::new();
        let cfg = ConfigHandle::new(PrinterConfig::blank());
        store.persist(cfg.clone());
        store.remove(&cfg).unwrap();
        assert!(store.all().is_empty());
    }
}
