//! JSON-file config store: a single array of config objects, rewritten
//! atomically (write to a temp file, rename over the target, keep one
//! `.bak` copy) — §6, grounded in `config/json.py`, using the same
//! `dirs` + `fs::create_dir_all` load/save style used elsewhere in this
//! crate for settings persistence.

use std::fs;
use std::path::{Path, PathBuf};

use super::{ConfigHandle, ConfigStore, PrinterConfig};
use crate::error::ConfigStoreError;
use crate::util::slugify;

pub struct JsonConfigStore {
    path: PathBuf,
    configs: Vec<ConfigHandle>,
}

impl JsonConfigStore {
    /// `name` becomes `<config-dir>/simplyprint-ws-client/<name>.json`.
    pub fn new(name: &str) -> Result<Self, ConfigStoreError> {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("simplyprint-ws-client");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(format!("{}.json", slugify(name))),
            configs: Vec::new(),
        })
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            configs: Vec::new(),
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        p.set_extension("json.bak");
        p
    }

    fn write_atomic(&self, contents: &str) -> Result<(), ConfigStoreError> {
        let tmp = tmp_path(&self.path);

        if self.path.exists() {
            let _ = fs::copy(&self.path, self.backup_path());
        }

        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "config.json.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

impl ConfigStore for JsonConfigStore {
    fn load(&mut self) -> Result<Vec<ConfigHandle>, ConfigStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let parsed: Vec<PrinterConfig> = serde_json::from_str(&content)?;
        self.configs = parsed.into_iter().map(ConfigHandle::new).collect();
        Ok(self.configs.clone())
    }

    fn persist(&mut self, config: ConfigHandle) {
        if !self.configs.contains(&config) {
            self.configs.push(config);
        }
    }

    fn remove(&mut self, config: &ConfigHandle) -> Result<(), ConfigStoreError> {
        self.configs.retain(|c| c != config);
        self.flush(None)
    }

    fn flush(&mut self, config: Option<&ConfigHandle>) -> Result<(), ConfigStoreError> {
        if let Some(config) = config {
            self.persist(config.clone());
        }

        let snapshot: Vec<PrinterConfig> = self.configs.iter().map(ConfigHandle::snapshot).collect();
        let contents = serde_json::to_string_pretty(&snapshot)?;
        self.write_atomic(&contents)
    }

    fn all(&self) -> Vec<ConfigHandle> {
        self.configs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("sp-ws-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("printers.json");

        let mut store = JsonConfigStore::at_path(&path);
        let mut cfg = PrinterConfig::blank();
        cfg.id = 7;
        cfg.token = "tok".into();
        let handle = ConfigHandle::new(cfg);
        let uid = handle.unique_id();

        store.persist(handle);
        store.flush(None).unwrap();

        let mut reloaded = JsonConfigStore::at_path(&path);
        let loaded = reloaded.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].unique_id(), uid);
        assert_eq!(loaded[0].snapshot().id, 7);

        fs::remove_dir_all(&dir).ok();
    }
}
