//! SQLite config store: table `printers(pk INTEGER, sk TEXT, data TEXT,
//! PRIMARY KEY(pk, sk))` — §6, grounded in `core/config/sqlite.py`. `pk` is
//! the printer's `id` and `sk` its `token`; the full config is stored as a
//! JSON blob in `data` so schema changes don't require a migration.

use rusqlite::{params, Connection};

use super::{ConfigHandle, ConfigStore, PrinterConfig};
use crate::error::ConfigStoreError;

pub struct SqliteConfigStore {
    conn: Connection,
    configs: Vec<ConfigHandle>,
}

impl SqliteConfigStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigStoreError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS printers (
                pk INTEGER NOT NULL,
                sk TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (pk, sk)
            )",
            [],
        )?;
        Ok(Self {
            conn,
            configs: Vec::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, ConfigStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS printers (
                pk INTEGER NOT NULL,
                sk TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (pk, sk)
            )",
            [],
        )?;
        Ok(Self {
            conn,
            configs: Vec::new(),
        })
    }

    fn upsert(&self, config: &PrinterConfig) -> Result<(), ConfigStoreError> {
        let data = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT INTO printers (pk, sk, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(pk, sk) DO UPDATE SET data = excluded.data",
            params![config.id, config.token, data],
        )?;
        Ok(())
    }

    fn remove_detached(&self) -> Result<(), ConfigStoreError> {
        let mut stmt = self.conn.prepare("SELECT pk, sk FROM printers")?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        for (pk, sk) in rows {
            let still_present = self
                .configs
                .iter()
                .any(|c| c.snapshot().id == pk && c.snapshot().token == sk);

            if !still_present {
                self.conn
                    .execute("DELETE FROM printers WHERE pk = ?1 AND sk = ?2", params![pk, sk])?;
            }
        }

        Ok(())
    }
}

impl ConfigStore for SqliteConfigStore {
    fn load(&mut self) -> Result<Vec<ConfigHandle>, ConfigStoreError> {
        let mut stmt = self.conn.prepare("SELECT data FROM printers")?;
        let rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        self.configs = rows
            .into_iter()
            .filter_map(|data| serde_json::from_str::<PrinterConfig>(&data).ok())
            .map(ConfigHandle::new)
            .collect();

        Ok(self.configs.clone())
    }

    fn persist(&mut self, config: ConfigHandle) {
        if !self.configs.contains(&config) {
            self.configs.push(config);
        }
    }

    fn remove(&mut self, config: &ConfigHandle) -> Result<(), ConfigStoreError> {
        self.configs.retain(|c| c != config);
        self.remove_detached()
    }

    fn flush(&mut self, config: Option<&ConfigHandle>) -> Result<(), ConfigStoreError> {
        if let Some(config) = config {
            self.persist(config.clone());
            self.upsert(&config.snapshot())?;
            self.remove_detached()?;
            return Ok(());
        }

        for config in &self.configs {
            let snapshot = config.snapshot();
            // A still-blank pending config (id 0, no token) is not worth
            // persisting yet — mirrors `is_empty()` skip in the original.
            if snapshot.id == 0 && snapshot.token.is_empty() {
                continue;
            }
            self.upsert(&snapshot)?;
        }

        self.remove_detached()
    }

    fn all(&self) -> Vec<ConfigHandle> {
        self.configs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_reloads_by_pk_sk() {
        let mut store = SqliteConfigStore::open_in_memory().unwrap();
        let mut cfg = PrinterConfig::blank();
        cfg.id = 5;
        cfg.token = "secret".into();
        let handle = ConfigHandle::new(cfg);

        store.persist(handle.clone());
        store.flush(None).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].snapshot().token, "secret");
    }

    #[test]
    fn remove_detaches_row() {
        let mut store = SqliteConfigStore::open_in_memory().unwrap();
        let mut cfg = PrinterConfig::blank();
        cfg.id = 9;
        cfg.token = "t".into();
        let handle = ConfigHandle::new(cfg);
        store.persist(handle.clone());
        store.flush(None).unwrap();

        store.remove(&handle).unwrap();
        let reloaded = store.load().unwrap();
        assert!(reloaded.is_empty());
    }
}
