// ============================================================================
// RedbStore — Embedded local-scope storage (redb)
// ============================================================================
// Durable key-value table for the admin override, mock balance, last tier
// and beta access grant.
// Default path: ~/.teagate/state.redb (override via TEAGATE_DB_PATH env var)
// ============================================================================

use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::KeyValueStore;
use crate::error::{GateError, Result};

const KV: TableDefinition<&str, &str> = TableDefinition::new("kv");

fn storage_err<E: Into<redb::Error>>(context: &'static str) -> impl FnOnce(E) -> GateError {
    move |e| GateError::Storage(format!("{}: {}", context, e.into()))
}

/// redb-backed durable store
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses TEAGATE_DB_PATH env var or ~/.teagate/state.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            p.to_path_buf()
        } else if let Ok(env_path) = std::env::var("TEAGATE_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| GateError::Storage("Cannot determine home directory".into()))?;
            let dir = home.join(".teagate");
            std::fs::create_dir_all(&dir).map_err(|e| {
                GateError::Storage(format!("Failed to create .teagate directory: {}", e))
            })?;
            dir.join("state.redb")
        };

        info!("Opening local store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(storage_err("Failed to open database"))?;

        // Reads assume the table exists
        let write_txn = db
            .begin_write()
            .map_err(storage_err("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(KV)
                .map_err(storage_err("Failed to create kv table"))?;
        }
        write_txn
            .commit()
            .map_err(storage_err("Failed to commit init"))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(storage_err("Failed to begin read"))?;
        let table = read_txn
            .open_table(KV)
            .map_err(storage_err("Failed to open kv table"))?;

        let value = table
            .get(key)
            .map_err(storage_err("Failed to get value"))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(storage_err("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(storage_err("Failed to open kv table"))?;
            table
                .insert(key, value)
                .map_err(storage_err("Failed to insert value"))?;
        }
        write_txn
            .commit()
            .map_err(storage_err("Failed to commit"))?;

        debug!("Stored local value: {}", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(storage_err("Failed to begin write"))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(storage_err("Failed to open kv table"))?;
            removed = table
                .remove(key)
                .map_err(storage_err("Failed to remove value"))?
                .is_some();
        }
        write_txn
            .commit()
            .map_err(storage_err("Failed to commit delete"))?;

        if removed {
            debug!("Removed local value: {}", key);
        }
        Ok(removed)
    }
}
