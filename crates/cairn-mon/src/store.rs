//! Key-value store implementations
//!
//! The monitor persists maps through the [`KvStore`](crate::KvStore) trait;
//! `RedbStore` is the durable implementation, `MemStore` backs tests and
//! ephemeral deployments.

use crate::external::KvStore;
use crate::journal::{NS_FULL, NS_INCREMENTAL};
use crate::local_log::{NS_LOG, NS_LOG_META};
use cairn_common::{Error, Result};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;

const T_INCREMENTAL: TableDefinition<u64, &[u8]> = TableDefinition::new("osdmap");
const T_FULL: TableDefinition<u64, &[u8]> = TableDefinition::new("osdmap_full");
const T_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("log");
const T_LOG_META: TableDefinition<u64, &[u8]> = TableDefinition::new("log_meta");

fn table_for(namespace: &str) -> Result<TableDefinition<'static, u64, &'static [u8]>> {
    match namespace {
        NS_INCREMENTAL => Ok(T_INCREMENTAL),
        NS_FULL => Ok(T_FULL),
        NS_LOG => Ok(T_LOG),
        NS_LOG_META => Ok(T_LOG_META),
        other => Err(Error::store(format!("unknown namespace: {other}"))),
    }
}

/// Durable store backed by a single redb database file
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())
            .map_err(|e| Error::store(format!("open {}: {e}", path.as_ref().display())))?;
        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn put_bytes(&self, namespace: &str, key: u64, bytes: &[u8]) -> Result<()> {
        let table = table_for(namespace)?;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::store(e.to_string()))?;
        {
            let mut t = txn
                .open_table(table)
                .map_err(|e| Error::store(e.to_string()))?;
            t.insert(key, bytes)
                .map_err(|e| Error::store(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::store(e.to_string()))
    }

    fn get_bytes(&self, namespace: &str, key: u64) -> Result<Option<Vec<u8>>> {
        let table = table_for(namespace)?;
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::store(e.to_string()))?;
        let t = match txn.open_table(table) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(Error::store(e.to_string())),
        };
        let value = t.get(key).map_err(|e| Error::store(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

/// In-memory store for tests and ephemeral single-node runs
#[derive(Default)]
pub struct MemStore {
    entries: Mutex<HashMap<(String, u64), Vec<u8>>>,
}

impl KvStore for MemStore {
    fn put_bytes(&self, namespace: &str, key: u64, bytes: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .insert((namespace.to_string(), key), bytes.to_vec());
        Ok(())
    }

    fn get_bytes(&self, namespace: &str, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .get(&(namespace.to_string(), key))
            .cloned())
    }
}

impl MemStore {
    /// Remove an entry; tests use this to simulate store corruption.
    pub fn remove(&self, namespace: &str, key: u64) {
        self.entries.lock().remove(&(namespace.to_string(), key));
    }
}
