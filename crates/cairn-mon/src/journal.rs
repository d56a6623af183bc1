//! Epoch-keyed map persistence
//!
//! Two namespaces in the external store: increments under `osdmap`, full
//! snapshots under `osdmap_full`. A full snapshot is written after every
//! committed apply, so for every epoch at least one of the two exists,
//! the precondition map distribution relies on.

use crate::external::KvStore;
use cairn_common::{Epoch, Result};
use std::sync::Arc;

/// Namespace holding per-epoch increments
pub const NS_INCREMENTAL: &str = "osdmap";
/// Namespace holding per-epoch full snapshots
pub const NS_FULL: &str = "osdmap_full";

/// Persistence adapter for maps and increments
#[derive(Clone)]
pub struct MapJournal {
    store: Arc<dyn KvStore>,
}

impl MapJournal {
    /// Wrap a key-value store
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist the increment that produced `epoch`
    pub fn put_incremental(&self, epoch: Epoch, bytes: &[u8]) -> Result<()> {
        self.store.put_bytes(NS_INCREMENTAL, epoch as u64, bytes)
    }

    /// Persist the full map at `epoch`
    pub fn put_full(&self, epoch: Epoch, bytes: &[u8]) -> Result<()> {
        self.store.put_bytes(NS_FULL, epoch as u64, bytes)
    }

    /// Fetch the increment that produced `epoch`
    pub fn get_incremental(&self, epoch: Epoch) -> Result<Option<Vec<u8>>> {
        self.store.get_bytes(NS_INCREMENTAL, epoch as u64)
    }

    /// Fetch the full map at `epoch`
    pub fn get_full(&self, epoch: Epoch) -> Result<Option<Vec<u8>>> {
        self.store.get_bytes(NS_FULL, epoch as u64)
    }
}
