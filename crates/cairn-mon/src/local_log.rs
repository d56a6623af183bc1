//! Single-node consensus log
//!
//! A trivial total-order log for one-monitor deployments: every proposal
//! commits immediately at `version + 1`. Entries and the latest-snapshot
//! stash live in the same key-value store as the map journal.

use crate::external::{ConsensusLog, KvStore};
use cairn_common::Epoch;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, warn};

/// Namespace holding committed log entries
pub const NS_LOG: &str = "log";
/// Namespace holding log metadata (version, latest stash)
pub const NS_LOG_META: &str = "log_meta";

const KEY_VERSION: u64 = 0;
const KEY_LATEST: u64 = 1;

/// In-process single-node log over a [`KvStore`]
pub struct LocalLog {
    store: Arc<dyn KvStore>,
    version: Mutex<Epoch>,
}

impl LocalLog {
    /// Open the log, recovering the committed version from the store
    pub fn open(store: Arc<dyn KvStore>) -> cairn_common::Result<Self> {
        let version = match store.get_bytes(NS_LOG_META, KEY_VERSION)? {
            Some(bytes) if bytes.len() == 4 => {
                Epoch::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            Some(_) => {
                warn!("log version record malformed, starting empty");
                0
            }
            None => 0,
        };
        Ok(Self {
            store,
            version: Mutex::new(version),
        })
    }
}

impl ConsensusLog for LocalLog {
    fn version(&self) -> Epoch {
        *self.version.lock()
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn read(&self, version: Epoch) -> Option<Vec<u8>> {
        match self.store.get_bytes(NS_LOG, version as u64) {
            Ok(v) => v,
            Err(e) => {
                error!(version, %e, "log read failed");
                None
            }
        }
    }

    fn get_latest(&self) -> Option<(Epoch, Vec<u8>)> {
        let bytes = match self.store.get_bytes(NS_LOG_META, KEY_LATEST) {
            Ok(Some(b)) if b.len() > 4 => b,
            Ok(_) => return None,
            Err(e) => {
                error!(%e, "latest stash read failed");
                return None;
            }
        };
        let version = Epoch::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Some((version, bytes[4..].to_vec()))
    }

    fn stash_latest(&self, version: Epoch, bytes: Vec<u8>) {
        let mut record = Vec::with_capacity(bytes.len() + 4);
        record.extend_from_slice(&version.to_le_bytes());
        record.extend_from_slice(&bytes);
        if let Err(e) = self.store.put_bytes(NS_LOG_META, KEY_LATEST, &record) {
            error!(version, %e, "latest stash write failed");
        }
    }

    fn propose(&self, bytes: Vec<u8>) {
        let mut version = self.version.lock();
        let next = *version + 1;
        if let Err(e) = self.store.put_bytes(NS_LOG, next as u64, &bytes) {
            error!(version = next, %e, "log append failed, proposal dropped");
            return;
        }
        if let Err(e) = self.store.put_bytes(NS_LOG_META, KEY_VERSION, &next.to_le_bytes()) {
            error!(version = next, %e, "log version write failed");
            return;
        }
        *version = next;
    }
}
