//! Pool and snapshot bookkeeping

use crate::interval_set::IntervalSet;
use cairn_common::{Epoch, SnapId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data protection scheme of a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    /// Full copies on `size` OSDs
    #[default]
    Replicated,
    /// Erasure-coded stripes
    Erasure,
}

/// A named snapshot within a pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapInfo {
    /// Snapshot name, unique within the pool
    pub name: String,
    /// When the snapshot was taken
    pub stamp: DateTime<Utc>,
}

/// A pool: a named namespace of objects with its own replication and
/// placement parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Protection scheme
    pub pool_type: PoolType,
    /// Replica count (or stripe width for erasure pools)
    pub size: u32,
    /// CRUSH ruleset selecting placement behavior
    pub crush_ruleset: u32,
    /// Placement group count
    pub pg_num: u32,
    /// Placement group count used for placement purposes
    pub pgp_num: u32,
    /// Localized placement group count
    pub lpg_num: u32,
    /// Localized placement group count used for placement
    pub lpgp_num: u32,
    /// Epoch of the last change to this pool
    pub last_change: Epoch,
    /// Highest snapshot id ever issued in this pool
    pub snap_seq: SnapId,
    /// Epoch of the last snapshot mutation
    pub snap_epoch: Epoch,
    /// Live snapshots by id
    pub snaps: BTreeMap<SnapId, SnapInfo>,
    /// Snapshot ids marked removed
    pub removed_snaps: IntervalSet,
}

impl Pool {
    /// Look up a live snapshot id by name
    #[must_use]
    pub fn snap_exists(&self, name: &str) -> Option<SnapId> {
        self.snaps
            .iter()
            .find(|(_, info)| info.name == name)
            .map(|(&id, _)| id)
    }

    /// Whether `snap` has been marked removed
    #[must_use]
    pub fn is_removed_snap(&self, snap: SnapId) -> bool {
        self.removed_snaps.contains(snap)
    }

    /// Create a new named snapshot, returning its id
    pub fn add_snap(&mut self, name: impl Into<String>, stamp: DateTime<Utc>) -> SnapId {
        self.snap_seq += 1;
        let id = self.snap_seq;
        self.snaps.insert(
            id,
            SnapInfo {
                name: name.into(),
                stamp,
            },
        );
        id
    }

    /// Delete a live snapshot and mark its id removed
    pub fn remove_snap(&mut self, snap: SnapId) {
        self.snaps.remove(&snap);
        self.removed_snaps.insert(snap);
    }

    /// Mark a snapshot id removed, advancing `snap_seq` if the id is ahead
    /// of anything this pool has issued.
    pub fn mark_snap_removed(&mut self, snap: SnapId) {
        self.snaps.remove(&snap);
        self.removed_snaps.insert(snap);
        if snap > self.snap_seq {
            self.snap_seq = snap;
        }
    }
}
