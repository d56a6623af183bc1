//! Pending-change accumulator
//!
//! Collects proposed mutations for the next epoch. Handlers reach it only
//! during the prepare phase; after a successful commit it is rebuilt empty
//! for the epoch after. The bulk device-weight table survives rebuilds and
//! is folded into the increment once every slot has reported.

use cairn_common::{ClusterFsid, Epoch, MonitorConfig, OsdId, PoolId, WEIGHT_OUT};
use cairn_map::{CrushBlob, Incremental, OsdMap, Pool};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// The increment under construction for `current_epoch + 1`
#[derive(Debug)]
pub struct PendingMap {
    inc: Incremental,
    /// Raw device weights reported at boot, folded in once complete
    osd_weight: BTreeMap<OsdId, u32>,
}

impl PendingMap {
    /// Start an empty increment targeting `epoch`
    #[must_use]
    pub fn new(fsid: ClusterFsid, epoch: Epoch) -> Self {
        Self {
            inc: Incremental::new(fsid, epoch),
            osd_weight: BTreeMap::new(),
        }
    }

    /// Reset the increment for a new target epoch, keeping the bulk weight
    /// table.
    pub fn rebuild(&mut self, fsid: ClusterFsid, epoch: Epoch) {
        self.inc = Incremental::new(fsid, epoch);
    }

    /// Target epoch of the increment
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.inc.epoch
    }

    /// Read access for preprocess checks and tests
    #[must_use]
    pub fn incremental(&self) -> &Incremental {
        &self.inc
    }

    /// Whether anything has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inc.is_empty()
    }

    /// Stamp the modification time and encode for proposal
    pub fn encode_for_proposal(
        &mut self,
        now: DateTime<Utc>,
    ) -> cairn_common::Result<Vec<u8>> {
        self.inc.modified = Some(now);
        self.inc.encode()
    }

    /// Record an OSD going down. `clean` marks an orderly shutdown.
    pub fn mark_down(&mut self, osd: OsdId, clean: bool) {
        debug_assert!(
            !self.inc.new_up.contains_key(&osd),
            "osd{osd} cannot go both up and down in one epoch"
        );
        self.inc.new_down.insert(osd, clean);
    }

    /// Record an OSD coming up at `addr`
    pub fn mark_up(&mut self, osd: OsdId, addr: SocketAddr) {
        debug_assert!(
            !self.inc.new_down.contains_key(&osd),
            "osd{osd} cannot go both up and down in one epoch"
        );
        self.inc.new_up.insert(osd, addr);
    }

    /// Record a weight change
    pub fn set_weight(&mut self, osd: OsdId, weight: u32) {
        self.inc.new_weight.insert(osd, weight);
    }

    /// Record an up-thru advance
    pub fn set_up_thru(&mut self, osd: OsdId, epoch: Epoch) {
        self.inc.new_up_thru.insert(osd, epoch);
    }

    /// Record a clean-interval advance
    pub fn set_last_clean_interval(&mut self, osd: OsdId, first: Epoch, last: Epoch) {
        self.inc.new_last_clean_interval.insert(osd, (first, last));
    }

    /// Record an operator loss declaration
    pub fn mark_lost(&mut self, osd: OsdId, at: Epoch) {
        self.inc.new_lost.insert(osd, at);
    }

    /// Blacklist `addr` until the given time
    pub fn add_to_blacklist(&mut self, addr: SocketAddr, until: DateTime<Utc>) {
        self.inc.new_blacklist.insert(addr, until);
    }

    /// Expire a blacklist entry
    pub fn expire_blacklist_entry(&mut self, addr: SocketAddr) {
        if !self.inc.old_blacklist.contains(&addr) {
            self.inc.old_blacklist.push(addr);
        }
    }

    /// Replace the CRUSH blob wholesale
    pub fn replace_crush(&mut self, blob: CrushBlob) {
        self.inc.crush = Some(blob);
    }

    /// Replace the entire map; any other recorded deltas will be ignored on
    /// apply, so this forces an immediate propose.
    pub fn set_fullmap(&mut self, bytes: Vec<u8>) {
        self.inc.fullmap = Some(bytes);
    }

    /// Resize the OSD slot table
    pub fn set_max_osd(&mut self, max_osd: u32) {
        self.inc.new_max_osd = Some(max_osd);
    }

    /// Create or replace a pool
    pub fn upsert_pool(&mut self, pool: PoolId, value: Pool) {
        self.inc.new_pools.insert(pool, value);
    }

    /// Name (or rename) a pool
    pub fn set_pool_name(&mut self, pool: PoolId, name: impl Into<String>) {
        self.inc.new_pool_names.insert(pool, name.into());
    }

    /// Note a raw device weight reported at boot
    pub fn note_osd_weight(&mut self, osd: OsdId, weight: u32) {
        self.osd_weight.insert(osd, weight);
    }

    /// Copy-on-write a pool into the increment and return it for mutation.
    /// Returns `None` when the pool exists in neither the committed map nor
    /// the increment.
    pub fn pool_for_update(&mut self, pool: PoolId, map: &OsdMap) -> Option<&mut Pool> {
        if !self.inc.new_pools.contains_key(&pool) {
            let committed = map.get_pool(pool)?.clone();
            self.inc.new_pools.insert(pool, committed);
        }
        self.inc.new_pools.get_mut(&pool)
    }

    /// Snapshot already present in the increment's copy of `pool`?
    #[must_use]
    pub fn pending_snap_exists(&self, pool: PoolId, name: &str) -> bool {
        self.inc
            .new_pools
            .get(&pool)
            .is_some_and(|p| p.snap_exists(name).is_some())
    }

    /// Decide whether to propose now.
    ///
    /// A pending full map proposes immediately since later deltas would be
    /// silently clobbered. A complete bulk weight table is folded in and
    /// also proposes immediately. Everything else defers to the routine
    /// back-off.
    pub fn should_propose(&mut self, map: &OsdMap, config: &MonitorConfig) -> (bool, Duration) {
        if self.inc.fullmap.is_some() {
            return (true, Duration::ZERO);
        }

        if !self.osd_weight.is_empty() && self.osd_weight.len() == map.max_osd() as usize {
            info!(slots = self.osd_weight.len(), "adjusting osd weights from boot reports");
            map.adjust_weights(&self.osd_weight, &mut self.inc);
            self.osd_weight.clear();
            return (true, Duration::ZERO);
        }

        (true, config.propose_interval())
    }
}

impl PendingMap {
    /// Convenience for tick: queue an eviction
    pub fn mark_out(&mut self, osd: OsdId) {
        self.set_weight(osd, WEIGHT_OUT);
    }
}
