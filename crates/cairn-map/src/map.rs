//! The full OSD map
//!
//! One value per epoch describing the whole cluster: slot states, addresses,
//! weights, per-OSD history, pools, the blacklist, and the CRUSH blob.
//! Mutation happens only through [`OsdMap::apply`] with the increment for
//! the next epoch.

use crate::crush::CrushBlob;
use crate::incremental::Incremental;
use crate::pool::Pool;
use cairn_common::{
    ClusterFsid, Epoch, Error, OsdId, OsdInst, PoolId, Result, WEIGHT_IN, WEIGHT_OUT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;

/// Existence/liveness flags for one OSD slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdState(u8);

impl OsdState {
    const EXISTS: u8 = 1;
    const UP: u8 = 2;

    /// Slot has been allocated
    #[must_use]
    pub fn exists(self) -> bool {
        self.0 & Self::EXISTS != 0
    }

    /// OSD is accepting traffic
    #[must_use]
    pub fn is_up(self) -> bool {
        self.0 & Self::UP != 0
    }

    fn set_exists(&mut self) {
        self.0 |= Self::EXISTS;
    }

    fn set_up(&mut self) {
        self.0 |= Self::EXISTS | Self::UP;
    }

    fn clear_up(&mut self) {
        self.0 &= !Self::UP;
    }
}

/// Per-OSD history record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdInfo {
    /// Epoch of the last down→up transition
    pub up_from: Epoch,
    /// Highest epoch the OSD has confirmed surviving through
    pub up_thru: Epoch,
    /// Epoch of the last up→down transition
    pub down_at: Epoch,
    /// Start of the last clean shutdown interval (inclusive)
    pub last_clean_first: Epoch,
    /// End of the last clean shutdown interval (inclusive)
    pub last_clean_last: Epoch,
    /// Epoch at which the operator declared this OSD's data lost; 0 if never
    pub lost_at: Epoch,
}

/// A placement group: a pool plus a stable shard seed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgId {
    /// Owning pool
    pub pool: PoolId,
    /// Shard seed within the pool
    pub seed: u32,
}

/// The full cluster map at one epoch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OsdMap {
    /// Cluster identity
    pub fsid: ClusterFsid,
    /// Map version
    pub epoch: Epoch,
    /// When the genesis map was fabricated
    pub created: Option<DateTime<Utc>>,
    /// When this epoch was committed
    pub modified: Option<DateTime<Utc>>,

    max_osd: u32,
    osd_state: Vec<OsdState>,
    osd_addrs: Vec<Option<SocketAddr>>,
    osd_weights: Vec<u32>,
    osd_info: Vec<OsdInfo>,

    /// Pools by id
    pub pools: BTreeMap<PoolId, Pool>,
    /// Pool id → name
    pub pool_names: BTreeMap<PoolId, String>,
    name_pool: BTreeMap<String, PoolId>,

    /// Addresses forbidden from the cluster, with expiry times
    pub blacklist: BTreeMap<SocketAddr, DateTime<Utc>>,
    /// Opaque placement configuration
    pub crush: CrushBlob,
}

impl OsdMap {
    /// Fabricate a genesis map: `max_osd` allocated slots, all down and out.
    #[must_use]
    pub fn build_initial(fsid: ClusterFsid, max_osd: u32, now: DateTime<Utc>) -> Self {
        let mut map = Self {
            fsid,
            epoch: 1,
            created: Some(now),
            modified: Some(now),
            ..Default::default()
        };
        map.set_max_osd(max_osd);
        for state in &mut map.osd_state {
            state.set_exists();
        }
        map
    }

    /// Slot capacity
    #[must_use]
    pub fn max_osd(&self) -> u32 {
        self.max_osd
    }

    /// Resize the slot tables; shrinking discards the tail.
    pub fn set_max_osd(&mut self, max_osd: u32) {
        let n = max_osd as usize;
        self.max_osd = max_osd;
        self.osd_state.resize(n, OsdState::default());
        self.osd_addrs.resize(n, None);
        self.osd_weights.resize(n, WEIGHT_OUT);
        self.osd_info.resize(n, OsdInfo::default());
    }

    fn in_range(&self, osd: OsdId) -> bool {
        (osd as usize) < self.osd_state.len()
    }

    /// Whether the slot is allocated
    #[must_use]
    pub fn exists(&self, osd: OsdId) -> bool {
        self.in_range(osd) && self.osd_state[osd as usize].exists()
    }

    /// Whether the OSD is accepting traffic
    #[must_use]
    pub fn is_up(&self, osd: OsdId) -> bool {
        self.in_range(osd) && self.osd_state[osd as usize].is_up()
    }

    /// Whether the OSD is unreachable
    #[must_use]
    pub fn is_down(&self, osd: OsdId) -> bool {
        !self.is_up(osd)
    }

    /// Whether the OSD carries placement weight
    #[must_use]
    pub fn is_in(&self, osd: OsdId) -> bool {
        self.exists(osd) && self.get_weight(osd) > WEIGHT_OUT
    }

    /// Whether the OSD has been evicted from placement
    #[must_use]
    pub fn is_out(&self, osd: OsdId) -> bool {
        !self.is_in(osd)
    }

    /// Whether the slot has a bound address (retained across down)
    #[must_use]
    pub fn have_inst(&self, osd: OsdId) -> bool {
        self.exists(osd) && self.osd_addrs[osd as usize].is_some()
    }

    /// Address the slot is (or was last) bound to
    #[must_use]
    pub fn get_addr(&self, osd: OsdId) -> Option<SocketAddr> {
        if self.in_range(osd) {
            self.osd_addrs[osd as usize]
        } else {
            None
        }
    }

    /// The slot's bound instance
    #[must_use]
    pub fn get_inst(&self, osd: OsdId) -> Option<OsdInst> {
        self.get_addr(osd).map(|addr| OsdInst::new(osd, addr))
    }

    /// Placement weight of the slot
    #[must_use]
    pub fn get_weight(&self, osd: OsdId) -> u32 {
        if self.in_range(osd) {
            self.osd_weights[osd as usize]
        } else {
            WEIGHT_OUT
        }
    }

    /// History record of the slot
    #[must_use]
    pub fn get_info(&self, osd: OsdId) -> OsdInfo {
        if self.in_range(osd) {
            self.osd_info[osd as usize]
        } else {
            OsdInfo::default()
        }
    }

    /// Highest epoch the OSD has confirmed surviving through
    #[must_use]
    pub fn get_up_thru(&self, osd: OsdId) -> Epoch {
        self.get_info(osd).up_thru
    }

    /// All allocated slot ids
    #[must_use]
    pub fn get_all_osds(&self) -> Vec<OsdId> {
        (0..self.max_osd).filter(|&o| self.exists(o)).collect()
    }

    /// All up slot ids
    #[must_use]
    pub fn get_up_osds(&self) -> Vec<OsdId> {
        (0..self.max_osd).filter(|&o| self.is_up(o)).collect()
    }

    /// Some up OSD, if any is up at all
    #[must_use]
    pub fn get_any_up_osd(&self) -> Option<OsdId> {
        (0..self.max_osd).find(|&o| self.is_up(o))
    }

    /// Resolve a pool name to its id
    #[must_use]
    pub fn lookup_pool_name(&self, name: &str) -> Option<PoolId> {
        self.name_pool.get(name).copied()
    }

    /// Pool by id
    #[must_use]
    pub fn get_pool(&self, pool: PoolId) -> Option<&Pool> {
        self.pools.get(&pool)
    }

    /// OSDs responsible for a placement group: the pool's `size` highest
    /// rendezvous-hash scores among up-and-in OSDs, weight-scaled. The CRUSH
    /// blob stays opaque; its version seeds the hash so wholesale
    /// replacements reshuffle placement.
    #[must_use]
    pub fn pg_to_osds(&self, pg: PgId) -> Vec<OsdId> {
        let Some(pool) = self.pools.get(&pg.pool) else {
            return Vec::new();
        };
        if pool.pg_num == 0 {
            return Vec::new();
        }
        let shard = pg.seed % pool.pgp_num.max(1);

        let mut scored: Vec<(u64, OsdId)> = (0..self.max_osd)
            .filter(|&o| self.is_up(o) && self.is_in(o))
            .map(|o| {
                let mut key = [0u8; 24];
                key[..8].copy_from_slice(&(pg.pool as u64).to_le_bytes());
                key[8..12].copy_from_slice(&shard.to_le_bytes());
                key[12..16].copy_from_slice(&o.to_le_bytes());
                key[16..20].copy_from_slice(&self.crush.version.to_le_bytes());
                key[20..24].copy_from_slice(&pool.crush_ruleset.to_le_bytes());
                let raw = xxhash_rust::xxh64::xxh64(&key, 0);
                // scale the draw by weight so fractional OSDs win less often
                let scaled = (raw >> 16).saturating_mul(self.get_weight(o) as u64);
                (scaled, o)
            })
            .collect();

        scored.sort_by(|a, b| b.cmp(a));
        scored
            .into_iter()
            .take(pool.size as usize)
            .map(|(_, o)| o)
            .collect()
    }

    /// Fold a bulk device-weight table into `inc`: weights are normalized so
    /// the largest becomes IN, and only changed slots get an entry.
    pub fn adjust_weights(&self, device_weights: &BTreeMap<OsdId, u32>, inc: &mut Incremental) {
        let Some(&max) = device_weights.values().max() else {
            return;
        };
        if max == 0 {
            return;
        }
        for (&osd, &w) in device_weights {
            if !self.exists(osd) {
                continue;
            }
            let scaled = ((w as u64 * WEIGHT_IN as u64) / max as u64) as u32;
            if scaled != self.get_weight(osd) {
                inc.new_weight.insert(osd, scaled);
            }
        }
    }

    /// Advance the map by one epoch.
    ///
    /// Deterministic and idempotent over an increment targeting
    /// `self.epoch + 1`; anything else is an [`Error::EpochMismatch`]. A
    /// full-map payload supersedes every delta field.
    pub fn apply(&mut self, inc: &Incremental) -> Result<()> {
        if inc.epoch != self.epoch + 1 {
            return Err(Error::EpochMismatch {
                target: inc.epoch,
                current: self.epoch,
            });
        }

        if let Some(full) = &inc.fullmap {
            let mut map = Self::decode(full)?;
            map.epoch = inc.epoch;
            if inc.modified.is_some() {
                map.modified = inc.modified;
            }
            *self = map;
            return Ok(());
        }

        if let Some(max) = inc.new_max_osd {
            self.set_max_osd(max);
        }

        for (&pool, p) in &inc.new_pools {
            self.pools.insert(pool, p.clone());
        }
        for (&pool, name) in &inc.new_pool_names {
            if let Some(old) = self.pool_names.insert(pool, name.clone()) {
                self.name_pool.remove(&old);
            }
            self.name_pool.insert(name.clone(), pool);
        }

        for (&addr, &until) in &inc.new_blacklist {
            self.blacklist.insert(addr, until);
        }
        for addr in &inc.old_blacklist {
            self.blacklist.remove(addr);
        }

        for (&osd, &addr) in &inc.new_up {
            if !self.in_range(osd) {
                continue;
            }
            let i = osd as usize;
            self.osd_state[i].set_up();
            self.osd_addrs[i] = Some(addr);
            self.osd_info[i].up_from = inc.epoch;
        }

        for (&osd, _clean) in &inc.new_down {
            if !self.in_range(osd) {
                continue;
            }
            let i = osd as usize;
            self.osd_state[i].clear_up();
            self.osd_info[i].down_at = inc.epoch;
        }

        for (&osd, &weight) in &inc.new_weight {
            if !self.in_range(osd) {
                continue;
            }
            let i = osd as usize;
            self.osd_state[i].set_exists();
            self.osd_weights[i] = weight;
        }

        for (&osd, &thru) in &inc.new_up_thru {
            if self.in_range(osd) {
                self.osd_info[osd as usize].up_thru = thru;
            }
        }

        for (&osd, &(first, last)) in &inc.new_last_clean_interval {
            if self.in_range(osd) {
                let info = &mut self.osd_info[osd as usize];
                info.last_clean_first = first;
                info.last_clean_last = last;
            }
        }

        for (&osd, &at) in &inc.new_lost {
            if self.in_range(osd) {
                self.osd_info[osd as usize].lost_at = at;
            }
        }

        if let Some(crush) = &inc.crush {
            crush.validate()?;
            self.crush = crush.clone();
        }

        self.epoch = inc.epoch;
        if inc.modified.is_some() {
            self.modified = inc.modified;
        }
        Ok(())
    }

    /// Serialize for persistence and shipment
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Deserialize a persisted or shipped map
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let map: Self = bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        map.crush.validate()?;
        Ok(map)
    }

    /// One-line summary for `osd stat`
    pub fn print_summary<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let up = self.get_up_osds().len();
        let total = self.get_all_osds().len();
        let in_count = (0..self.max_osd).filter(|&o| self.is_in(o)).count();
        writeln!(
            w,
            "e{}: {} osds: {} up, {} in, {} pools",
            self.epoch,
            total,
            up,
            in_count,
            self.pools.len()
        )
    }

    /// Multi-line dump for `osd dump`
    pub fn print<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        writeln!(w, "epoch {}", self.epoch)?;
        writeln!(w, "fsid {}", self.fsid)?;
        writeln!(w, "max_osd {}", self.max_osd)?;
        for (&pool, p) in &self.pools {
            let name = self.pool_names.get(&pool).map_or("?", |n| n.as_str());
            writeln!(
                w,
                "pool {} '{}' {:?} size {} crush_ruleset {} pg_num {} pgp_num {} last_change {} snap_seq {} removed_snaps {}",
                pool,
                name,
                p.pool_type,
                p.size,
                p.crush_ruleset,
                p.pg_num,
                p.pgp_num,
                p.last_change,
                p.snap_seq,
                p.removed_snaps
            )?;
        }
        for osd in 0..self.max_osd {
            if !self.exists(osd) {
                continue;
            }
            let info = self.get_info(osd);
            write!(
                w,
                "osd{} {} {} weight {:#x}",
                osd,
                if self.is_up(osd) { "up" } else { "down" },
                if self.is_in(osd) { "in" } else { "out" },
                self.get_weight(osd)
            )?;
            if let Some(addr) = self.get_addr(osd) {
                write!(w, " {addr}")?;
            }
            writeln!(
                w,
                " up_from {} up_thru {} down_at {} last_clean {}-{} lost_at {}",
                info.up_from,
                info.up_thru,
                info.down_at,
                info.last_clean_first,
                info.last_clean_last,
                info.lost_at
            )?;
        }
        for (addr, until) in &self.blacklist {
            writeln!(w, "blacklist {addr} until {until}")?;
        }
        Ok(())
    }
}
