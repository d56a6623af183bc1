//! Incremental map updates
//!
//! The delta between epoch `e` and `e+1`, the unit of consensus. The
//! monitor's pending accumulator fills one of these in, the log commits it,
//! and every replica applies it to its full map.

use crate::crush::CrushBlob;
use crate::pool::Pool;
use cairn_common::{ClusterFsid, Epoch, Error, OsdId, PoolId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Delta from epoch `epoch - 1` to `epoch`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Incremental {
    /// Cluster identity
    pub fsid: ClusterFsid,
    /// Target epoch this increment produces
    pub epoch: Epoch,
    /// Stamped when the increment is encoded for proposal
    pub modified: Option<DateTime<Utc>>,

    /// OSDs coming up, with the address of the new incarnation
    pub new_up: BTreeMap<OsdId, SocketAddr>,
    /// OSDs going down; the flag records whether the shutdown was clean
    pub new_down: BTreeMap<OsdId, bool>,
    /// Weight changes (IN, OUT, or anything in between)
    pub new_weight: BTreeMap<OsdId, u32>,
    /// Advances to the up-thru epoch
    pub new_up_thru: BTreeMap<OsdId, Epoch>,
    /// Advances to the last-clean interval, `(first, last)` inclusive
    pub new_last_clean_interval: BTreeMap<OsdId, (Epoch, Epoch)>,
    /// Operator declarations of permanent data loss
    pub new_lost: BTreeMap<OsdId, Epoch>,

    /// Pools created or updated this epoch
    pub new_pools: BTreeMap<PoolId, Pool>,
    /// Pool names assigned this epoch
    pub new_pool_names: BTreeMap<PoolId, String>,

    /// Addresses blacklisted until the given time
    pub new_blacklist: BTreeMap<SocketAddr, DateTime<Utc>>,
    /// Blacklist entries expiring this epoch
    pub old_blacklist: Vec<SocketAddr>,

    /// New OSD slot count
    pub new_max_osd: Option<u32>,
    /// Wholesale map replacement; when present every other field is ignored
    pub fullmap: Option<Vec<u8>>,
    /// Wholesale CRUSH replacement
    pub crush: Option<CrushBlob>,
}

impl Incremental {
    /// A fresh, empty increment targeting `epoch`
    #[must_use]
    pub fn new(fsid: ClusterFsid, epoch: Epoch) -> Self {
        Self {
            fsid,
            epoch,
            ..Default::default()
        }
    }

    /// Whether nothing has been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_up.is_empty()
            && self.new_down.is_empty()
            && self.new_weight.is_empty()
            && self.new_up_thru.is_empty()
            && self.new_last_clean_interval.is_empty()
            && self.new_lost.is_empty()
            && self.new_pools.is_empty()
            && self.new_pool_names.is_empty()
            && self.new_blacklist.is_empty()
            && self.old_blacklist.is_empty()
            && self.new_max_osd.is_none()
            && self.fullmap.is_none()
            && self.crush.is_none()
    }

    /// Serialize for proposal and persistence
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Deserialize a committed increment
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let inc: Self =
            bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        if let Some(crush) = &inc.crush {
            crush.validate()?;
        }
        Ok(inc)
    }
}
