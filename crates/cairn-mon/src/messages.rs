//! Monitor message model
//!
//! Inbound traffic is one tagged enum; the dispatcher matches on it for the
//! preprocess and prepare phases. Outbound replies are a second enum handed
//! to the messenger.

use cairn_common::{ClusterFsid, Epoch, OsdInst, PoolId, SnapId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the monitor accepts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// An OSD reporting another OSD unreachable
    Failure(FailureReport),
    /// An OSD announcing itself after startup
    Boot(BootRecord),
    /// An OSD confirming it survived through a map epoch
    Alive(AliveNotice),
    /// Create or delete a named pool snapshot
    PoolSnap(PoolSnapRequest),
    /// Mark pool snapshots removed
    RemoveSnaps(SnapPurge),
    /// Administrative shell command
    Command(AdminCommand),
    /// Explicit map request
    GetMap {
        /// Cluster identity of the requester
        fsid: ClusterFsid,
        /// First epoch wanted; 0 asks for the full current map
        start: Epoch,
    },
}

/// Failure report: `failed` is unreachable according to `reporter`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureReport {
    /// Cluster identity
    pub fsid: ClusterFsid,
    /// The instance being reported down
    pub failed: OsdInst,
    /// The reporting instance
    pub reporter: OsdInst,
    /// Map epoch the reporter was at
    pub epoch: Epoch,
}

/// On-disk identity an OSD presents when booting
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Superblock {
    /// Cluster identity burned into the OSD's store
    pub fsid: ClusterFsid,
    /// Epoch of the map the OSD had mounted when it last started cleanly
    pub mounted: Epoch,
    /// Last epoch the OSD shut down cleanly through
    pub clean_thru: Epoch,
    /// Device weight hint; 0 means unspecified
    pub weight: u32,
    /// Newest map epoch the OSD has seen
    pub current_epoch: Epoch,
}

/// Boot announcement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootRecord {
    /// The booting instance
    pub inst: OsdInst,
    /// Its superblock
    pub sb: Superblock,
}

/// Liveness confirmation through a map epoch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AliveNotice {
    /// The confirming instance
    pub inst: OsdInst,
    /// Epoch the OSD confirms surviving through
    pub map_epoch: Epoch,
}

/// Create or delete a named snapshot in a pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapRequest {
    /// Cluster identity
    pub fsid: ClusterFsid,
    /// Client transaction id, echoed in the reply
    pub tid: u64,
    /// Target pool; negative means the client could not resolve it
    pub pool: PoolId,
    /// Snapshot name
    pub name: String,
    /// true to create, false to delete
    pub create: bool,
}

/// Per-pool lists of snapshot ids to mark removed
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapPurge {
    /// pool id → snap ids
    pub snaps: BTreeMap<PoolId, Vec<SnapId>>,
}

/// Administrative shell command: an argv-style vector plus an optional
/// binary payload (crush maps, full maps).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminCommand {
    /// Tokenized command, e.g. `["osd", "down", "3"]`
    pub cmd: Vec<String>,
    /// Binary payload for setcrushmap / setmap
    pub data: Vec<u8>,
}

/// Everything the monitor sends
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Outbound {
    /// Full and/or incremental maps
    MapShipment(MapShipment),
    /// Admin command result
    Command(CommandReply),
    /// Pool snapshot result
    PoolSnap(PoolSnapReply),
    /// Scrub directive for an OSD
    Scrub {
        /// Cluster identity
        fsid: ClusterFsid,
    },
    /// Runtime argument injection for an OSD
    InjectArgs {
        /// Raw argument string
        args: String,
    },
}

/// A batch of maps for one recipient. For each epoch the shipment carries
/// either the increment or a full map, never neither.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapShipment {
    /// Cluster identity
    pub fsid: ClusterFsid,
    /// Full maps by epoch
    pub full_maps: BTreeMap<Epoch, Vec<u8>>,
    /// Increments by epoch
    pub incremental_maps: BTreeMap<Epoch, Vec<u8>>,
}

impl MapShipment {
    /// An empty shipment
    #[must_use]
    pub fn new(fsid: ClusterFsid) -> Self {
        Self {
            fsid,
            full_maps: BTreeMap::new(),
            incremental_maps: BTreeMap::new(),
        }
    }

    /// Highest epoch covered by this shipment
    #[must_use]
    pub fn newest_epoch(&self) -> Option<Epoch> {
        let full = self.full_maps.keys().next_back().copied();
        let inc = self.incremental_maps.keys().next_back().copied();
        full.max(inc)
    }
}

/// Result of an admin command. `code` is 0 on success or a negative errno.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandReply {
    /// 0 or negative errno
    pub code: i32,
    /// Human-readable status line
    pub status: String,
    /// Binary result (map dumps, crush maps)
    pub data: Vec<u8>,
}

/// Result of a pool snapshot request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapReply {
    /// Echoed transaction id
    pub tid: u64,
    /// 0 or negative errno
    pub code: i32,
    /// Epoch the change lands in (or the pending epoch on failure)
    pub epoch: Epoch,
}
