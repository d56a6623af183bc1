//! Core type definitions for Cairn
//!
//! Identifiers and constants shared by the map model, the monitor, and the
//! daemon wiring.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Version number of the cluster map. Epoch 1 is the genesis map; every
/// committed change increments it by exactly one.
pub type Epoch = u32;

/// Index of an object-storage daemon. Valid ids lie in `[0, max_osd)`.
pub type OsdId = u32;

/// Pool identifier. Negative values never name a real pool; requests may
/// carry them to mean "unknown".
pub type PoolId = i64;

/// Per-pool snapshot identifier, monotonic within its pool.
pub type SnapId = u64;

/// Nominal placement weight: the OSD is "in" and hosts a full share.
pub const WEIGHT_IN: u32 = 0x10000;

/// Zero placement weight: the OSD is "out" and hosts nothing.
pub const WEIGHT_OUT: u32 = 0;

// POSIX-style reply codes for the admin shell.
pub const EINVAL: i32 = 22;
pub const ENOENT: i32 = 2;
pub const EEXIST: i32 = 17;
pub const EAGAIN: i32 = 11;

/// Unique identifier for a cluster deployment
///
/// Every map, increment, and inbound report carries the fsid; mismatches are
/// dropped at the door.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterFsid(Uuid);

impl ClusterFsid {
    /// Generate a fresh fsid for a new cluster
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The all-zero fsid used before a cluster identity is assigned
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClusterFsid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for ClusterFsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterFsid({})", self.0)
    }
}

impl fmt::Display for ClusterFsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClusterFsid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// An OSD instance: a slot id bound to the network address it currently
/// answers on. Two instances with the same id but different addresses are
/// different incarnations of the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsdInst {
    /// Slot id
    pub id: OsdId,
    /// Network address of this incarnation
    pub addr: SocketAddr,
}

impl OsdInst {
    /// Create a new instance
    #[must_use]
    pub const fn new(id: OsdId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for OsdInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "osd{}@{}", self.id, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsid_roundtrip() {
        let fsid = ClusterFsid::generate();
        let parsed: ClusterFsid = fsid.to_string().parse().unwrap();
        assert_eq!(fsid, parsed);
    }

    #[test]
    fn test_nil_fsid_is_default() {
        assert_eq!(ClusterFsid::default(), ClusterFsid::nil());
    }

    #[test]
    fn test_inst_display() {
        let inst = OsdInst::new(3, "10.0.0.2:6800".parse().unwrap());
        assert_eq!(inst.to_string(), "osd3@10.0.0.2:6800");
    }
}
