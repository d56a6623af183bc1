//! Interfaces to the monitor's external collaborators
//!
//! The consensus log, key-value store, messenger, and peer subsystems are
//! consumed through these traits; tests substitute recording fakes and the
//! daemon wires real implementations.

use crate::messages::Outbound;
use cairn_common::{Epoch, Result};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// The external total-order broadcast primitive. One value is committed per
/// version; versions map one-to-one onto map epochs.
pub trait ConsensusLog: Send + Sync {
    /// Highest committed version
    fn version(&self) -> Epoch;
    /// Whether the log is participating in rounds
    fn is_active(&self) -> bool;
    /// Whether committed state may be read (false during elections)
    fn is_readable(&self) -> bool;
    /// Committed value at `version`, if present
    fn read(&self, version: Epoch) -> Option<Vec<u8>>;
    /// The stashed latest full-state snapshot
    fn get_latest(&self) -> Option<(Epoch, Vec<u8>)>;
    /// Stash a full-state snapshot for fast startup
    fn stash_latest(&self, version: Epoch, bytes: Vec<u8>);
    /// Submit one value for total-order commit at `version() + 1`
    fn propose(&self, bytes: Vec<u8>);
}

/// External key-value store with atomic single-key put
pub trait KvStore: Send + Sync {
    /// Write `bytes` under `(namespace, key)`
    fn put_bytes(&self, namespace: &str, key: u64, bytes: &[u8]) -> Result<()>;
    /// Read the bytes under `(namespace, key)`
    fn get_bytes(&self, namespace: &str, key: u64) -> Result<Option<Vec<u8>>>;
}

/// Transport for outbound messages
pub trait Messenger: Send + Sync {
    /// Send a message to a peer
    fn send(&self, to: SocketAddr, msg: Outbound);
    /// Drop any connection state for a peer
    fn mark_down(&self, addr: SocketAddr);
}

/// The placement-group subsystem
pub trait PlacementPeer: Send + Sync {
    /// Notify that the map advanced to `epoch`
    fn check_osd_map(&self, epoch: Epoch);
    /// Whether placement groups are still being created; pool resizes are
    /// rejected with EAGAIN while this holds
    fn creating_pgs(&self) -> bool;
}

/// The metadata-server monitor, consulted for broadcast recipients
pub trait MdsPeer: Send + Sync {
    /// Addresses of all up metadata servers
    fn up_mds_addrs(&self) -> Vec<SocketAddr>;
}

/// Severity of an operator-visible event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// Sink for human-readable operational events (osd failed, osd boot, ...)
pub trait EventLog: Send + Sync {
    /// Record one event line
    fn log(&self, level: LogLevel, line: String);
}

/// Event sink that forwards to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, level: LogLevel, line: String) {
        match level {
            LogLevel::Debug => debug!(target: "cluster", "{line}"),
            LogLevel::Info => info!(target: "cluster", "{line}"),
            LogLevel::Warn => warn!(target: "cluster", "{line}"),
        }
    }
}

/// Placement peer for deployments without a PG subsystem attached
#[derive(Clone, Copy, Debug, Default)]
pub struct IdlePlacement;

impl PlacementPeer for IdlePlacement {
    fn check_osd_map(&self, epoch: Epoch) {
        debug!(epoch, "placement peer notified");
    }

    fn creating_pgs(&self) -> bool {
        false
    }
}

/// MDS peer for deployments without metadata servers
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMdsPeers;

impl MdsPeer for NoMdsPeers {
    fn up_mds_addrs(&self) -> Vec<SocketAddr> {
        Vec::new()
    }
}

/// Messenger that records sends in the trace log only; used when no
/// transport is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceMessenger;

impl Messenger for TraceMessenger {
    fn send(&self, to: SocketAddr, msg: Outbound) {
        match &msg {
            Outbound::MapShipment(s) => {
                debug!(%to, newest = ?s.newest_epoch(), "would send map shipment")
            }
            Outbound::Command(r) => debug!(%to, code = r.code, status = %r.status, "would send command reply"),
            Outbound::PoolSnap(r) => debug!(%to, tid = r.tid, code = r.code, "would send pool snap reply"),
            Outbound::Scrub { .. } => debug!(%to, "would send scrub directive"),
            Outbound::InjectArgs { args } => debug!(%to, %args, "would inject args"),
        }
    }

    fn mark_down(&self, addr: SocketAddr) {
        debug!(%addr, "would mark down");
    }
}
