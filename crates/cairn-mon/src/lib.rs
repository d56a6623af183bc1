//! Cairn cluster-map monitor
//!
//! The consensus-backed state machine that owns the OSD map: it accepts
//! failure reports, boot notifications, liveness pings, snapshot purges, and
//! administrative commands, coalesces them into incremental map updates,
//! commits each increment through the consensus log, persists full maps and
//! increments per epoch, and distributes maps to interested peers.

pub mod external;
pub mod journal;
pub mod local_log;
pub mod messages;
pub mod monitor;
pub mod pending;
pub mod store;

pub use external::{
    ConsensusLog, EventLog, IdlePlacement, KvStore, LogLevel, MdsPeer, Messenger, NoMdsPeers,
    PlacementPeer, TraceMessenger, TracingEventLog,
};
pub use journal::MapJournal;
pub use local_log::LocalLog;
pub use messages::{
    AdminCommand, AliveNotice, BootRecord, CommandReply, FailureReport, MapShipment, Message,
    Outbound, PoolSnapReply, PoolSnapRequest, SnapPurge, Superblock,
};
pub use monitor::{MonitorDeps, OsdMonitor, Role};
pub use pending::PendingMap;
pub use store::{MemStore, RedbStore};
