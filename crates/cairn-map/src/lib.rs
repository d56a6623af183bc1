//! Cairn OSD map model
//!
//! The in-memory representation of the cluster map: which OSD slots exist,
//! which are up or down, in or out, the pool and snapshot tables, the
//! address blacklist, and the opaque CRUSH blob. Maps advance one epoch at a
//! time by applying an [`Incremental`] produced by the monitor.

pub mod crush;
pub mod incremental;
pub mod interval_set;
pub mod map;
pub mod pool;

pub use crush::CrushBlob;
pub use incremental::Incremental;
pub use interval_set::IntervalSet;
pub use map::{OsdInfo, OsdMap, OsdState, PgId};
pub use pool::{Pool, PoolType, SnapInfo};
