//! Cairn common types: identifiers, errors, configuration, clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use types::{
    ClusterFsid, Epoch, OsdId, OsdInst, PoolId, SnapId, EAGAIN, EEXIST, EINVAL, ENOENT,
    WEIGHT_IN, WEIGHT_OUT,
};
