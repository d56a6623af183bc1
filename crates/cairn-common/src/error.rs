//! Error types for Cairn
//!
//! One error enum shared by the map model and the monitor, with a mapping to
//! the POSIX-style codes the admin shell expects in replies.

use crate::types::{ClusterFsid, Epoch, OsdId, EAGAIN, EEXIST, EINVAL, ENOENT};
use thiserror::Error;

/// Common result type for Cairn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Cairn
#[derive(Debug, Error)]
pub enum Error {
    #[error("fsid mismatch: got {got}, cluster is {expected}")]
    FsidMismatch {
        got: ClusterFsid,
        expected: ClusterFsid,
    },

    #[error("stale epoch {got}, current is {current}")]
    StaleEpoch { got: Epoch, current: Epoch },

    #[error("increment targets epoch {target}, map is at {current}")]
    EpochMismatch { target: Epoch, current: Epoch },

    #[error("duplicate report")]
    Duplicate,

    #[error("osd{0} does not exist")]
    UnknownOsd(OsdId),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("snapshot already exists: {0}")]
    SnapExists(String),

    #[error("snapshot not found: {0}")]
    SnapNotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("placement groups still being created")]
    PgCreationInFlight,

    #[error("consensus not readable")]
    NotAuthoritative,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("crush blob checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    BadCrushChecksum { expected: u32, actual: u32 },

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a precondition failure
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownOsd(_) | Self::PoolNotFound(_) | Self::SnapNotFound(_)
        )
    }

    /// Negative errno the admin shell reports for this error; 0 never occurs
    /// here, successes do not reach this mapping.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::UnknownOsd(_) | Self::PoolNotFound(_) | Self::SnapNotFound(_) => -ENOENT,
            Self::SnapExists(_) => -EEXIST,
            Self::PgCreationInFlight => -EAGAIN,
            _ => -EINVAL,
        }
    }
}
