//! Authentication error types

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("invalid signature version")]
    InvalidSignatureVersion,

    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    #[error("access key is inactive")]
    AccessKeyInactive,

    #[error("user is suspended")]
    UserSuspended,

    #[error("empty secret key")]
    EmptySecretKey,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("request has expired")]
    RequestExpired,

    #[error("missing required signed header: {0}")]
    MissingSignedHeader(String),

    #[error("invalid content-md5")]
    InvalidContentMd5,

    #[error("invalid date format")]
    InvalidDateFormat,

    #[error("date predates the epoch")]
    DateBeforeEpoch,

    #[error("missing x-amz-date or date header")]
    MissingDateHeader,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserAlreadyExists(String),
}
