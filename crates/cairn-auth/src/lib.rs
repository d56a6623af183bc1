//! Cairn request authentication
//!
//! The S3-compatible signing core used by the gateway: canonical-string
//! assembly and the HMAC chains for both signature flavours, plus request
//! verifiers and an in-memory user/key store.
//!
//! - [`sign`]: SigV2 canonicalisation (header-style and pre-signed) and
//!   HMAC-SHA1 signing
//! - [`sigv4`]: the date/region/service-scoped HMAC-SHA256 chain
//! - [`SigV2Verifier`] / [`SigV4Verifier`]: verification over
//!   `http::Request`

pub mod error;
pub mod sign;
pub mod sigv2;
pub mod sigv4;
pub mod store;
pub mod user;

pub use error::AuthError;
pub use sign::{
    build_canonical_header, canonical_header_string, collect_sub_resources, parse_header_date,
    sign_v2, SignableRequest, SIGNED_SUBRESOURCES,
};
pub use sigv2::SigV2Verifier;
pub use sigv4::{
    canonical_request, derive_signing_key, hashed_canonical_request, sign_v4, string_to_sign,
    SigV4Verifier, AWS4_HMAC_SHA256,
};
pub use store::UserStore;
pub use user::{AccessKey, AuthResult, KeyStatus, User, UserStatus};
