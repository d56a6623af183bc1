//! User and access key types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

/// Access key status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    #[default]
    Active,
    Inactive,
}

/// A gateway user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub user_id: String,
    /// Display name
    pub display_name: String,
    /// User status
    pub status: UserStatus,
    /// ARN for this user
    pub arn: String,
}

impl User {
    /// Create a new user with a generated id
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            user_id: Uuid::new_v4().to_string(),
            arn: format!("arn:cairn:iam::user/{display_name}"),
            display_name,
            status: UserStatus::Active,
        }
    }

    /// Check if the user may authenticate
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// An access key for request signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    /// Access key id (20 chars, AKIA-prefixed)
    pub access_key_id: String,
    /// Secret key (40 chars)
    pub secret_access_key: String,
    /// Owning user id
    pub user_id: String,
    /// Key status
    pub status: KeyStatus,
}

impl AccessKey {
    /// Generate a fresh key pair for a user
    pub fn generate(user_id: impl Into<String>) -> Self {
        Self {
            access_key_id: generate_access_key_id(),
            secret_access_key: generate_secret_key(),
            user_id: user_id.into(),
            status: KeyStatus::Active,
        }
    }

    /// Check if the key may authenticate
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Authenticated user id
    pub user_id: String,
    /// Authenticated user ARN
    pub user_arn: String,
    /// Key the request was signed with
    pub access_key_id: String,
}

/// Generate an AWS-style access key id: AKIA + 16 uppercase alphanumerics
fn generate_access_key_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("AKIA{suffix}")
}

/// Generate an AWS-style secret key: 40 base64-alphabet characters
fn generate_secret_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
