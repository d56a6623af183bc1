//! User and access key storage
//!
//! In-memory store consulted during signature verification. A production
//! gateway would back this with the cluster metadata service.

use crate::error::AuthError;
use crate::user::{AccessKey, KeyStatus, User, UserStatus};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory user and access key store
pub struct UserStore {
    /// Users indexed by user_id
    users: RwLock<HashMap<String, User>>,
    /// Access keys indexed by access_key_id
    keys: RwLock<HashMap<String, AccessKey>>,
    /// user_id → access_key_ids
    user_keys: RwLock<HashMap<String, Vec<String>>>,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            user_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store seeded with an admin user and one key
    pub fn with_admin(admin_name: &str) -> Self {
        let store = Self::new();

        let admin = User::new(admin_name);
        let user_id = admin.user_id.clone();
        store.users.write().insert(user_id.clone(), admin);

        let key = AccessKey::generate(&user_id);
        let key_id = key.access_key_id.clone();
        store.keys.write().insert(key_id.clone(), key);
        store.user_keys.write().insert(user_id, vec![key_id]);

        store
    }

    /// Create a new user
    pub fn create_user(&self, display_name: &str) -> Result<User, AuthError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.display_name == display_name) {
            return Err(AuthError::UserAlreadyExists(display_name.to_string()));
        }

        let user = User::new(display_name);
        let created = user.clone();
        users.insert(user.user_id.clone(), user);
        self.user_keys
            .write()
            .insert(created.user_id.clone(), Vec::new());
        Ok(created)
    }

    /// Get a user by id
    pub fn get_user(&self, user_id: &str) -> Result<User, AuthError> {
        self.users
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
    }

    /// Suspend, reactivate, or delete a user
    pub fn update_user_status(&self, user_id: &str, status: UserStatus) -> Result<(), AuthError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
        user.status = status;
        Ok(())
    }

    /// Create a new access key for a user
    pub fn create_access_key(&self, user_id: &str) -> Result<AccessKey, AuthError> {
        let user = self.get_user(user_id)?;
        if !user.is_active() {
            return Err(AuthError::UserSuspended);
        }

        let key = AccessKey::generate(user_id);
        let created = key.clone();
        self.keys.write().insert(key.access_key_id.clone(), key);
        self.user_keys
            .write()
            .entry(user_id.to_string())
            .or_default()
            .push(created.access_key_id.clone());
        Ok(created)
    }

    /// Deactivate or reactivate an access key
    pub fn update_access_key_status(
        &self,
        access_key_id: &str,
        status: KeyStatus,
    ) -> Result<(), AuthError> {
        let mut keys = self.keys.write();
        let key = keys
            .get_mut(access_key_id)
            .ok_or_else(|| AuthError::AccessKeyNotFound(access_key_id.to_string()))?;
        key.status = status;
        Ok(())
    }

    /// Look up the key and its user for authentication; inactive keys and
    /// suspended users are rejected here, before any HMAC work.
    pub fn lookup_for_auth(&self, access_key_id: &str) -> Result<(AccessKey, User), AuthError> {
        let key = self
            .keys
            .read()
            .get(access_key_id)
            .cloned()
            .ok_or_else(|| AuthError::AccessKeyNotFound(access_key_id.to_string()))?;
        if !key.is_active() {
            return Err(AuthError::AccessKeyInactive);
        }

        let user = self.get_user(&key.user_id)?;
        if !user.is_active() {
            return Err(AuthError::UserSuspended);
        }

        Ok((key, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup() {
        let store = UserStore::new();
        let user = store.create_user("tester").unwrap();
        let key = store.create_access_key(&user.user_id).unwrap();

        let (found_key, found_user) = store.lookup_for_auth(&key.access_key_id).unwrap();
        assert_eq!(found_key.access_key_id, key.access_key_id);
        assert_eq!(found_user.user_id, user.user_id);
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let store = UserStore::new();
        store.create_user("tester").unwrap();
        assert!(matches!(
            store.create_user("tester"),
            Err(AuthError::UserAlreadyExists(_))
        ));
    }

    #[test]
    fn test_inactive_key_rejected() {
        let store = UserStore::new();
        let user = store.create_user("tester").unwrap();
        let key = store.create_access_key(&user.user_id).unwrap();
        store
            .update_access_key_status(&key.access_key_id, KeyStatus::Inactive)
            .unwrap();
        assert!(matches!(
            store.lookup_for_auth(&key.access_key_id),
            Err(AuthError::AccessKeyInactive)
        ));
    }

    #[test]
    fn test_suspended_user_rejected() {
        let store = UserStore::new();
        let user = store.create_user("tester").unwrap();
        let key = store.create_access_key(&user.user_id).unwrap();
        store
            .update_user_status(&user.user_id, UserStatus::Suspended)
            .unwrap();
        assert!(matches!(
            store.lookup_for_auth(&key.access_key_id),
            Err(AuthError::UserSuspended)
        ));
    }

    #[test]
    fn test_with_admin_seeds_one_key() {
        let store = UserStore::with_admin("admin");
        let users = store.users.read();
        assert_eq!(users.len(), 1);
        let admin = users.values().next().unwrap();
        assert_eq!(store.user_keys.read()[&admin.user_id].len(), 1);
    }
}
