//! User credential checks for the login and register forms.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

/// Backing store consulted by the request parser when a login or register
/// form is posted.
pub trait CredentialStore: Send + Sync {
    /// With `is_login` set, succeeds when `username` exists with this
    /// `password`. Otherwise registers `username` and succeeds when the
    /// name was still free.
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// Process-local user table.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for seeding accounts.
    pub fn with_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.into(), password.into());
        self
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        info!(user = username, login = is_login, "verifying credentials");

        if is_login {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            let ok = users.get(username).is_some_and(|stored| stored == password);
            if !ok {
                debug!(user = username, "wrong username or password");
            }
            return ok;
        }

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        match users.entry(username.to_string()) {
            Entry::Occupied(_) => {
                debug!(user = username, "username already taken");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(password.to_string());
                debug!(user = username, "registered");
                true
            }
        }
    }
}
