//! Persisted client state.
//!
//! Browser deployments keep these values in cookies; the trait abstracts that
//! away so other hosts can plug in their own storage. A transient
//! [`Service`](super::Service) bypasses the store entirely and keeps the
//! fields on the instance.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: Option<&str>);
}

pub const USER_NAME_KEY: &str = "userName";
pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const STAY_SIGNED_IN_KEY: &str = "staySignedIn";
pub const REQUESTED_LANGUAGE_KEY: &str = "requestedLanguage";
pub const PROFILE_KEY: &str = "profile";

/// In-memory credential store; the default when none is supplied.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) {
        if let Ok(mut values) = self.values.write() {
            match value {
                Some(value) => {
                    values.insert(key.to_string(), value.to_string());
                }
                None => {
                    values.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_none_removes_the_key() {
        let store = MemoryCredentialStore::new();
        store.set(AUTH_TOKEN_KEY, Some("token"));
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("token"));

        store.set(AUTH_TOKEN_KEY, None);
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
    }
}
