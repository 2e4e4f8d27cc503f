//! OAuth state management for CSRF protection.
//!
//! Manages the single-use state tokens that bind an authorization request to
//! its callback. Tokens carry 256 bits from the OS CSPRNG and are consumed
//! atomically: lookup removes the entry under the lock before anything else
//! happens, so of two concurrent callbacks presenting the same token exactly
//! one can succeed.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Bytes of CSPRNG output per state token (256 bits).
const STATE_TOKEN_BYTES: usize = 32;

/// A pending authorization, keyed by its state token.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub owner: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// In-memory state store with automatic expiration.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    ttl: Duration,
}

impl StateManager {
    /// Creates a state manager whose tokens expire after `ttl_seconds`
    /// (default in config: 600 = 10 minutes).
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Generates and stores a fresh state token for a pending authorization.
    ///
    /// Returns the hex-encoded token (64 chars, 256 bits of entropy).
    pub fn create_state(&self, owner: &str, provider: &str) -> String {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let created_at = Utc::now();
        let entry = StateEntry {
            owner: owner.to_string(),
            provider: provider.to_string(),
            created_at,
            expires_at: created_at + self.ttl,
        };

        let mut states = self.states.lock().unwrap();
        states.insert(token.clone(), entry);

        token
    }

    /// Atomically consumes a state token.
    ///
    /// The entry is removed before the expiry check, so a token is gone
    /// after its first presentation even when expired — a crashed or
    /// duplicate callback can never replay it. Returns `None` if the token
    /// is unknown or past its expiry.
    pub fn validate_and_consume(&self, token: &str) -> Option<StateEntry> {
        let mut states = self.states.lock().unwrap();

        let entry = states.remove(token)?;

        if Utc::now() > entry.expires_at {
            return None;
        }

        Some(entry)
    }

    /// Drops expired entries. Called periodically by the cleanup task.
    pub fn cleanup_expired(&self) {
        let mut states = self.states.lock().unwrap();
        let now = Utc::now();

        states.retain(|_, entry| now <= entry.expires_at);
    }

    /// Count of pending states (monitoring).
    pub fn count(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    #[cfg(test)]
    fn insert_raw(&self, token: &str, entry: StateEntry) {
        self.states.lock().unwrap().insert(token.to_string(), entry);
    }
}

/// Background task that garbage-collects expired states.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(pending = manager.count(), "OAuth state cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_consume_state() {
        let manager = StateManager::new(600);

        let token = manager.create_state("alice", "chatops");
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));

        let entry = manager.validate_and_consume(&token).unwrap();
        assert_eq!(entry.owner, "alice");
        assert_eq!(entry.provider, "chatops");
    }

    #[test]
    fn state_is_single_use() {
        let manager = StateManager::new(600);
        let token = manager.create_state("alice", "chatops");

        assert!(manager.validate_and_consume(&token).is_some());
        assert!(manager.validate_and_consume(&token).is_none());
    }

    #[test]
    fn unknown_state_rejected() {
        let manager = StateManager::new(600);
        assert!(manager.validate_and_consume("deadbeef").is_none());
    }

    #[test]
    fn tokens_are_unique() {
        let manager = StateManager::new(600);
        let a = manager.create_state("alice", "chatops");
        let b = manager.create_state("alice", "chatops");
        assert_ne!(a, b);
    }

    #[test]
    fn expired_state_rejected_even_though_present() {
        let manager = StateManager::new(600);

        // Entry exists in the store but its expiry is in the past.
        let created_at = Utc::now() - Duration::seconds(700);
        manager.insert_raw(
            "a1b2c3",
            StateEntry {
                owner: "alice".to_string(),
                provider: "chatops".to_string(),
                created_at,
                expires_at: created_at + Duration::seconds(600),
            },
        );
        assert_eq!(manager.count(), 1);

        assert!(manager.validate_and_consume("a1b2c3").is_none());

        // Consumed on presentation despite being expired.
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn cleanup_removes_expired_only() {
        let manager = StateManager::new(600);

        let live = manager.create_state("alice", "chatops");
        let created_at = Utc::now() - Duration::seconds(700);
        manager.insert_raw(
            "expired",
            StateEntry {
                owner: "bob".to_string(),
                provider: "tracker".to_string(),
                created_at,
                expires_at: created_at + Duration::seconds(600),
            },
        );
        assert_eq!(manager.count(), 2);

        manager.cleanup_expired();
        assert_eq!(manager.count(), 1);
        assert!(manager.validate_and_consume(&live).is_some());
    }
}
