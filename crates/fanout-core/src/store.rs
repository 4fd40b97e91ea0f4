//! Presence and viewer-set collaborators.
//!
//! These stores are shared by every hub instance of a deployment. The core
//! treats them as best-effort side channels: callers log failures and carry on.
//!
//! [`MemoryStore`] is a single-process implementation used for development
//! and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// How long a presence record lives without a heartbeat.
pub const PRESENCE_TTL: Duration = Duration::from_secs(30);

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the command.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backing store did not answer in time.
    #[error("Store timed out")]
    Timeout,
}

/// Per-tenant "who is online" records with a TTL.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Create or refresh the record for a user.
    async fn set_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn remove_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// Users with a live record in the tenant.
    async fn list_presence(&self, tenant_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Per-topic sets of viewing users.
#[async_trait]
pub trait ViewerStore: Send + Sync {
    async fn add_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn remove_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn viewers(&self, topic_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Reachability probe for the liveness endpoint.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Presence records of one tenant.
#[derive(Debug, Default)]
struct TenantPresence {
    /// User id to last refresh.
    last_seen: HashMap<String, Instant>,
}

impl TenantPresence {
    fn touch(&mut self, user_id: &str) {
        self.last_seen.insert(user_id.to_string(), Instant::now());
    }

    fn leave(&mut self, user_id: &str) -> bool {
        self.last_seen.remove(user_id).is_some()
    }

    /// Drop records older than `ttl`, returning how many were removed.
    fn prune_stale(&mut self, ttl: Duration) -> usize {
        let before = self.last_seen.len();
        self.last_seen.retain(|_, seen| seen.elapsed() <= ttl);
        before - self.last_seen.len()
    }

    fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// In-process presence and viewer store.
#[derive(Debug)]
pub struct MemoryStore {
    presence: DashMap<String, TenantPresence>,
    viewers: DashMap<String, BTreeSet<String>>,
    ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_ttl(PRESENCE_TTL)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a custom presence TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            presence: DashMap::new(),
            viewers: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn set_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.presence
            .entry(tenant_id.to_string())
            .or_default()
            .touch(user_id);
        Ok(())
    }

    async fn remove_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError> {
        let emptied = match self.presence.get_mut(tenant_id) {
            Some(mut tenant) => {
                tenant.leave(user_id);
                tenant.is_empty()
            }
            None => false,
        };
        if emptied {
            self.presence.remove_if(tenant_id, |_, tenant| tenant.is_empty());
        }
        Ok(())
    }

    async fn list_presence(&self, tenant_id: &str) -> Result<Vec<String>, StoreError> {
        let Some(mut tenant) = self.presence.get_mut(tenant_id) else {
            return Ok(Vec::new());
        };
        let pruned = tenant.prune_stale(self.ttl);
        if pruned > 0 {
            debug!(tenant = %tenant_id, pruned, "Pruned stale presence");
        }
        let mut users: Vec<String> = tenant.last_seen.keys().cloned().collect();
        users.sort_unstable();
        Ok(users)
    }
}

#[async_trait]
impl ViewerStore for MemoryStore {
    async fn add_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.viewers
            .entry(topic_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn remove_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError> {
        let emptied = match self.viewers.get_mut(topic_id) {
            Some(mut set) => {
                set.remove(user_id);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            self.viewers.remove_if(topic_id, |_, set| set.is_empty());
        }
        Ok(())
    }

    async fn viewers(&self, topic_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .viewers
            .get(topic_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
