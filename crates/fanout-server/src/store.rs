//! Redis-backed presence, viewer sets and the domain event subscription.
//!
//! Key layout:
//!
//! | Key | Type | Contents |
//! |---|---|---|
//! | `presence:{tenant}:{user}` | string, 30 s TTL | last-seen unix millis |
//! | `viewing:{topic}` | set | user ids currently viewing the topic |

use async_trait::async_trait;
use fanout_core::store::PRESENCE_TTL;
use fanout_core::{PresenceStore, StoreError, StoreHealth, ViewerStore};
use futures_util::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const SCAN_COUNT: usize = 100;

/// Payloads received on the event channel.
pub type EventStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

fn presence_key(tenant_id: &str, user_id: &str) -> String {
    format!("presence:{}:{}", tenant_id, user_id)
}

fn presence_prefix(tenant_id: &str) -> String {
    format!("presence:{}:", tenant_id)
}

fn viewers_key(topic_id: &str) -> String {
    format!("viewing:{}", topic_id)
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Redis collaborator shared by every session.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let store = Self { client, conn };

        let mut conn = store.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to Redis");

        Ok(store)
    }

    /// Subscribe to the domain event channel.
    ///
    /// The stream ends when the subscription connection drops; callers
    /// resubscribe through [`fanout_core::Bridge::run_resubscribing`].
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    pub async fn subscribe(&self, channel: &str) -> Result<EventStream, RedisError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        info!(channel = %channel, "Subscribed to event channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn set_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            presence_key(tenant_id, user_id),
            unix_millis(),
            PRESENCE_TTL.as_secs(),
        )
        .await
        .map_err(unavailable)
    }

    async fn remove_presence(&self, tenant_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(presence_key(tenant_id, user_id))
            .await
            .map_err(unavailable)
    }

    async fn list_presence(&self, tenant_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let prefix = presence_prefix(tenant_id);
        let pattern = format!("{}*", prefix);

        let mut users = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            users.extend(
                keys.iter()
                    .filter_map(|key| key.strip_prefix(prefix.as_str()))
                    .map(str::to_string),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        users.sort();
        users.dedup();
        debug!(tenant = %tenant_id, count = users.len(), "Listed presence");
        Ok(users)
    }
}

#[async_trait]
impl ViewerStore for RedisStore {
    async fn add_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(viewers_key(topic_id), user_id)
            .await
            .map_err(unavailable)
    }

    async fn remove_viewer(&self, topic_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(viewers_key(topic_id), user_id)
            .await
            .map_err(unavailable)
    }

    async fn viewers(&self, topic_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut viewers: Vec<String> = conn
            .smembers(viewers_key(topic_id))
            .await
            .map_err(unavailable)?;
        viewers.sort();
        Ok(viewers)
    }
}

#[async_trait]
impl StoreHealth for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(presence_key("T1", "u1"), "presence:T1:u1");
        assert_eq!(presence_prefix("T1"), "presence:T1:");
        assert_eq!(viewers_key("K9"), "viewing:K9");
    }

    #[test]
    fn test_prefix_strips_only_own_tenant() {
        let prefix = presence_prefix("T1");
        assert_eq!("presence:T1:u1".strip_prefix(prefix.as_str()), Some("u1"));
        assert_eq!("presence:T10:u1".strip_prefix(prefix.as_str()), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(RedisStore::connect("not-a-url").await.is_err());
    }
}
