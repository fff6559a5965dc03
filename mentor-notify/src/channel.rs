use async_trait::async_trait;
use mentor_core::redis::{append_to_stream, get_connection, unread_key};
use mentor_core::{RedisPool, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Push side of the real-time connection plus the per-user unread counter.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &serde_json::Value) -> Result<()>;

    /// Adds `delta` to the recipient's unread counter, never going below zero.
    async fn adjust_unread(&self, user_id: &Uuid, delta: i64) -> Result<i64>;

    async fn unread(&self, user_id: &Uuid) -> Result<i64>;
}

pub struct RedisChannel {
    pool: RedisPool,
}

impl RedisChannel {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RealtimeChannel for RedisChannel {
    async fn publish(&self, channel: &str, event: &str, payload: &serde_json::Value) -> Result<()> {
        let data = serde_json::to_string(payload).map_err(anyhow::Error::from)?;
        append_to_stream(&self.pool, channel, event, &data).await?;
        Ok(())
    }

    async fn adjust_unread(&self, user_id: &Uuid, delta: i64) -> Result<i64> {
        let mut conn = get_connection(&self.pool).await?;
        let key = unread_key(user_id);

        let value: i64 = redis::cmd("INCRBY")
            .arg(&key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;

        if value < 0 {
            redis::cmd("SET")
                .arg(&key)
                .arg(0)
                .query_async::<()>(&mut conn)
                .await
                .map_err(anyhow::Error::from)?;
            return Ok(0);
        }
        Ok(value)
    }

    async fn unread(&self, user_id: &Uuid) -> Result<i64> {
        let mut conn = get_connection(&self.pool).await?;
        let value: Option<i64> = redis::cmd("GET")
            .arg(unread_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(value.unwrap_or(0).max(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Channel kept in memory, used by tests and local runs without Redis.
#[derive(Default)]
pub struct MemoryChannel {
    events: Mutex<Vec<PublishedEvent>>,
    unread: Mutex<HashMap<Uuid, i64>>,
    offline: Mutex<bool>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, as if the broker were down.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|e| e.into_inner()) = offline;
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, channel: &str) -> Vec<PublishedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.channel == channel)
            .collect()
    }

    fn check_online(&self) -> Result<()> {
        if *self.offline.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(anyhow::anyhow!("realtime channel is offline").into());
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeChannel for MemoryChannel {
    async fn publish(&self, channel: &str, event: &str, payload: &serde_json::Value) -> Result<()> {
        self.check_online()?;
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedEvent {
                channel: channel.to_string(),
                event: event.to_string(),
                payload: payload.clone(),
            });
        Ok(())
    }

    async fn adjust_unread(&self, user_id: &Uuid, delta: i64) -> Result<i64> {
        self.check_online()?;
        let mut unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
        let value = unread.entry(*user_id).or_insert(0);
        *value = (*value + delta).max(0);
        Ok(*value)
    }

    async fn unread(&self, user_id: &Uuid) -> Result<i64> {
        self.check_online()?;
        let unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
        Ok(unread.get(user_id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unread_counter_floors_at_zero() {
        let channel = MemoryChannel::new();
        let user = Uuid::new_v4();
        assert_eq!(channel.adjust_unread(&user, 2).await.unwrap(), 2);
        assert_eq!(channel.adjust_unread(&user, -5).await.unwrap(), 0);
        assert_eq!(channel.unread(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_channel_fails() {
        let channel = MemoryChannel::new();
        channel.set_offline(true);
        assert!(channel
            .publish("STREAM:USER:x", "notification", &serde_json::json!({}))
            .await
            .is_err());
        assert!(channel.events().is_empty());
    }
}
