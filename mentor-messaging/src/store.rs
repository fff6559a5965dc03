use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use mentor_core::schema::{conversations, messages};
use mentor_core::types::{Conversation, StoredMessage};
use mentor_core::{DbPool, Result};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Returns the conversation for `key`, creating it on first use.
    async fn get_or_create_conversation(&self, key: &str, p1: Uuid, p2: Uuid) -> Result<Conversation>;
    async fn find_conversation(&self, key: &str) -> Result<Option<Conversation>>;
    async fn conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>>;
    async fn insert_message(&self, message: &StoredMessage) -> Result<()>;
    /// Newest first.
    async fn messages(&self, conversation_id: Uuid, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<StoredMessage>>;
    async fn mark_read(&self, conversation_id: Uuid, recipient_id: Uuid) -> Result<i64>;
}

pub struct PgChatStore {
    pool: Arc<DbPool>,
}

impl PgChatStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn get_or_create_conversation(&self, key: &str, p1: Uuid, p2: Uuid) -> Result<Conversation> {
        let mut conn = self.pool.get().await?;

        let conversation = Conversation {
            id: Uuid::new_v4(),
            conversation_key: key.to_string(),
            participant1_id: p1,
            participant2_id: p2,
            last_message_at: None,
            created_at: Utc::now(),
        };
        diesel::insert_into(conversations::table)
            .values(&conversation)
            .on_conflict(conversations::conversation_key)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        let existing = conversations::table
            .filter(conversations::conversation_key.eq(key))
            .select(Conversation::as_select())
            .first(&mut conn)
            .await?;
        Ok(existing)
    }

    async fn find_conversation(&self, key: &str) -> Result<Option<Conversation>> {
        let mut conn = self.pool.get().await?;
        let conversation = conversations::table
            .filter(conversations::conversation_key.eq(key))
            .select(Conversation::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(conversation)
    }

    async fn conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let mut conn = self.pool.get().await?;
        let rows = conversations::table
            .filter(
                conversations::participant1_id
                    .eq(user_id)
                    .or(conversations::participant2_id.eq(user_id)),
            )
            .order(conversations::last_message_at.desc().nulls_last())
            .select(Conversation::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(messages::table)
            .values(message)
            .execute(&mut conn)
            .await?;

        diesel::update(conversations::table.find(message.conversation_id))
            .set(conversations::last_message_at.eq(message.created_at))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn messages(&self, conversation_id: Uuid, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<StoredMessage>> {
        let mut conn = self.pool.get().await?;
        let mut query = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::created_at.desc())
            .limit(limit)
            .select(StoredMessage::as_select())
            .into_boxed();
        if let Some(before) = before {
            query = query.filter(messages::created_at.lt(before));
        }
        Ok(query.load(&mut conn).await?)
    }

    async fn mark_read(&self, conversation_id: Uuid, recipient_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .filter(messages::recipient_id.eq(recipient_id))
                .filter(messages::read_at.is_null()),
        )
        .set(messages::read_at.eq(Utc::now()))
        .execute(&mut conn)
        .await?;
        Ok(updated as i64)
    }
}

#[derive(Default)]
struct MemoryChat {
    conversations: Vec<Conversation>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
pub struct MemoryChatStore {
    inner: Mutex<MemoryChat>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_messages(&self) -> Vec<StoredMessage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).messages.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_or_create_conversation(&self, key: &str, p1: Uuid, p2: Uuid) -> Result<Conversation> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.conversations.iter().find(|c| c.conversation_key == key) {
            return Ok(existing.clone());
        }
        let conversation = Conversation {
            id: Uuid::new_v4(),
            conversation_key: key.to_string(),
            participant1_id: p1,
            participant2_id: p2,
            last_message_at: None,
            created_at: Utc::now(),
        };
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, key: &str) -> Result<Option<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.conversations.iter().find(|c| c.conversation_key == key).cloned())
    }

    async fn conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<Conversation> = inner
            .conversations
            .iter()
            .filter(|c| c.participant1_id == user_id || c.participant2_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(rows)
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.push(message.clone());
        if let Some(conversation) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conversation.last_message_at = Some(message.created_at);
        }
        Ok(())
    }

    async fn messages(&self, conversation_id: Uuid, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<StoredMessage>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_read(&self, conversation_id: Uuid, recipient_id: Uuid) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut updated = 0;
        for message in inner.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id && m.recipient_id == recipient_id && m.read_at.is_none()
        }) {
            message.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }
}
