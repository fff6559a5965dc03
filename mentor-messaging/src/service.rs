use chrono::{DateTime, Utc};
use mentor_core::redis::user_stream_key;
use mentor_core::types::StoredMessage;
use mentor_core::{decrypt_message, encrypt_message, MentorError, Result};
use mentor_notify::RealtimeChannel;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::ChatStore;

pub const MESSAGE_EVENT: &str = "message";
pub const MAX_MESSAGE_LEN: usize = 4000;
const DEFAULT_HISTORY: i64 = 50;
const MAX_HISTORY: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub counterpart_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Same key for both directions of a pair.
pub fn conversation_key(a: &Uuid, b: &Uuid) -> String {
    let (p1, p2) = if a < b { (a, b) } else { (b, a) };
    format!("{}:{}", p1, p2)
}

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    channel: Arc<dyn RealtimeChannel>,
    master_key: String,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, channel: Arc<dyn RealtimeChannel>, master_key: String) -> Self {
        Self { store, channel, master_key }
    }

    pub async fn send_message(&self, sender_id: Uuid, recipient_id: Uuid, content: &str) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MentorError::Validation("Message content is required".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(MentorError::Validation(format!(
                "Message exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }
        if sender_id == recipient_id {
            return Err(MentorError::Validation("Cannot message yourself".to_string()));
        }

        let key = conversation_key(&sender_id, &recipient_id);
        let (p1, p2) = if sender_id < recipient_id {
            (sender_id, recipient_id)
        } else {
            (recipient_id, sender_id)
        };
        let conversation = self.store.get_or_create_conversation(&key, p1, p2).await?;

        let sealed = encrypt_message(content, &key, &self.master_key)?;
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            sender_id,
            recipient_id,
            content: sealed,
            created_at: Utc::now(),
            read_at: None,
        };
        self.store.insert_message(&stored).await?;

        let message = ChatMessage {
            id: stored.id,
            conversation_id: conversation.id,
            sender_id,
            recipient_id,
            content: content.to_string(),
            created_at: stored.created_at,
            read: false,
        };

        let payload = serde_json::json!({ "type": MESSAGE_EVENT, "message": &message });
        if let Err(e) = self
            .channel
            .publish(&user_stream_key(&recipient_id), MESSAGE_EVENT, &payload)
            .await
        {
            tracing::warn!("Failed to push message {} to {}: {}", message.id, recipient_id, e);
        }

        Ok(message)
    }

    /// Decrypted history between `user_id` and `counterpart_id`, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        counterpart_id: Uuid,
        limit: Option<i64>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        let key = conversation_key(&user_id, &counterpart_id);
        let Some(conversation) = self.store.find_conversation(&key).await? else {
            return Ok(Vec::new());
        };

        let limit = limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
        let rows = self.store.messages(conversation.id, limit, before).await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match decrypt_message(&row.content, &key, &self.master_key) {
                Ok(content) => messages.push(ChatMessage {
                    id: row.id,
                    conversation_id: row.conversation_id,
                    sender_id: row.sender_id,
                    recipient_id: row.recipient_id,
                    content,
                    created_at: row.created_at,
                    read: row.read_at.is_some(),
                }),
                Err(e) => tracing::error!("Failed to decrypt message {}: {}", row.id, e),
            }
        }
        Ok(messages)
    }

    pub async fn conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let rows = self.store.conversations_for(user_id).await?;
        Ok(rows
            .into_iter()
            .map(|c| ConversationSummary {
                id: c.id,
                counterpart_id: if c.participant1_id == user_id {
                    c.participant2_id
                } else {
                    c.participant1_id
                },
                last_message_at: c.last_message_at,
            })
            .collect())
    }

    pub async fn mark_read(&self, user_id: Uuid, counterpart_id: Uuid) -> Result<i64> {
        let key = conversation_key(&user_id, &counterpart_id);
        match self.store.find_conversation(&key).await? {
            Some(conversation) => self.store.mark_read(conversation.id, user_id).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;
    use mentor_notify::MemoryChannel;

    const MASTER: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn service() -> (ChatService, Arc<MemoryChatStore>, Arc<MemoryChannel>) {
        let store = Arc::new(MemoryChatStore::new());
        let channel = Arc::new(MemoryChannel::new());
        (
            ChatService::new(store.clone(), channel.clone(), MASTER.to_string()),
            store,
            channel,
        )
    }

    #[test]
    fn test_conversation_key_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_key(&a, &b), conversation_key(&b, &a));
    }

    #[tokio::test]
    async fn test_messages_are_encrypted_at_rest_and_pushed() {
        let (service, store, channel) = service();
        let student = Uuid::new_v4();
        let expert = Uuid::new_v4();

        service.send_message(student, expert, "Can we start 10 minutes later?").await.unwrap();

        let raw = store.raw_messages();
        assert_eq!(raw.len(), 1);
        assert!(!String::from_utf8_lossy(&raw[0].content).contains("10 minutes"));

        let pushed = channel.events_for(&user_stream_key(&expert));
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].payload["message"]["content"], "Can we start 10 minutes later?");

        let history = service.history(expert, student, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Can we start 10 minutes later?");
    }

    #[tokio::test]
    async fn test_both_directions_share_a_conversation() {
        let (service, _, _) = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        service.send_message(a, b, "hi").await.unwrap();
        service.send_message(b, a, "hello").await.unwrap();

        assert_eq!(service.conversations(a).await.unwrap().len(), 1);
        assert_eq!(service.history(a, b, None, None).await.unwrap().len(), 2);
        assert_eq!(service.mark_read(a, b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_messages_are_rejected() {
        let (service, _, _) = service();
        let a = Uuid::new_v4();
        assert!(matches!(
            service.send_message(a, Uuid::new_v4(), "   ").await,
            Err(MentorError::Validation(_))
        ));
        assert!(matches!(
            service.send_message(a, a, "hi").await,
            Err(MentorError::Validation(_))
        ));
    }
}
