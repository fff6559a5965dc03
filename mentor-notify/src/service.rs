use chrono::Utc;
use mentor_core::redis::user_stream_key;
use mentor_core::types::{ActionTexts, Notification, NotificationMeta};
use mentor_core::{MentorError, Result};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::channel::RealtimeChannel;
use crate::render::{default_copy, render, RenderedNotification};
use crate::store::{NotificationStore, Page};

pub const NOTIFICATION_EVENT: &str = "notification";

/// A notification about to be emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub sender_id: Option<Uuid>,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    pub image: Option<String>,
    pub meta: NotificationMeta,
}

impl NotificationDraft {
    /// Draft with the default copy for the meta's kind.
    pub fn new(sender_id: Option<Uuid>, recipient_id: Uuid, meta: NotificationMeta) -> Self {
        let (title, message) = default_copy(&meta);
        Self {
            sender_id,
            recipient_id,
            title,
            message,
            image: None,
            meta,
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxPage {
    pub notifications: Vec<RenderedNotification>,
    pub unread: i64,
    pub limit: i64,
    pub offset: i64,
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    channel: Arc<dyn RealtimeChannel>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, channel: Arc<dyn RealtimeChannel>) -> Self {
        Self { store, channel }
    }

    /// Persists the notification, then pushes it to the recipient.
    ///
    /// Only the insert can fail the call; the counter and the push are
    /// logged and dropped on error.
    pub async fn notify(&self, draft: NotificationDraft) -> Result<Notification> {
        let meta = serde_json::to_value(&draft.meta).map_err(anyhow::Error::from)?;
        let notification = Notification {
            id: Uuid::new_v4(),
            kind: draft.meta.kind(),
            sender_id: draft.sender_id,
            recipient_id: draft.recipient_id,
            title: draft.title,
            message: draft.message,
            image: draft.image,
            meta,
            read_at: None,
            created_at: Utc::now(),
        };

        self.store.insert(&notification).await?;
        tracing::debug!(
            "Stored {} notification {} for {}",
            notification.kind,
            notification.id,
            notification.recipient_id
        );

        if let Err(e) = self.channel.adjust_unread(&notification.recipient_id, 1).await {
            tracing::warn!("Failed to bump unread count for {}: {}", notification.recipient_id, e);
        }

        let payload = serde_json::json!({
            "type": NOTIFICATION_EVENT,
            "notification": render(&notification),
        });
        if let Err(e) = self
            .channel
            .publish(&user_stream_key(&notification.recipient_id), NOTIFICATION_EVENT, &payload)
            .await
        {
            tracing::warn!("Failed to publish notification {}: {}", notification.id, e);
        }

        Ok(notification)
    }

    /// Fire-and-forget variant for callers whose own state change has
    /// already committed.
    pub async fn emit(&self, draft: NotificationDraft) {
        let kind = draft.meta.kind();
        let recipient = draft.recipient_id;
        if let Err(e) = self.notify(draft).await {
            tracing::error!("Failed to emit {} notification to {}: {}", kind, recipient, e);
        }
    }

    pub async fn list(&self, recipient_id: Uuid, page: Page, unread_only: bool) -> Result<InboxPage> {
        let rows = self.store.list(recipient_id, page, unread_only).await?;
        let unread = self.unread_count(recipient_id).await?;

        Ok(InboxPage {
            notifications: rows.iter().map(render).collect(),
            unread,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Redis counter when reachable, falling back to a count of the table.
    pub async fn unread_count(&self, recipient_id: Uuid) -> Result<i64> {
        match self.channel.unread(&recipient_id).await {
            Ok(count) => Ok(count),
            Err(e) => {
                tracing::warn!("Unread counter unavailable for {}: {}", recipient_id, e);
                self.store.count_unread(recipient_id).await
            }
        }
    }

    pub async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<()> {
        let notification = self.owned(notification_id, recipient_id).await?;
        if self.store.mark_read(notification.id, recipient_id).await? {
            if let Err(e) = self.channel.adjust_unread(&recipient_id, -1).await {
                tracing::warn!("Failed to decrement unread count for {}: {}", recipient_id, e);
            }
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<i64> {
        let updated = self.store.mark_all_read(recipient_id).await?;
        if updated > 0 {
            if let Err(e) = self.channel.adjust_unread(&recipient_id, -updated).await {
                tracing::warn!("Failed to reset unread count for {}: {}", recipient_id, e);
            }
        }
        Ok(updated)
    }

    /// Disables a prompt so it renders `texts` instead of its actions.
    pub async fn resolve_prompt(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
        texts: ActionTexts,
    ) -> Result<RenderedNotification> {
        let mut notification = self.owned(notification_id, recipient_id).await?;
        let mut meta = notification
            .parsed_meta()
            .map_err(|e| anyhow::anyhow!("Notification {} has unreadable meta: {}", notification.id, e))?;

        if !meta.resolve(texts) {
            return Err(MentorError::Validation(
                "Notification has no actions to resolve".to_string(),
            ));
        }

        notification.meta = serde_json::to_value(&meta).map_err(anyhow::Error::from)?;
        self.store
            .update_meta(notification.id, notification.meta.clone())
            .await?;
        Ok(render(&notification))
    }

    /// Resolves every open prompt of `recipient_id` tied to `booking_id`.
    pub async fn resolve_booking_prompts(&self, recipient_id: Uuid, booking_id: Uuid, texts: ActionTexts) {
        let rows = match self.store.for_booking(recipient_id, booking_id).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Could not load prompts for booking {}: {}", booking_id, e);
                return;
            }
        };

        for row in rows {
            let Ok(mut meta) = row.parsed_meta() else { continue };
            if !meta.is_prompt() {
                continue;
            }
            if !meta.resolve(texts.clone()) {
                continue;
            }
            let value = match serde_json::to_value(&meta) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Err(e) = self.store.update_meta(row.id, value).await {
                tracing::warn!("Failed to resolve prompt {}: {}", row.id, e);
            }
        }
    }

    async fn owned(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<Notification> {
        let notification = self
            .store
            .get(notification_id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Notification not found".to_string()))?;
        if notification.recipient_id != recipient_id {
            return Err(MentorError::Permission(
                "Notification belongs to another user".to_string(),
            ));
        }
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::store::MemoryNotificationStore;

    fn service() -> (NotificationService, Arc<MemoryNotificationStore>, Arc<MemoryChannel>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let channel = Arc::new(MemoryChannel::new());
        (NotificationService::new(store.clone(), channel.clone()), store, channel)
    }

    fn request_draft(recipient: Uuid, booking_id: Uuid) -> NotificationDraft {
        NotificationDraft::new(
            Some(Uuid::new_v4()),
            recipient,
            NotificationMeta::BookingRequested { booking_id, disabled: false, texts: None },
        )
    }

    #[tokio::test]
    async fn test_notify_persists_and_publishes() {
        let (service, store, channel) = service();
        let recipient = Uuid::new_v4();

        let notification = service.notify(request_draft(recipient, Uuid::new_v4())).await.unwrap();

        assert_eq!(store.for_recipient(recipient).len(), 1);
        let events = channel.events_for(&user_stream_key(&recipient));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, NOTIFICATION_EVENT);
        assert_eq!(events[0].payload["notification"]["id"], notification.id.to_string());
        assert_eq!(service.unread_count(recipient).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_propagated() {
        let (service, store, channel) = service();
        channel.set_offline(true);
        let recipient = Uuid::new_v4();

        assert!(service.notify(request_draft(recipient, Uuid::new_v4())).await.is_ok());
        assert_eq!(store.for_recipient(recipient).len(), 1);
        // Counter is down, so the table is counted instead.
        assert_eq!(service.unread_count(recipient).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_scoped_to_recipient() {
        let (service, _, _) = service();
        let recipient = Uuid::new_v4();
        let notification = service.notify(request_draft(recipient, Uuid::new_v4())).await.unwrap();

        let err = service.mark_read(notification.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MentorError::Permission(_)));

        service.mark_read(notification.id, recipient).await.unwrap();
        service.mark_read(notification.id, recipient).await.unwrap();
        assert_eq!(service.unread_count(recipient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolve_prompt() {
        let (service, _, _) = service();
        let recipient = Uuid::new_v4();
        let prompt = service.notify(request_draft(recipient, Uuid::new_v4())).await.unwrap();

        let rendered = service
            .resolve_prompt(
                prompt.id,
                recipient,
                ActionTexts { primary: "Accepted".to_string(), secondary: None },
            )
            .await
            .unwrap();
        assert!(rendered.actions.is_empty());

        let plain = service
            .notify(NotificationDraft::new(
                None,
                recipient,
                NotificationMeta::SessionCompleted { booking_id: Uuid::new_v4() },
            ))
            .await
            .unwrap();
        let err = service
            .resolve_prompt(plain.id, recipient, ActionTexts { primary: "x".to_string(), secondary: None })
            .await
            .unwrap_err();
        assert!(matches!(err, MentorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_resolve_booking_prompts_only_touches_that_booking() {
        let (service, store, _) = service();
        let recipient = Uuid::new_v4();
        let booking = Uuid::new_v4();
        service.notify(request_draft(recipient, booking)).await.unwrap();
        service.notify(request_draft(recipient, Uuid::new_v4())).await.unwrap();

        service
            .resolve_booking_prompts(recipient, booking, ActionTexts { primary: "Accepted".to_string(), secondary: None })
            .await;

        let disabled: Vec<bool> = store
            .for_recipient(recipient)
            .iter()
            .map(|n| n.meta["disabled"].as_bool().unwrap_or(false))
            .collect();
        assert_eq!(disabled.iter().filter(|d| **d).count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_booking_prompts_reaches_old_prompts() {
        let (service, store, _) = service();
        let recipient = Uuid::new_v4();
        let booking = Uuid::new_v4();
        let prompt = service.notify(request_draft(recipient, booking)).await.unwrap();
        for _ in 0..crate::store::MAX_PAGE_SIZE + 5 {
            service
                .notify(NotificationDraft::new(
                    None,
                    recipient,
                    NotificationMeta::SessionCompleted { booking_id: Uuid::new_v4() },
                ))
                .await
                .unwrap();
        }

        service
            .resolve_booking_prompts(recipient, booking, ActionTexts { primary: "Rejected".to_string(), secondary: None })
            .await;

        let row = store.get(prompt.id).await.unwrap().unwrap();
        assert_eq!(row.meta["disabled"], true);
        assert_eq!(row.meta["texts"]["primary"], "Rejected");
    }
}
