use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use mentor_core::schema::notifications;
use mentor_core::types::Notification;
use mentor_core::{DbPool, Result};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;
    /// Newest first.
    async fn list(&self, recipient_id: Uuid, page: Page, unread_only: bool) -> Result<Vec<Notification>>;
    async fn count_unread(&self, recipient_id: Uuid) -> Result<i64>;
    /// Returns `false` if the notification was already read.
    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<bool>;
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<i64>;
    async fn update_meta(&self, id: Uuid, meta: serde_json::Value) -> Result<()>;
    /// Every notification of `recipient_id` whose meta names `booking_id`.
    async fn for_booking(&self, recipient_id: Uuid, booking_id: Uuid) -> Result<Vec<Notification>>;
}

pub struct PgNotificationStore {
    pool: Arc<DbPool>,
}

impl PgNotificationStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notifications::table)
            .values(notification)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let notification = notifications::table
            .find(id)
            .select(Notification::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(notification)
    }

    async fn list(&self, recipient_id: Uuid, page: Page, unread_only: bool) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let mut query = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .order(notifications::created_at.desc())
            .limit(page.limit)
            .offset(page.offset)
            .select(Notification::as_select())
            .into_boxed();

        if unread_only {
            query = query.filter(notifications::read_at.is_null());
        }

        Ok(query.load(&mut conn).await?)
    }

    async fn for_booking(&self, recipient_id: Uuid, booking_id: Uuid) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::meta.contains(serde_json::json!({ "booking_id": booking_id })))
            .select(Notification::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn count_unread(&self, recipient_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let count = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::read_at.is_null())
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::recipient_id.eq(recipient_id))
                .filter(notifications::read_at.is_null()),
        )
        .set(notifications::read_at.eq(Utc::now()))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::recipient_id.eq(recipient_id))
                .filter(notifications::read_at.is_null()),
        )
        .set(notifications::read_at.eq(Utc::now()))
        .execute(&mut conn)
        .await?;
        Ok(updated as i64)
    }

    async fn update_meta(&self, id: Uuid, meta: serde_json::Value) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(notifications::table.find(id))
            .set(notifications::meta.eq(meta))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: Mutex<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn for_recipient(&self, recipient_id: Uuid) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| n.recipient_id == recipient_id)
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().find(|n| n.id == id).cloned())
    }

    async fn list(&self, recipient_id: Uuid, page: Page, unread_only: bool) -> Result<Vec<Notification>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<Notification> = rows
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || n.read_at.is_none())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn for_booking(&self, recipient_id: Uuid, booking_id: Uuid) -> Result<Vec<Notification>> {
        let booking_id = booking_id.to_string();
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| n.meta.get("booking_id").and_then(|v| v.as_str()) == Some(booking_id.as_str()))
            .cloned()
            .collect())
    }

    async fn count_unread(&self, recipient_id: Uuid) -> Result<i64> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .filter(|n| n.recipient_id == recipient_id && n.read_at.is_none())
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        match rows
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient_id && n.read_at.is_none())
        {
            Some(row) => {
                row.read_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<i64> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut updated = 0;
        for row in rows
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && n.read_at.is_none())
        {
            row.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn update_meta(&self, id: Uuid, meta: serde_json::Value) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(row) = rows.iter_mut().find(|n| n.id == id) {
            row.meta = meta;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_is_clamped() {
        assert_eq!(Page::new(None, None), Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some(500), Some(-3)), Page { limit: 100, offset: 0 });
        assert_eq!(Page::new(Some(0), Some(40)), Page { limit: 1, offset: 40 });
    }
}
