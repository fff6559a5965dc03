pub mod channel;
pub mod render;
pub mod service;
pub mod store;

pub use channel::{MemoryChannel, RealtimeChannel, RedisChannel};
pub use render::{render, RenderedNotification};
pub use service::{InboxPage, NotificationDraft, NotificationService};
pub use store::{MemoryNotificationStore, NotificationStore, Page, PgNotificationStore};
