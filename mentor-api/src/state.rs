use mentor_booking::Lifecycle;
use mentor_core::{Config, RedisPool};
use mentor_messaging::ChatService;
use mentor_notify::NotificationService;
use std::sync::Arc;

/// Secrets and limits the HTTP layer needs at request time.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub jwt_secret: String,
    pub stripe_webhook_secret: Option<String>,
    pub zoom_webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

impl ApiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwt_secret: config.server.jwt_secret.clone(),
            stripe_webhook_secret: config.stripe.webhook_secret.clone(),
            zoom_webhook_secret: config.zoom.webhook_secret.clone(),
            webhook_tolerance_secs: config.stripe.webhook_tolerance_secs,
        }
    }
}

/// Shared handles injected into every handler through an `Extension`.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Lifecycle,
    pub notifications: Arc<NotificationService>,
    pub chat: Arc<ChatService>,
    pub settings: Arc<ApiSettings>,
    /// Backs the websocket relay and webhook de-duplication. Without it
    /// sockets are refused and every webhook delivery is processed.
    pub redis: Option<RedisPool>,
}
