use anyhow::{Context, Result};
use mentor_api::{ApiSettings, ApiState};
use mentor_booking::{BookingLocks, Lifecycle, LifecycleDeps, PgBookingStore};
use mentor_core::{AppContext, Config};
use mentor_messaging::{ChatService, PgChatStore};
use mentor_notify::{NotificationService, PgNotificationStore, RedisChannel};
use mentor_providers::{StripeClient, ZoomClient};
use std::net::SocketAddr;
use std::sync::Arc;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting mentorship booking service");

    let config = Config::from_env();
    let ctx = AppContext::new(config).await?;
    tracing::info!("Application context initialized");

    let stripe = StripeClient::new(&ctx.config.stripe)?;
    let zoom = ZoomClient::new(&ctx.config.zoom)?;
    if !zoom.is_enabled() {
        tracing::warn!("Zoom credentials not set; accepted bookings will have no meeting link");
    }

    let channel = Arc::new(RedisChannel::new(ctx.redis_pool.clone()));
    let notifications = Arc::new(NotificationService::new(
        Arc::new(PgNotificationStore::new(ctx.db_pool.clone())),
        channel.clone(),
    ));
    let chat = Arc::new(ChatService::new(
        Arc::new(PgChatStore::new(ctx.db_pool.clone())),
        channel,
        ctx.config.server.encryption_key.clone(),
    ));

    let lifecycle = Lifecycle::new(LifecycleDeps {
        store: Arc::new(PgBookingStore::new(ctx.db_pool.clone())),
        payments: Arc::new(stripe),
        meetings: Arc::new(zoom),
        notifier: notifications.clone(),
        locks: Arc::new(BookingLocks::new()),
        currency: ctx.config.stripe.currency.clone(),
    });

    let state = ApiState {
        lifecycle,
        notifications,
        chat,
        settings: Arc::new(ApiSettings::from_config(&ctx.config)),
        redis: Some(ctx.redis_pool.clone()),
    };

    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.api_port)
        .parse()
        .context("SERVER_HOST/API_PORT do not form a valid socket address")?;

    mentor_api::run(state, addr, shutdown_signal()).await?;

    tracing::info!("Mentorship booking service stopped");
    Ok(())
}
