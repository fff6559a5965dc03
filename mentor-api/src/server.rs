use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use std::env;
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;
use crate::state::ApiState;
use crate::webhooks;
use crate::websocket;

fn cors_layer() -> CorsLayer {
    // Allow specific origins, or all if CORS_ORIGINS is not set
    if let Ok(origins) = env::var("CORS_ORIGINS") {
        let mut cors = CorsLayer::new();
        for origin in origins.split(',').map(|s| s.trim()) {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
        CorsLayer::permissive()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::websocket_handler))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/webhooks/zoom", post(webhooks::zoom_webhook))
        .route(
            "/api/v1/bookings",
            get(handlers::list_bookings).post(handlers::create_booking),
        )
        .route("/api/v1/bookings/:id", get(handlers::get_booking))
        .route("/api/v1/bookings/:id/respond", post(handlers::respond_to_booking))
        .route("/api/v1/bookings/:id/complete", post(handlers::complete_booking))
        .route("/api/v1/bookings/:id/cancel", post(handlers::cancel_booking))
        .route("/api/v1/bookings/:id/hold", post(handlers::create_hold))
        .route("/api/v1/bookings/:id/capture", post(handlers::capture_booking))
        .route("/api/v1/bookings/:id/refund", post(handlers::refund_booking))
        .route("/api/v1/transactions/:id/confirm", post(handlers::confirm_payment))
        .route("/api/v1/payments/balance", get(handlers::get_balance))
        .route("/api/v1/payments/payout", post(handlers::create_payout))
        .route("/api/v1/notifications", get(handlers::get_notifications))
        .route("/api/v1/notifications/counts", get(handlers::get_notification_counts))
        .route("/api/v1/notifications/read-all", post(handlers::mark_all_notifications_read))
        .route("/api/v1/notifications/:id/read", post(handlers::mark_notification_read))
        .route("/api/v1/notifications/:id/resolve", post(handlers::resolve_notification))
        .route(
            "/api/v1/messages",
            get(handlers::get_messages).post(handlers::send_message),
        )
        .route("/api/v1/messages/read", post(handlers::mark_messages_read))
        .route("/api/v1/conversations", get(handlers::get_conversations))
        .layer(
            // Outermost first: CORS must answer preflights before auth runs
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer())
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

/// Serves the API until `shutdown` resolves.
pub async fn run<F>(state: ApiState, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    tracing::info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
