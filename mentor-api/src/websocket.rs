use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use mentor_core::redis::{get_connection, user_stream_key};
use mentor_core::RedisPool;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::verify_token;
use crate::state::ApiState;

const READ_BLOCK_MS: usize = 1000;
const READ_BATCH: usize = 100;

/// Browsers cannot set headers on a websocket upgrade, so the bearer
/// token travels in the query string.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
    /// Resume after this stream entry instead of only new ones.
    #[serde(default)]
    pub last_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<ApiState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user_id = match verify_token(&query.token, &state.settings.jwt_secret) {
        Ok(id) => id,
        Err(status) => return status.into_response(),
    };
    let Some(pool) = state.redis.clone() else {
        tracing::warn!("WebSocket refused for {}: real-time channel not configured", user_id);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, pool, query.last_id))
}

/// Id of the newest entry, so a fresh connection only sees what comes next.
async fn latest_entry_id(pool: &RedisPool, stream_key: &str) -> String {
    let newest: Option<StreamRangeReply> = match get_connection(pool).await {
        Ok(mut conn) => conn.xrevrange_count(stream_key, "+", "-", 1).await.ok(),
        Err(_) => None,
    };
    newest
        .and_then(|reply| reply.ids.into_iter().next())
        .map(|entry| entry.id)
        .unwrap_or_else(|| "0-0".to_string())
}

async fn handle_socket(socket: WebSocket, user_id: Uuid, pool: RedisPool, resume_from: Option<String>) {
    tracing::info!("WebSocket connection established for user: {}", user_id);

    let (mut sender, mut receiver) = socket.split();
    let stream_key = user_stream_key(&user_id);
    let mut last_id = match resume_from {
        Some(id) => id,
        None => latest_entry_id(&pool, &stream_key).await,
    };

    // Forward the user's stream to the socket
    let mut send_task = tokio::spawn(async move {
        let options = StreamReadOptions::default().block(READ_BLOCK_MS).count(READ_BATCH);
        loop {
            let mut conn = match get_connection(&pool).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to get Redis connection: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            let result: redis::RedisResult<Option<StreamReadReply>> = conn
                .xread_options(&[stream_key.as_str()], &[last_id.as_str()], &options)
                .await;

            match result {
                Ok(Some(reply)) => {
                    for key in reply.keys {
                        for entry in key.ids {
                            last_id = entry.id.clone();
                            let Some(data) = entry.get::<String>("data") else {
                                continue;
                            };
                            if let Err(e) = sender.send(Message::Text(data)).await {
                                tracing::debug!("WebSocket send failed: {}", e);
                                return;
                            }
                        }
                    }
                }
                // Block timed out with nothing new
                Ok(None) => continue,
                Err(e) if e.kind() == redis::ErrorKind::TypeError => continue,
                Err(e) => {
                    tracing::error!("Redis stream read error: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    // Pings are answered by axum; only a close ends the session
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("WebSocket connection closed for user: {}", user_id);
}
