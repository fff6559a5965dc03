//! Provider callbacks. Both endpoints verify an HMAC signature over the raw
//! body before parsing it; every rejection gets the same opaque 400.

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use mentor_core::redis::get_connection;
use mentor_core::signature::hmac_sha256_hex;
use mentor_core::{verify_stripe_signature, verify_zoom_signature, MentorError, Result};
use mentor_providers::Payout;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::ApiState;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const ZOOM_SIGNATURE_HEADER: &str = "x-zm-signature";
pub const ZOOM_TIMESTAMP_HEADER: &str = "x-zm-request-timestamp";

/// How long a processed Stripe event id is remembered.
const EVENT_DEDUP_TTL_SECS: u64 = 7 * 24 * 60 * 60;

const SUPPORTED_STRIPE_EVENTS: &[&str] = &[
    "payment_intent.succeeded",
    "refund.updated",
    "charge.refund.updated",
    "payout.created",
];

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    account: Option<String>,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct ZoomEvent {
    event: String,
    #[serde(default)]
    payload: Value,
}

fn rejected() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": { "kind": "VALIDATION", "message": "Invalid webhook" } })),
    )
        .into_response()
}

fn received() -> Response {
    Json(json!({ "received": true })).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
}

fn str_field<'a>(object: &'a Value, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| MentorError::Validation(format!("Webhook object is missing {}", field)))
}

/// Provider ids arrive as strings from Stripe and as numbers from Zoom.
fn id_field(object: &Value) -> Option<String> {
    match object.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn stripe_webhook(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.settings.stripe_webhook_secret.as_deref() else {
        tracing::warn!("Stripe webhook received but no webhook secret is configured");
        return rejected();
    };
    if let Err(e) = verify_stripe_signature(
        &body,
        header(&headers, STRIPE_SIGNATURE_HEADER),
        secret,
        Utc::now().timestamp(),
        state.settings.webhook_tolerance_secs,
    ) {
        tracing::warn!("Rejected Stripe webhook: {}", e);
        return rejected();
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Unreadable Stripe webhook body: {}", e);
            return rejected();
        }
    };
    if !SUPPORTED_STRIPE_EVENTS.contains(&event.event_type.as_str()) {
        tracing::debug!("Ignoring Stripe event {} ({})", event.id, event.event_type);
        return received();
    }
    if !claim_event(&state, &event.id).await {
        tracing::info!("Stripe event {} already processed", event.id);
        return received();
    }

    match dispatch_stripe_event(&state, &event).await {
        Ok(()) => received(),
        Err(e) => {
            // Let the provider's retry reach us again.
            release_event(&state, &event.id).await;
            ApiError(e).into_response()
        }
    }
}

async fn dispatch_stripe_event(state: &ApiState, event: &StripeEvent) -> Result<()> {
    let object = &event.data.object;
    tracing::info!("Processing Stripe event {} ({})", event.id, event.event_type);

    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let intent_id = id_field(object)
                .ok_or_else(|| MentorError::Validation("Webhook object is missing id".to_string()))?;
            state.lifecycle.payments.apply_payment_succeeded(&intent_id).await?;
        }
        "refund.updated" | "charge.refund.updated" => {
            let intent_id = str_field(object, "payment_intent")?;
            let status = str_field(object, "status")?;
            let outcome = state
                .lifecycle
                .refunds
                .apply_provider_refund(intent_id, status)
                .await?;
            tracing::info!("Refund webhook for {}: {:?}", intent_id, outcome);
        }
        "payout.created" => {
            let account = event
                .account
                .as_deref()
                .ok_or_else(|| MentorError::Validation("Payout event has no account".to_string()))?;
            let payout = Payout {
                id: str_field(object, "id")?.to_string(),
                amount_minor: object
                    .get("amount")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| MentorError::Validation("Webhook object is missing amount".to_string()))?,
                currency: str_field(object, "currency")?.to_string(),
                status: str_field(object, "status")?.to_string(),
            };
            state.lifecycle.payments.payout_created(account, payout).await?;
        }
        other => tracing::debug!("No handler for Stripe event {}", other),
    }
    Ok(())
}

/// Records the event id; false when it was already recorded. Redis
/// failures let the event through since every handler is idempotent.
async fn claim_event(state: &ApiState, event_id: &str) -> bool {
    let Some(pool) = &state.redis else {
        return true;
    };
    let mut conn = match get_connection(pool).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!("Webhook de-duplication unavailable: {}", e);
            return true;
        }
    };

    let claimed: std::result::Result<Option<String>, redis::RedisError> = redis::cmd("SET")
        .arg(format!("WEBHOOK:{}", event_id))
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(EVENT_DEDUP_TTL_SECS)
        .query_async(&mut conn)
        .await;
    match claimed {
        Ok(reply) => reply.is_some(),
        Err(e) => {
            tracing::warn!("Failed to record webhook {}: {}", event_id, e);
            true
        }
    }
}

async fn release_event(state: &ApiState, event_id: &str) {
    let Some(pool) = &state.redis else {
        return;
    };
    if let Ok(mut conn) = get_connection(pool).await {
        let _: std::result::Result<i64, redis::RedisError> = redis::cmd("DEL")
            .arg(format!("WEBHOOK:{}", event_id))
            .query_async(&mut conn)
            .await;
    }
}

pub async fn zoom_webhook(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.settings.zoom_webhook_secret.as_deref() else {
        tracing::warn!("Zoom webhook received but no webhook secret is configured");
        return rejected();
    };
    if let Err(e) = verify_zoom_signature(
        &body,
        header(&headers, ZOOM_SIGNATURE_HEADER),
        header(&headers, ZOOM_TIMESTAMP_HEADER),
        secret,
        Utc::now().timestamp(),
        state.settings.webhook_tolerance_secs,
    ) {
        tracing::warn!("Rejected Zoom webhook: {}", e);
        return rejected();
    }

    let event: ZoomEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Unreadable Zoom webhook body: {}", e);
            return rejected();
        }
    };

    match event.event.as_str() {
        "endpoint.url_validation" => {
            let Some(plain) = event.payload.get("plainToken").and_then(Value::as_str) else {
                return rejected();
            };
            match hmac_sha256_hex(secret, plain.as_bytes()) {
                Ok(encrypted) => Json(json!({
                    "plainToken": plain,
                    "encryptedToken": encrypted,
                }))
                .into_response(),
                Err(e) => {
                    tracing::error!("Could not answer Zoom validation: {}", e);
                    rejected()
                }
            }
        }
        "meeting.ended" => {
            let Some(meeting_id) = event.payload.get("object").and_then(id_field) else {
                return rejected();
            };
            match state.lifecycle.ledger.meeting_ended(&meeting_id).await {
                Ok(outcome) => {
                    tracing::info!("Meeting {} ended: {:?}", meeting_id, outcome);
                    received()
                }
                Err(e) => ApiError(e).into_response(),
            }
        }
        other => {
            tracing::debug!("Ignoring Zoom event {}", other);
            received()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_field_accepts_numbers_and_strings() {
        assert_eq!(id_field(&json!({ "id": 85746065432u64 })), Some("85746065432".to_string()));
        assert_eq!(id_field(&json!({ "id": "pi_123" })), Some("pi_123".to_string()));
        assert_eq!(id_field(&json!({ "id": null })), None);
        assert_eq!(id_field(&json!({})), None);
    }

    #[test]
    fn test_event_parsing() {
        let event: StripeEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "payout.created",
            "account": "acct_1",
            "data": { "object": { "id": "po_1", "amount": 4500, "currency": "usd", "status": "pending" } }
        }))
        .unwrap();
        assert_eq!(event.event_type, "payout.created");
        assert_eq!(event.account.as_deref(), Some("acct_1"));
        assert_eq!(str_field(&event.data.object, "currency").unwrap(), "usd");
        assert!(str_field(&event.data.object, "payment_intent").is_err());
    }
}
