use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use mentor_booking::{
    BookingAction, BookingDetails, CaptureOutcome, CreatedBooking, HoldOutcome, NewBooking,
    RefundOutcome,
};
use mentor_core::types::{ActionTexts, ActiveProfile, Booking, BookingStatus, Transaction};
use mentor_messaging::{ChatMessage, ConversationSummary};
use mentor_notify::{InboxPage, Page, RenderedNotification};
use mentor_providers::{Balance, Payout};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::ApiResult;
use crate::state::ApiState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mentor-api"
    }))
}

// Bookings

pub async fn create_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<NewBooking>,
) -> ApiResult<(StatusCode, Json<CreatedBooking>)> {
    let created = state.lifecycle.ledger.create_booking(user.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct BookingListQuery {
    #[serde(default)]
    pub role: Option<ActiveProfile>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
}

pub async fn list_bookings(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<BookingListQuery>,
) -> ApiResult<Json<Vec<Booking>>> {
    let bookings = state
        .lifecycle
        .ledger
        .list_bookings(user.user_id, params.role, params.status)
        .await?;
    Ok(Json(bookings))
}

pub async fn get_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BookingDetails>> {
    Ok(Json(state.lifecycle.ledger.get_booking(id, user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub action: BookingAction,
}

pub async fn respond_to_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<Booking>> {
    let booking = state
        .lifecycle
        .ledger
        .accept_or_reject(id, user.user_id, req.action)
        .await?;
    Ok(Json(booking))
}

pub async fn complete_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    Ok(Json(state.lifecycle.ledger.mark_completed(id, user.user_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Booking>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let booking = state
        .lifecycle
        .ledger
        .cancel(id, user.user_id, req.reason.as_deref())
        .await?;
    Ok(Json(booking))
}

// Payments

pub async fn create_hold(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HoldOutcome>> {
    Ok(Json(state.lifecycle.payments.create_hold(id, user.user_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
}

pub async fn confirm_payment(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(transaction_id): Path<Uuid>,
    body: Option<Json<ConfirmPaymentRequest>>,
) -> ApiResult<Json<Transaction>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let transaction = state
        .lifecycle
        .payments
        .confirm_and_capture(transaction_id, user.user_id, req.payment_method.as_deref())
        .await?;
    Ok(Json(transaction))
}

pub async fn capture_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CaptureOutcome>> {
    Ok(Json(state.lifecycle.payments.capture_post_session(id, user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    #[serde(default)]
    pub reason: String,
}

pub async fn refund_booking(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequestBody>,
) -> ApiResult<Json<RefundOutcome>> {
    let outcome = state
        .lifecycle
        .refunds
        .refund(id, user.user_id, &req.reason)
        .await?;
    Ok(Json(outcome))
}

pub async fn get_balance(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Balance>> {
    Ok(Json(state.lifecycle.payments.balance(user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
}

pub async fn create_payout(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<PayoutRequest>,
) -> ApiResult<Json<Payout>> {
    Ok(Json(state.lifecycle.payments.payout(user.user_id, req.amount).await?))
}

// Notifications

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub unread_only: bool,
}

pub async fn get_notifications(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<NotificationQuery>,
) -> ApiResult<Json<InboxPage>> {
    let page = Page::new(params.limit, params.offset);
    let inbox = state
        .notifications
        .list(user.user_id, page, params.unread_only)
        .await?;
    Ok(Json(inbox))
}

pub async fn get_notification_counts(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let unread = state.notifications.unread_count(user.user_id).await?;
    Ok(Json(json!({ "total_unread": unread })))
}

pub async fn mark_notification_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.notifications.mark_read(id, user.user_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn mark_all_notifications_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let updated = state.notifications.mark_all_read(user.user_id).await?;
    Ok(Json(json!({ "status": "ok", "updated": updated })))
}

pub async fn resolve_notification(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(texts): Json<ActionTexts>,
) -> ApiResult<Json<RenderedNotification>> {
    let rendered = state
        .notifications
        .resolve_prompt(id, user.user_id, texts)
        .await?;
    Ok(Json(rendered))
}

// Chat

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub counterpart_id: Uuid,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
}

pub async fn get_messages(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<MessageQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let messages = state
        .chat
        .history(user.user_id, params.counterpart_id, params.limit, params.before)
        .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
}

pub async fn send_message(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .chat
        .send_message(user.user_id, req.recipient_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct MarkMessagesReadRequest {
    pub counterpart_id: Uuid,
}

pub async fn mark_messages_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<MarkMessagesReadRequest>,
) -> ApiResult<Json<Value>> {
    let updated = state.chat.mark_read(user.user_id, req.counterpart_id).await?;
    Ok(Json(json!({ "status": "ok", "updated": updated })))
}

pub async fn get_conversations(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.chat.conversations(user.user_id).await?))
}
