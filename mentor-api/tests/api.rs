use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use mentor_api::auth::generate_token;
use mentor_api::{router, ApiSettings, ApiState};
use mentor_booking::store::BookingStore;
use mentor_booking::{BookingLocks, Lifecycle, LifecycleDeps, MemoryBookingStore};
use mentor_core::signature::hmac_sha256_hex;
use mentor_core::types::{ActiveProfile, BookingStatus, ExpertProfile, TransactionStatus, User};
use mentor_messaging::{ChatService, MemoryChatStore};
use mentor_notify::{MemoryChannel, MemoryNotificationStore, NotificationService};
use mentor_providers::fake::{FakeMeetingProvider, FakePaymentProvider};
use mentor_providers::IntentStatus;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test-jwt-secret";
const STRIPE_SECRET: &str = "whsec_test";
const ZOOM_SECRET: &str = "zoom_test";

struct TestApp {
    app: Router,
    store: Arc<MemoryBookingStore>,
    provider: Arc<FakePaymentProvider>,
    student: Uuid,
    expert: Uuid,
    pending_expert: Uuid,
}

fn user(name: &str, role: ActiveProfile) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        image: None,
        active_profile: role,
        timezone: Some("UTC".to_string()),
        created_at: Utc::now(),
    }
}

fn expert_profile(user_id: Uuid, onboarded: bool) -> ExpertProfile {
    ExpertProfile {
        user_id,
        stripe_account_id: Some(format!("acct_{}", user_id.simple())),
        is_onboard_completed: onboarded,
        hourly_rate: Some(dec!(50)),
        updated_at: Utc::now(),
    }
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryBookingStore::new());
    let provider = Arc::new(FakePaymentProvider::new());
    let channel = Arc::new(MemoryChannel::new());
    let notifications = Arc::new(NotificationService::new(
        Arc::new(MemoryNotificationStore::new()),
        channel.clone(),
    ));

    let student = user("Sam", ActiveProfile::Student);
    let expert = user("Erin", ActiveProfile::Expert);
    let pending_expert = user("Pat", ActiveProfile::Expert);
    store.add_expert_profile(expert_profile(expert.id, true));
    store.add_expert_profile(expert_profile(pending_expert.id, false));
    let ids = (student.id, expert.id, pending_expert.id);
    store.add_user(student);
    store.add_user(expert);
    store.add_user(pending_expert);

    let lifecycle = Lifecycle::new(LifecycleDeps {
        store: store.clone(),
        payments: provider.clone(),
        meetings: Arc::new(FakeMeetingProvider::new()),
        notifier: notifications.clone(),
        locks: Arc::new(BookingLocks::new()),
        currency: "usd".to_string(),
    });
    let chat = Arc::new(ChatService::new(
        Arc::new(MemoryChatStore::new()),
        channel,
        "test-master-key".to_string(),
    ));

    let state = ApiState {
        lifecycle,
        notifications,
        chat,
        settings: Arc::new(ApiSettings {
            jwt_secret: JWT_SECRET.to_string(),
            stripe_webhook_secret: Some(STRIPE_SECRET.to_string()),
            zoom_webhook_secret: Some(ZOOM_SECRET.to_string()),
            webhook_tolerance_secs: 300,
        }),
        redis: None,
    };

    TestApp {
        app: router(state),
        store,
        provider,
        student: ids.0,
        expert: ids.1,
        pending_expert: ids.2,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            let token = generate_token(user, JWT_SECRET, 1).unwrap();
            req = req.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(req.body(body).unwrap()).await
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create_booking(&self, expert: Uuid) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/api/v1/bookings",
            Some(self.student),
            Some(json!({
                "expert_id": expert,
                "date": "2030-03-01",
                "time": "09:30",
                "duration_minutes": 45,
                "details": "Async Rust review",
                "amount": "50.00"
            })),
        )
        .await
    }

    async fn stripe_event(&self, event: Value, secret: &str) -> (StatusCode, Value) {
        let payload = event.to_string();
        let ts = Utc::now().timestamp();
        let signature = hmac_sha256_hex(secret, format!("{}.{}", ts, payload).as_bytes()).unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header("stripe-signature", format!("t={},v1={}", ts, signature))
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap();
        self.send(req).await
    }

    async fn zoom_event(&self, event: Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let ts = Utc::now().timestamp();
        let signature = hmac_sha256_hex(ZOOM_SECRET, format!("v0:{}:{}", ts, payload).as_bytes()).unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/webhooks/zoom")
            .header("x-zm-signature", format!("v0={}", signature))
            .header("x-zm-request-timestamp", ts.to_string())
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap();
        self.send(req).await
    }
}

fn uuid_at(value: &Value, pointer: &str) -> Uuid {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no uuid at {} in {}", pointer, value))
}

#[tokio::test]
async fn test_health_is_public_and_api_requires_token() {
    let app = test_app();

    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.call("GET", "/api/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/v1/bookings")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_booking_flow_over_http() {
    let app = test_app();

    let (status, created) = app.create_booking(app.expert).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["booking"]["status"], "PENDING");
    assert!(created["hold"]["client_secret"].is_string());
    let booking_id = uuid_at(&created, "/booking/id");
    let transaction_id = uuid_at(&created, "/transaction/id");

    let (status, tx) = app
        .call(
            "POST",
            &format!("/api/v1/transactions/{}/confirm", transaction_id),
            Some(app.student),
            Some(json!({ "payment_method": "pm_card_visa" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["status"], "COMPLETED");

    let (status, body) = app
        .call(
            "POST",
            &format!("/api/v1/bookings/{}/respond", booking_id),
            Some(app.student),
            Some(json!({ "action": "accept" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "PERMISSION");

    let (status, booking) = app
        .call(
            "POST",
            &format!("/api/v1/bookings/{}/respond", booking_id),
            Some(app.expert),
            Some(json!({ "action": "accept" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "UPCOMING");
    assert!(booking["meeting_link"].is_string());

    let (status, body) = app
        .call(
            "POST",
            &format!("/api/v1/bookings/{}/respond", booking_id),
            Some(app.expert),
            Some(json!({ "action": "reject" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "CONFLICT");

    let (status, listed) = app
        .call("GET", "/api/v1/bookings?role=EXPERT&status=UPCOMING", Some(app.expert), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, inbox) = app.call("GET", "/api/v1/notifications", Some(app.student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox["notifications"][0]["kind"], "BOOKING_CONFIRMED");
    assert_eq!(inbox["unread"], 1);

    let (status, counts) = app
        .call("GET", "/api/v1/notifications/counts", Some(app.expert), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts["total_unread"], 1);
}

#[tokio::test]
async fn test_not_onboarded_expert_is_rejected() {
    let app = test_app();
    let (status, body) = app.create_booking(app.pending_expert).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "NOT_ONBOARDED");
    assert_eq!(app.store.booking_count(), 0);
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    let app = test_app();
    let (status, body) = app
        .call(
            "POST",
            "/api/v1/bookings",
            Some(app.student),
            Some(json!({ "expert_id": app.expert })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "VALIDATION");
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("date"));
    assert!(message.contains("amount"));
}

#[tokio::test]
async fn test_cancel_pending_booking_over_http() {
    let app = test_app();
    let (_, created) = app.create_booking(app.expert).await;
    let booking_id = uuid_at(&created, "/booking/id");

    let (status, booking) = app
        .call(
            "POST",
            &format!("/api/v1/bookings/{}/cancel", booking_id),
            Some(app.student),
            Some(json!({ "reason": "Travelling" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "REFUNDED");
    assert_eq!(booking["refund_reason"], "Travelling");

    let (status, inbox) = app.call("GET", "/api/v1/notifications", Some(app.expert), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox["notifications"][0]["kind"], "BOOKING_CANCELLED");
}

#[tokio::test]
async fn test_stripe_webhook_rejects_bad_signature() {
    let app = test_app();
    let event = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_x" } }
    });

    let (status, body) = app.stripe_event(event, "wrong_secret").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid webhook");
}

#[tokio::test]
async fn test_stripe_payment_succeeded_completes_transaction() {
    let app = test_app();
    let (_, created) = app.create_booking(app.expert).await;
    let booking_id = uuid_at(&created, "/booking/id");
    let intent = created["hold"]["payment_intent_id"].as_str().unwrap().to_string();
    app.provider.set_intent_status(&intent, IntentStatus::Succeeded);

    let event = json!({
        "id": "evt_paid",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent, "status": "succeeded" } }
    });
    let (status, body) = app.stripe_event(event.clone(), STRIPE_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let tx = app.store.transaction_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);

    // Redelivery is harmless.
    let (status, _) = app.stripe_event(event, STRIPE_SECRET).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stripe_refund_webhook_marks_booking_refunded() {
    let app = test_app();
    let (_, created) = app.create_booking(app.expert).await;
    let booking_id = uuid_at(&created, "/booking/id");
    let transaction_id = uuid_at(&created, "/transaction/id");
    let intent = created["hold"]["payment_intent_id"].as_str().unwrap().to_string();
    app.call(
        "POST",
        &format!("/api/v1/transactions/{}/confirm", transaction_id),
        Some(app.student),
        Some(json!({ "payment_method": "pm_card_visa" })),
    )
    .await;

    let event = json!({
        "id": "evt_refund",
        "type": "charge.refund.updated",
        "data": { "object": { "id": "re_1", "payment_intent": intent, "status": "succeeded" } }
    });
    let (status, _) = app.stripe_event(event, STRIPE_SECRET).await;
    assert_eq!(status, StatusCode::OK);

    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Refunded);

    let (_, inbox) = app.call("GET", "/api/v1/notifications", Some(app.student), None).await;
    assert_eq!(inbox["notifications"][0]["kind"], "REFUND_REVIEW");
}

#[tokio::test]
async fn test_unsupported_stripe_event_is_acknowledged() {
    let app = test_app();
    let event = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });
    let (status, _) = app.stripe_event(event, STRIPE_SECRET).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_zoom_url_validation() {
    let app = test_app();
    let (status, body) = app
        .zoom_event(json!({
            "event": "endpoint.url_validation",
            "payload": { "plainToken": "qgg8vlvZRS6UYooatFL8Aw" }
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plainToken"], "qgg8vlvZRS6UYooatFL8Aw");
    assert_eq!(
        body["encryptedToken"],
        hmac_sha256_hex(ZOOM_SECRET, b"qgg8vlvZRS6UYooatFL8Aw").unwrap()
    );
}

#[tokio::test]
async fn test_zoom_meeting_ended_marks_missed() {
    let app = test_app();
    let (_, created) = app.create_booking(app.expert).await;
    let booking_id = uuid_at(&created, "/booking/id");
    let transaction_id = uuid_at(&created, "/transaction/id");
    app.call(
        "POST",
        &format!("/api/v1/transactions/{}/confirm", transaction_id),
        Some(app.student),
        Some(json!({ "payment_method": "pm_card_visa" })),
    )
    .await;
    let (_, booking) = app
        .call(
            "POST",
            &format!("/api/v1/bookings/{}/respond", booking_id),
            Some(app.expert),
            Some(json!({ "action": "accept" })),
        )
        .await;
    let meeting_id: u64 = booking["meeting_id"].as_str().unwrap().parse().unwrap();

    let (status, _) = app
        .zoom_event(json!({
            "event": "meeting.ended",
            "payload": { "object": { "id": meeting_id } }
        }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Missed);
}

#[tokio::test]
async fn test_zoom_webhook_requires_signature() {
    let app = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/zoom")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "event": "meeting.ended" }).to_string()))
        .unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_over_http() {
    let app = test_app();

    let (status, sent) = app
        .call(
            "POST",
            "/api/v1/messages",
            Some(app.student),
            Some(json!({ "recipient_id": app.expert, "content": "Hi, see you Monday" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["content"], "Hi, see you Monday");

    let (status, history) = app
        .call(
            "GET",
            &format!("/api/v1/messages?counterpart_id={}", app.student),
            Some(app.expert),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[0]["content"], "Hi, see you Monday");

    let (status, conversations) = app.call("GET", "/api/v1/conversations", Some(app.expert), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversations[0]["counterpart_id"], app.student.to_string());

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/messages",
            Some(app.student),
            Some(json!({ "recipient_id": app.student, "content": "me" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "VALIDATION");
}
