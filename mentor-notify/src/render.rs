//! Read-time presentation of stored notifications.

use chrono::{DateTime, Utc};
use mentor_core::types::{ActionTexts, Notification, NotificationKind, NotificationMeta};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    AcceptBooking,
    RejectBooking,
    RequestRefund,
    ConfirmRefund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub kind: ActionKind,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub sender_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub image: Option<String>,
    pub booking_id: Option<Uuid>,
    pub read: bool,
    pub actions: Vec<NotificationAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texts: Option<ActionTexts>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Default title and body for a freshly emitted notification.
pub fn default_copy(meta: &NotificationMeta) -> (String, String) {
    match meta {
        NotificationMeta::BookingRequested { .. } => (
            "New booking request".to_string(),
            "A student booked a session with you. Accept or reject the request.".to_string(),
        ),
        NotificationMeta::BookingConfirmed { .. } => (
            "Booking confirmed".to_string(),
            "Your session has been confirmed by the expert.".to_string(),
        ),
        NotificationMeta::BookingCancelledByExpert { .. } => (
            "Booking declined".to_string(),
            "The expert declined your booking. Your payment has been released.".to_string(),
        ),
        NotificationMeta::BookingCancelled { reason, .. } => (
            "Booking cancelled".to_string(),
            match reason {
                Some(reason) => format!("A booking was cancelled: {}", reason),
                None => "A booking was cancelled.".to_string(),
            },
        ),
        NotificationMeta::SessionCompleted { .. } => (
            "Session completed".to_string(),
            "Your session has been marked as completed.".to_string(),
        ),
        NotificationMeta::SessionMissed { .. } => (
            "Session missed".to_string(),
            "The meeting ended before the session was completed.".to_string(),
        ),
        NotificationMeta::RefundReview { .. } => (
            "Refund issued".to_string(),
            "A refund was issued for your booking. Please confirm once you receive it.".to_string(),
        ),
        NotificationMeta::PayoutCreated { amount_minor, currency, .. } => (
            "Payout on its way".to_string(),
            format!(
                "A payout of {}.{:02} {} was created.",
                amount_minor / 100,
                amount_minor % 100,
                currency.to_uppercase()
            ),
        ),
    }
}

fn prompt_actions(meta: &NotificationMeta) -> Vec<NotificationAction> {
    let action = |kind, label: &str| NotificationAction { kind, label: label.to_string() };
    match meta {
        NotificationMeta::BookingRequested { disabled: false, .. } => vec![
            action(ActionKind::AcceptBooking, "Accept"),
            action(ActionKind::RejectBooking, "Reject"),
        ],
        NotificationMeta::BookingCancelledByExpert { disabled: false, .. } => {
            vec![action(ActionKind::RequestRefund, "Request refund")]
        }
        NotificationMeta::RefundReview { disabled: false, .. } => {
            vec![action(ActionKind::ConfirmRefund, "Confirm receipt")]
        }
        _ => Vec::new(),
    }
}

fn resolved_texts(meta: &NotificationMeta) -> Option<ActionTexts> {
    match meta {
        NotificationMeta::BookingRequested { disabled: true, texts, .. }
        | NotificationMeta::BookingCancelledByExpert { disabled: true, texts, .. }
        | NotificationMeta::RefundReview { disabled: true, texts, .. } => texts.clone(),
        _ => None,
    }
}

pub fn render(notification: &Notification) -> RenderedNotification {
    let (actions, texts, booking_id) = match notification.parsed_meta() {
        Ok(meta) => (prompt_actions(&meta), resolved_texts(&meta), meta.booking_id()),
        Err(e) => {
            tracing::warn!("Notification {} has unreadable meta: {}", notification.id, e);
            (Vec::new(), None, None)
        }
    };

    RenderedNotification {
        id: notification.id,
        kind: notification.kind,
        sender_id: notification.sender_id,
        title: notification.title.clone(),
        message: notification.message.clone(),
        image: notification.image.clone(),
        booking_id,
        read: notification.read_at.is_some(),
        actions,
        texts,
        meta: notification.meta.clone(),
        created_at: notification.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(meta: NotificationMeta) -> Notification {
        let (title, message) = default_copy(&meta);
        Notification {
            id: Uuid::new_v4(),
            kind: meta.kind(),
            sender_id: Some(Uuid::new_v4()),
            recipient_id: Uuid::new_v4(),
            title,
            message,
            image: None,
            meta: serde_json::to_value(&meta).unwrap(),
            read_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_booking_request_has_two_actions() {
        let booking_id = Uuid::new_v4();
        let rendered = render(&stored(NotificationMeta::BookingRequested {
            booking_id,
            disabled: false,
            texts: None,
        }));
        let kinds: Vec<_> = rendered.actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::AcceptBooking, ActionKind::RejectBooking]);
        assert_eq!(rendered.booking_id, Some(booking_id));
    }

    #[test]
    fn test_single_action_prompts() {
        let booking_id = Uuid::new_v4();
        let declined = render(&stored(NotificationMeta::BookingCancelledByExpert {
            booking_id,
            disabled: false,
            texts: None,
        }));
        assert_eq!(declined.actions.len(), 1);
        assert_eq!(declined.actions[0].kind, ActionKind::RequestRefund);

        let review = render(&stored(NotificationMeta::RefundReview {
            booking_id,
            transaction_id: Uuid::new_v4(),
            disabled: false,
            texts: None,
        }));
        assert_eq!(review.actions[0].kind, ActionKind::ConfirmRefund);
    }

    #[test]
    fn test_disabled_prompt_renders_texts_only() {
        let texts = ActionTexts { primary: "Accepted".to_string(), secondary: None };
        let rendered = render(&stored(NotificationMeta::BookingRequested {
            booking_id: Uuid::new_v4(),
            disabled: true,
            texts: Some(texts.clone()),
        }));
        assert!(rendered.actions.is_empty());
        assert_eq!(rendered.texts, Some(texts));
    }

    #[test]
    fn test_plain_notifications_have_no_actions() {
        let rendered = render(&stored(NotificationMeta::SessionCompleted { booking_id: Uuid::new_v4() }));
        assert!(rendered.actions.is_empty());
        assert!(!rendered.read);
    }

    #[test]
    fn test_payout_copy_formats_minor_units() {
        let (_, message) = default_copy(&NotificationMeta::PayoutCreated {
            payout_id: "po_1".to_string(),
            amount_minor: 4500,
            currency: "usd".to_string(),
        });
        assert_eq!(message, "A payout of 45.00 USD was created.");
    }
}
