use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::{bookings, conversations, expert_profiles, messages, notifications, transactions, users};

/// Declares a unit enum stored as an upper-case `TEXT` column.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, diesel::AsExpression, diesel::FromSqlRow)]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("Unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let text = std::str::from_utf8(bytes.as_bytes())?;
                text.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

text_enum!(
    /// Lifecycle of a booking.
    BookingStatus {
        Pending => "PENDING",
        Upcoming => "UPCOMING",
        Completed => "COMPLETED",
        Refunded => "REFUNDED",
        Cancelled => "CANCELLED",
        Missed => "MISSED",
    }
);

text_enum!(
    TransactionStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Refunded => "REFUNDED",
    }
);

text_enum!(
    ActiveProfile {
        Student => "STUDENT",
        Expert => "EXPERT",
    }
);

text_enum!(
    NotificationKind {
        BookingRequested => "BOOKING_REQUESTED",
        BookingConfirmed => "BOOKING_CONFIRMED",
        BookingCancelledByExpert => "BOOKING_CANCELLED_BY_EXPERT",
        BookingCancelled => "BOOKING_CANCELLED",
        SessionCompleted => "SESSION_COMPLETED",
        SessionMissed => "SESSION_MISSED",
        RefundReview => "REFUND_REVIEW",
        PayoutCreated => "PAYOUT_CREATED",
    }
);

impl BookingStatus {
    /// Edges of the booking state machine.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Upcoming)
                | (Pending, Refunded)
                | (Upcoming, Completed)
                | (Upcoming, Refunded)
                | (Upcoming, Missed)
        )
    }
}

impl TransactionStatus {
    /// Transactions only move forward; REFUNDED is terminal.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Refunded) | (Completed, Refunded)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub active_profile: ActiveProfile,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = expert_profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ExpertProfile {
    pub user_id: Uuid,
    pub stripe_account_id: Option<String>,
    pub is_onboard_completed: bool,
    pub hourly_rate: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl ExpertProfile {
    /// Connected account to route funds to, only once onboarding finished.
    pub fn payment_account(&self) -> Option<&str> {
        match (&self.stripe_account_id, self.is_onboard_completed) {
            (Some(account), true) if !account.is_empty() => Some(account.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = bookings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Booking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub expert_id: Uuid,
    pub date: DateTime<Utc>,
    pub expert_date_time: NaiveDateTime,
    pub student_date_time: NaiveDateTime,
    pub session_duration: i32,
    pub session_details: String,
    pub status: BookingStatus,
    pub meeting_link: Option<String>,
    pub meeting_id: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_participant(&self, user_id: &Uuid) -> bool {
        self.student_id == *user_id || self.expert_id == *user_id
    }

    /// The participant on the other side of `user_id`.
    pub fn counterpart(&self, user_id: &Uuid) -> Uuid {
        if self.student_id == *user_id {
            self.expert_id
        } else {
            self.student_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Transaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub provider: String,
    pub provider_id: Option<String>,
    pub payout_id: Option<String>,
    pub refund_date: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub sender_id: Option<Uuid>,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    pub image: Option<String>,
    pub meta: serde_json::Value,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Labels shown once a prompt has been acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTexts {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

/// Kind-specific payload of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationMeta {
    BookingRequested {
        booking_id: Uuid,
        #[serde(default)]
        disabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        texts: Option<ActionTexts>,
    },
    BookingConfirmed {
        booking_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meeting_link: Option<String>,
    },
    BookingCancelledByExpert {
        booking_id: Uuid,
        #[serde(default)]
        disabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        texts: Option<ActionTexts>,
    },
    BookingCancelled {
        booking_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionCompleted {
        booking_id: Uuid,
    },
    SessionMissed {
        booking_id: Uuid,
    },
    RefundReview {
        booking_id: Uuid,
        transaction_id: Uuid,
        #[serde(default)]
        disabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        texts: Option<ActionTexts>,
    },
    PayoutCreated {
        payout_id: String,
        amount_minor: i64,
        currency: String,
    },
}

impl NotificationMeta {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::BookingRequested { .. } => NotificationKind::BookingRequested,
            Self::BookingConfirmed { .. } => NotificationKind::BookingConfirmed,
            Self::BookingCancelledByExpert { .. } => NotificationKind::BookingCancelledByExpert,
            Self::BookingCancelled { .. } => NotificationKind::BookingCancelled,
            Self::SessionCompleted { .. } => NotificationKind::SessionCompleted,
            Self::SessionMissed { .. } => NotificationKind::SessionMissed,
            Self::RefundReview { .. } => NotificationKind::RefundReview,
            Self::PayoutCreated { .. } => NotificationKind::PayoutCreated,
        }
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        match self {
            Self::BookingRequested { booking_id, .. }
            | Self::BookingConfirmed { booking_id, .. }
            | Self::BookingCancelledByExpert { booking_id, .. }
            | Self::BookingCancelled { booking_id, .. }
            | Self::SessionCompleted { booking_id }
            | Self::SessionMissed { booking_id }
            | Self::RefundReview { booking_id, .. } => Some(*booking_id),
            Self::PayoutCreated { .. } => None,
        }
    }

    /// Whether this meta carries an actionable prompt.
    pub fn is_prompt(&self) -> bool {
        matches!(
            self,
            Self::BookingRequested { .. }
                | Self::BookingCancelledByExpert { .. }
                | Self::RefundReview { .. }
        )
    }

    /// Marks a prompt as handled. Returns `false` for non-prompt variants.
    pub fn resolve(&mut self, resolved_texts: ActionTexts) -> bool {
        match self {
            Self::BookingRequested { disabled, texts, .. }
            | Self::BookingCancelledByExpert { disabled, texts, .. }
            | Self::RefundReview { disabled, texts, .. } => {
                *disabled = true;
                *texts = Some(resolved_texts);
                true
            }
            _ => false,
        }
    }
}

impl Notification {
    pub fn parsed_meta(&self) -> Result<NotificationMeta, serde_json::Error> {
        serde_json::from_value(self.meta.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_key: String,
    pub participant1_id: Uuid,
    pub participant2_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_state_machine_edges() {
        use BookingStatus::*;
        let all = [Pending, Upcoming, Completed, Refunded, Cancelled, Missed];
        let allowed = [
            (Pending, Upcoming),
            (Pending, Refunded),
            (Upcoming, Completed),
            (Upcoming, Refunded),
            (Upcoming, Missed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_transaction_status_never_regresses() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_text_mapping() {
        assert_eq!("UPCOMING".parse::<BookingStatus>(), Ok(BookingStatus::Upcoming));
        assert!("upcoming".parse::<BookingStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&NotificationKind::BookingCancelledByExpert).unwrap(),
            "\"BOOKING_CANCELLED_BY_EXPERT\""
        );
    }

    #[test]
    fn test_meta_is_tagged_by_kind() {
        let booking_id = Uuid::new_v4();
        let meta = NotificationMeta::BookingRequested { booking_id, disabled: false, texts: None };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["type"], "BOOKING_REQUESTED");
        assert_eq!(value["booking_id"], booking_id.to_string());

        let parsed: NotificationMeta = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.kind(), NotificationKind::BookingRequested);
    }

    #[test]
    fn test_resolve_only_applies_to_prompts() {
        let booking_id = Uuid::new_v4();
        let mut prompt = NotificationMeta::BookingCancelledByExpert { booking_id, disabled: false, texts: None };
        assert!(prompt.resolve(ActionTexts { primary: "Refund requested".into(), secondary: None }));
        assert!(matches!(prompt, NotificationMeta::BookingCancelledByExpert { disabled: true, .. }));

        let mut plain = NotificationMeta::SessionCompleted { booking_id };
        assert!(!plain.resolve(ActionTexts { primary: "x".into(), secondary: None }));
    }

    #[test]
    fn test_payment_account_requires_onboarding() {
        let mut profile = ExpertProfile {
            user_id: Uuid::new_v4(),
            stripe_account_id: Some("acct_123".into()),
            is_onboard_completed: false,
            hourly_rate: None,
            updated_at: Utc::now(),
        };
        assert_eq!(profile.payment_account(), None);
        profile.is_onboard_completed = true;
        assert_eq!(profile.payment_account(), Some("acct_123"));
        profile.stripe_account_id = None;
        assert_eq!(profile.payment_account(), None);
    }
}
