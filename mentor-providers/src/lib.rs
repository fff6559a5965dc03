//! Clients for the third-party services the lifecycle depends on.
//!
//! Each provider sits behind a trait so the booking services can be driven
//! by the recording fakes in [`fake`] in tests.

pub mod fake;
pub mod stripe;
pub mod zoom;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use stripe::StripeClient;
pub use zoom::ZoomClient;

/// Payment intent status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    Unknown(String),
}

impl IntentStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "requires_action" => Self::RequiresAction,
            "processing" => Self::Processing,
            "requires_capture" => Self::RequiresCapture,
            "canceled" => Self::Canceled,
            "succeeded" => Self::Succeeded,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Unknown(other) => other,
        }
    }

    /// Whether the intent still needs a payment method or confirmation
    /// from our side before it can be captured.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::RequiresPaymentMethod | Self::RequiresConfirmation)
    }
}

/// Manual-capture hold routed to an expert's connected account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldRequest {
    pub booking_id: Uuid,
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub currency: String,
    pub destination_account: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentHold {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub payment_ref: String,
    pub reverse_transfer: bool,
    pub refund_fee: bool,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRefund {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmount {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Vec<BalanceAmount>,
    #[serde(default)]
    pub pending: Vec<BalanceAmount>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_hold(&self, request: &HoldRequest) -> Result<PaymentHold>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus>;
    async fn attach_and_confirm(&self, intent_id: &str, payment_method: &str) -> Result<IntentStatus>;
    async fn capture(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus>;
    /// Releases an uncaptured hold.
    async fn cancel_intent(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus>;
    async fn refund(&self, request: &RefundRequest) -> Result<ProviderRefund>;
    async fn payout(
        &self,
        account: &str,
        amount_minor: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Payout>;
    async fn get_balance(&self, account: &str) -> Result<Balance>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRequest {
    pub topic: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub agenda: String,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meeting {
    pub id: String,
    pub join_url: String,
}

#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Returns `None` when no meeting provider is configured.
    async fn create_meeting(&self, request: &MeetingRequest) -> Result<Option<Meeting>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_status_parsing() {
        assert_eq!(IntentStatus::parse("requires_capture"), IntentStatus::RequiresCapture);
        assert_eq!(IntentStatus::parse("succeeded").as_str(), "succeeded");
        assert_eq!(
            IntentStatus::parse("something_new"),
            IntentStatus::Unknown("something_new".to_string())
        );
        assert!(IntentStatus::RequiresPaymentMethod.needs_confirmation());
        assert!(!IntentStatus::RequiresCapture.needs_confirmation());
    }
}
