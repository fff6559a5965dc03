//! In-process providers that record every call.
//!
//! Intent state is tracked per id so that confirm/capture/cancel behave
//! like the real provider's state machine.

use async_trait::async_trait;
use mentor_core::{MentorError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    Balance, BalanceAmount, HoldRequest, IntentStatus, Meeting, MeetingProvider, MeetingRequest,
    PaymentHold, PaymentProvider, Payout, ProviderRefund, RefundRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CreateHold,
    RetrieveIntent,
    AttachAndConfirm,
    Capture,
    CancelIntent,
    Refund,
    Payout,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Unavailable,
    Declined,
}

impl FailureMode {
    fn into_error(self) -> MentorError {
        match self {
            Self::Unavailable => MentorError::ProviderUnavailable("fake provider is down".to_string()),
            Self::Declined => MentorError::PaymentProcessing("Your card was declined.".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateHold(HoldRequest),
    RetrieveIntent(String),
    AttachAndConfirm { intent_id: String, payment_method: String },
    Capture { intent_id: String, idempotency_key: String },
    CancelIntent { intent_id: String, idempotency_key: String },
    Refund(RefundRequest),
    Payout { account: String, amount_minor: i64, idempotency_key: String },
    Balance(String),
}

impl ProviderCall {
    pub fn op(&self) -> FakeOp {
        match self {
            Self::CreateHold(_) => FakeOp::CreateHold,
            Self::RetrieveIntent(_) => FakeOp::RetrieveIntent,
            Self::AttachAndConfirm { .. } => FakeOp::AttachAndConfirm,
            Self::Capture { .. } => FakeOp::Capture,
            Self::CancelIntent { .. } => FakeOp::CancelIntent,
            Self::Refund(_) => FakeOp::Refund,
            Self::Payout { .. } => FakeOp::Payout,
            Self::Balance(_) => FakeOp::Balance,
        }
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ProviderCall>,
    intents: HashMap<String, IntentStatus>,
    failures: HashMap<FakeOp, FailureMode>,
    initial_status: Option<IntentStatus>,
    balance: i64,
}

#[derive(Default)]
pub struct FakePaymentProvider {
    state: Mutex<FakeState>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Status returned for newly created holds. Defaults to
    /// `requires_payment_method`.
    pub fn set_initial_status(&self, status: IntentStatus) {
        self.state().initial_status = Some(status);
    }

    /// Overrides the status of an existing intent.
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        self.state().intents.insert(intent_id.to_string(), status);
    }

    pub fn intent_status(&self, intent_id: &str) -> Option<IntentStatus> {
        self.state().intents.get(intent_id).cloned()
    }

    /// The next call of `op` fails with `mode`.
    pub fn fail_next(&self, op: FakeOp, mode: FailureMode) {
        self.state().failures.insert(op, mode);
    }

    pub fn set_balance(&self, amount_minor: i64) {
        self.state().balance = amount_minor;
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: FakeOp) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    fn record(&self, call: ProviderCall) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        let op = call.op();
        state.calls.push(call);
        if let Some(mode) = state.failures.remove(&op) {
            return Err(mode.into_error());
        }
        Ok(state)
    }

    fn transition(
        state: &mut FakeState,
        intent_id: &str,
        allowed: &[IntentStatus],
        next: IntentStatus,
    ) -> Result<IntentStatus> {
        let current = state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| MentorError::PaymentProcessing(format!("No such payment_intent: {}", intent_id)))?;

        if current == next {
            return Ok(current);
        }
        if !allowed.contains(&current) {
            return Err(MentorError::PaymentProcessing(format!(
                "PaymentIntent has status {}",
                current.as_str()
            )));
        }
        state.intents.insert(intent_id.to_string(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_payment_hold(&self, request: &HoldRequest) -> Result<PaymentHold> {
        let mut state = self.record(ProviderCall::CreateHold(request.clone()))?;
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let status = state
            .initial_status
            .clone()
            .unwrap_or(IntentStatus::RequiresPaymentMethod);
        state.intents.insert(id.clone(), status.clone());

        Ok(PaymentHold {
            client_secret: Some(format!("{}_secret", id)),
            id,
            status,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus> {
        let state = self.record(ProviderCall::RetrieveIntent(intent_id.to_string()))?;
        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| MentorError::PaymentProcessing(format!("No such payment_intent: {}", intent_id)))
    }

    async fn attach_and_confirm(&self, intent_id: &str, payment_method: &str) -> Result<IntentStatus> {
        let mut state = self.record(ProviderCall::AttachAndConfirm {
            intent_id: intent_id.to_string(),
            payment_method: payment_method.to_string(),
        })?;
        Self::transition(
            &mut state,
            intent_id,
            &[IntentStatus::RequiresPaymentMethod, IntentStatus::RequiresConfirmation],
            IntentStatus::RequiresCapture,
        )
    }

    async fn capture(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus> {
        let mut state = self.record(ProviderCall::Capture {
            intent_id: intent_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
        })?;
        Self::transition(
            &mut state,
            intent_id,
            &[IntentStatus::RequiresCapture],
            IntentStatus::Succeeded,
        )
    }

    async fn cancel_intent(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus> {
        let mut state = self.record(ProviderCall::CancelIntent {
            intent_id: intent_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
        })?;
        Self::transition(
            &mut state,
            intent_id,
            &[
                IntentStatus::RequiresPaymentMethod,
                IntentStatus::RequiresConfirmation,
                IntentStatus::RequiresAction,
                IntentStatus::RequiresCapture,
            ],
            IntentStatus::Canceled,
        )
    }

    async fn refund(&self, request: &RefundRequest) -> Result<ProviderRefund> {
        let state = self.record(ProviderCall::Refund(request.clone()))?;
        match state.intents.get(&request.payment_ref) {
            Some(IntentStatus::Succeeded) => Ok(ProviderRefund {
                id: format!("re_{}", Uuid::new_v4().simple()),
                status: "succeeded".to_string(),
            }),
            Some(other) => Err(MentorError::PaymentProcessing(format!(
                "PaymentIntent has status {}",
                other.as_str()
            ))),
            None => Err(MentorError::PaymentProcessing(format!(
                "No such payment_intent: {}",
                request.payment_ref
            ))),
        }
    }

    async fn payout(
        &self,
        account: &str,
        amount_minor: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Payout> {
        self.record(ProviderCall::Payout {
            account: account.to_string(),
            amount_minor,
            idempotency_key: idempotency_key.to_string(),
        })?;
        Ok(Payout {
            id: format!("po_{}", Uuid::new_v4().simple()),
            amount_minor,
            currency: currency.to_string(),
            status: "pending".to_string(),
        })
    }

    async fn get_balance(&self, account: &str) -> Result<Balance> {
        let state = self.record(ProviderCall::Balance(account.to_string()))?;
        Ok(Balance {
            available: vec![BalanceAmount {
                amount: state.balance,
                currency: "usd".to_string(),
            }],
            pending: Vec::new(),
        })
    }
}

/// Meeting provider that hands out deterministic join links.
pub struct FakeMeetingProvider {
    enabled: bool,
    fail: Mutex<bool>,
    created: Mutex<Vec<MeetingRequest>>,
}

impl FakeMeetingProvider {
    pub fn new() -> Self {
        Self {
            enabled: true,
            fail: Mutex::new(false),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Behaves like an unconfigured client.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn fail_next(&self) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn created(&self) -> Vec<MeetingRequest> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for FakeMeetingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeetingProvider for FakeMeetingProvider {
    async fn create_meeting(&self, request: &MeetingRequest) -> Result<Option<Meeting>> {
        {
            let mut fail = self.fail.lock().unwrap_or_else(|e| e.into_inner());
            if *fail {
                *fail = false;
                return Err(MentorError::ProviderUnavailable("Could not create meeting".to_string()));
            }
        }
        if !self.enabled {
            return Ok(None);
        }

        let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        created.push(request.clone());
        let id = format!("{}", 90_000_000_000u64 + created.len() as u64);

        Ok(Some(Meeting {
            join_url: format!("https://zoom.example/j/{}", id),
            id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold_request() -> HoldRequest {
        HoldRequest {
            booking_id: Uuid::new_v4(),
            amount_minor: 5000,
            fee_minor: 500,
            currency: "usd".to_string(),
            destination_account: "acct_1".to_string(),
            idempotency_key: "hold-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_intent_state_machine() {
        let fake = FakePaymentProvider::new();
        let hold = fake.create_payment_hold(&hold_request()).await.unwrap();
        assert_eq!(hold.status, IntentStatus::RequiresPaymentMethod);

        // Capturing before confirmation is rejected.
        assert!(fake.capture(&hold.id, "cap").await.is_err());

        let status = fake.attach_and_confirm(&hold.id, "pm_card_visa").await.unwrap();
        assert_eq!(status, IntentStatus::RequiresCapture);
        assert_eq!(fake.capture(&hold.id, "cap").await.unwrap(), IntentStatus::Succeeded);

        let refund = fake
            .refund(&RefundRequest {
                payment_ref: hold.id.clone(),
                reverse_transfer: true,
                refund_fee: true,
                idempotency_key: "refund-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(refund.status, "succeeded");
        assert_eq!(fake.count(FakeOp::Refund), 1);
    }

    #[tokio::test]
    async fn test_one_shot_failure() {
        let fake = FakePaymentProvider::new();
        fake.fail_next(FakeOp::CreateHold, FailureMode::Unavailable);

        let err = fake.create_payment_hold(&hold_request()).await.unwrap_err();
        assert!(matches!(err, MentorError::ProviderUnavailable(_)));
        assert!(fake.create_payment_hold(&hold_request()).await.is_ok());
        assert_eq!(fake.count(FakeOp::CreateHold), 2);
    }

    #[tokio::test]
    async fn test_disabled_meeting_provider() {
        let zoom = FakeMeetingProvider::disabled();
        let request = MeetingRequest {
            topic: "t".to_string(),
            start_time: chrono::Utc::now(),
            duration_minutes: 30,
            agenda: String::new(),
            timezone: "UTC".to_string(),
        };
        assert!(zoom.create_meeting(&request).await.unwrap().is_none());
        assert!(zoom.created().is_empty());
    }
}
