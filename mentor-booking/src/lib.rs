//! Booking, payment and refund lifecycle of a mentorship session.

pub mod ledger;
pub mod locks;
pub mod memory;
pub mod payments;
pub mod refunds;
pub mod schedule;
pub mod store;

use mentor_core::types::{Booking, NotificationMeta, Transaction};
use mentor_core::{MentorError, Result};
use mentor_notify::{NotificationDraft, NotificationService};
use mentor_providers::{MeetingProvider, PaymentProvider};
use std::sync::Arc;
use uuid::Uuid;

pub use ledger::{BookingAction, BookingDetails, BookingLedger, CreatedBooking, MeetingOutcome, NewBooking};
pub use locks::BookingLocks;
pub use memory::MemoryBookingStore;
pub use payments::{CaptureOutcome, HoldOutcome, PaymentOrchestrator, PayoutResult};
pub use refunds::{RefundCoordinator, RefundOutcome, WebhookOutcome};
pub use store::{BookingChange, BookingStore, PgBookingStore, RefundUpdate};

/// Collaborators shared by the ledger, the payment orchestrator and the
/// refund coordinator.
#[derive(Clone)]
pub struct LifecycleDeps {
    pub store: Arc<dyn BookingStore>,
    pub payments: Arc<dyn PaymentProvider>,
    pub meetings: Arc<dyn MeetingProvider>,
    pub notifier: Arc<NotificationService>,
    pub locks: Arc<BookingLocks>,
    pub currency: String,
}

impl LifecycleDeps {
    pub(crate) async fn booking(&self, id: Uuid) -> Result<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Booking not found".to_string()))
    }

    pub(crate) async fn transaction_of(&self, booking_id: Uuid) -> Result<Transaction> {
        self.store
            .transaction_for_booking(booking_id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Transaction not found for booking".to_string()))
    }

    /// Connected account of an expert who finished onboarding.
    pub(crate) async fn payment_account(&self, expert_id: Uuid) -> Result<String> {
        let profile = self.store.get_expert_profile(expert_id).await?;
        profile
            .as_ref()
            .and_then(|p| p.payment_account())
            .map(str::to_string)
            .ok_or_else(|| {
                MentorError::NotOnboarded("Expert has not completed payment onboarding".to_string())
            })
    }

    /// Post-commit notification; failures are logged by the notifier.
    pub(crate) async fn emit(&self, sender_id: Option<Uuid>, recipient_id: Uuid, meta: NotificationMeta) {
        let image = match sender_id {
            Some(id) => match self.store.get_user(id).await {
                Ok(user) => user.and_then(|u| u.image),
                Err(e) => {
                    tracing::warn!("Could not load sender {} for notification: {}", id, e);
                    None
                }
            },
            None => None,
        };
        let draft = NotificationDraft::new(sender_id, recipient_id, meta).with_image(image);
        self.notifier.emit(draft).await;
    }
}

/// The three lifecycle services wired to one set of collaborators.
#[derive(Clone)]
pub struct Lifecycle {
    pub ledger: Arc<BookingLedger>,
    pub payments: Arc<PaymentOrchestrator>,
    pub refunds: Arc<RefundCoordinator>,
}

impl Lifecycle {
    pub fn new(deps: LifecycleDeps) -> Self {
        let payments = Arc::new(PaymentOrchestrator::new(deps.clone()));
        let refunds = Arc::new(RefundCoordinator::new(deps.clone()));
        let ledger = Arc::new(BookingLedger::new(deps, payments.clone(), refunds.clone()));
        Self { ledger, payments, refunds }
    }
}
