use chrono::Utc;
use mentor_core::types::{Booking, BookingStatus, NotificationMeta, Transaction, TransactionStatus};
use mentor_core::{MentorError, Result};
use mentor_providers::{IntentStatus, RefundRequest};
use serde::Serialize;
use uuid::Uuid;

use crate::store::{BookingChange, RefundUpdate};
use crate::LifecycleDeps;

pub const PROVIDER_REFUND_REASON: &str = "Refunded by payment provider";

pub fn refund_key(booking_id: Uuid) -> String {
    format!("refund-{}", booking_id)
}

pub fn cancel_key(booking_id: Uuid) -> String {
    format!("cancel-{}", booking_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundOutcome {
    pub booking: Booking,
    pub transaction: Option<Transaction>,
    pub provider_refund_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reversal {
    None,
    VoidHold(String),
    Refund(String),
}

pub struct RefundCoordinator {
    deps: LifecycleDeps,
}

impl RefundCoordinator {
    pub fn new(deps: LifecycleDeps) -> Self {
        Self { deps }
    }

    pub async fn refund(&self, booking_id: Uuid, actor_id: Uuid, reason: &str) -> Result<RefundOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MentorError::Validation("A refund reason is required".to_string()));
        }

        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;
        if !booking.is_participant(&actor_id) {
            return Err(MentorError::Permission(
                "Only booking participants can request a refund".to_string(),
            ));
        }
        match booking.status {
            BookingStatus::Pending | BookingStatus::Upcoming => {}
            BookingStatus::Refunded => {
                return Err(MentorError::Conflict("Booking is already refunded".to_string()))
            }
            BookingStatus::Completed | BookingStatus::Missed => {
                return Err(MentorError::Conflict(
                    "Refunds after the session are not supported".to_string(),
                ))
            }
            BookingStatus::Cancelled => {
                return Err(MentorError::Conflict("Booking was cancelled".to_string()))
            }
        }

        let transaction = self
            .deps
            .store
            .transaction_for_booking(booking_id)
            .await?
            .ok_or_else(|| MentorError::Conflict("Booking has no payment to refund".to_string()))?;
        if transaction.status != TransactionStatus::Completed {
            return Err(MentorError::Conflict(format!(
                "Payment is {}, only captured payments can be refunded",
                transaction.status
            )));
        }
        let payment_ref = transaction
            .provider_id
            .clone()
            .ok_or_else(|| MentorError::Conflict("Payment has no provider reference".to_string()))?;

        let provider_refund_id = self.provider_refund(booking_id, &payment_ref).await?;
        self.commit_refund(&booking, &transaction, reason).await?;

        self.deps
            .emit(
                Some(actor_id),
                booking.counterpart(&actor_id),
                NotificationMeta::BookingCancelled {
                    booking_id,
                    reason: Some(reason.to_string()),
                },
            )
            .await;

        self.outcome(booking_id, Some(provider_refund_id)).await
    }

    /// Caller must hold the booking lock.
    pub(crate) async fn release_locked(&self, booking: &Booking, reason: &str) -> Result<RefundOutcome> {
        if !booking.status.can_transition_to(BookingStatus::Refunded) {
            return Err(MentorError::InvalidState(format!(
                "Booking is {} and cannot be refunded",
                booking.status
            )));
        }

        let transaction = self.deps.store.transaction_for_booking(booking.id).await?;
        let Some(transaction) = transaction.filter(|t| t.status != TransactionStatus::Refunded) else {
            // Nothing left to reverse; only the booking moves.
            let moved = self
                .deps
                .store
                .update_booking_status(
                    booking.id,
                    booking.status,
                    BookingStatus::Refunded,
                    BookingChange {
                        refund_reason: Some(reason.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            if !moved {
                return Err(MentorError::Conflict("Booking was modified concurrently".to_string()));
            }
            return self.outcome(booking.id, None).await;
        };

        let provider_refund_id = match self.reversal_for(&transaction).await? {
            Reversal::None => None,
            Reversal::VoidHold(intent_id) => {
                self.deps
                    .payments
                    .cancel_intent(&intent_id, &cancel_key(booking.id))
                    .await?;
                tracing::info!("Voided hold {} for booking {}", intent_id, booking.id);
                None
            }
            Reversal::Refund(payment_ref) => Some(self.provider_refund(booking.id, &payment_ref).await?),
        };

        self.commit_refund(booking, &transaction, reason).await?;
        self.outcome(booking.id, provider_refund_id).await
    }

    async fn reversal_for(&self, transaction: &Transaction) -> Result<Reversal> {
        let Some(intent_id) = transaction.provider_id.clone() else {
            return Ok(Reversal::None);
        };
        if transaction.status == TransactionStatus::Completed {
            return Ok(Reversal::Refund(intent_id));
        }

        // Pending locally; the provider may still have captured it.
        match self.deps.payments.retrieve_intent(&intent_id).await? {
            IntentStatus::Succeeded => Ok(Reversal::Refund(intent_id)),
            IntentStatus::Canceled => Ok(Reversal::None),
            IntentStatus::Processing => Err(MentorError::PaymentProcessing(
                "Payment is still processing, try again shortly".to_string(),
            )),
            _ => Ok(Reversal::VoidHold(intent_id)),
        }
    }

    async fn provider_refund(&self, booking_id: Uuid, payment_ref: &str) -> Result<String> {
        let refund = self
            .deps
            .payments
            .refund(&RefundRequest {
                payment_ref: payment_ref.to_string(),
                reverse_transfer: true,
                refund_fee: true,
                idempotency_key: refund_key(booking_id),
            })
            .await?;
        tracing::info!(
            "Refund {} ({}) issued for booking {}",
            refund.id,
            refund.status,
            booking_id
        );
        Ok(refund.id)
    }

    async fn commit_refund(&self, booking: &Booking, transaction: &Transaction, reason: &str) -> Result<()> {
        let update = RefundUpdate {
            transaction_id: transaction.id,
            transaction_from: transaction.status,
            booking_id: booking.id,
            booking_from: Some(booking.status),
            reason: reason.to_string(),
            refunded_at: Utc::now(),
        };
        match self.deps.store.mark_refunded(&update).await {
            Ok(()) => Ok(()),
            Err(MentorError::Conflict(reason)) => {
                // Another instance may have applied the provider's refund webhook first
                let current = self.deps.store.get_transaction(transaction.id).await?;
                if current.is_some_and(|t| t.status == TransactionStatus::Refunded) {
                    tracing::info!("Refund for booking {} was already recorded", booking.id);
                    return Ok(());
                }
                tracing::error!("Refund for booking {} not recorded: {}", booking.id, reason);
                Err(MentorError::Conflict(reason))
            }
            Err(e) => {
                // Money already moved; the provider's refund webhook will retry the write.
                tracing::error!("Refund for booking {} not recorded: {}", booking.id, e);
                Err(e)
            }
        }
    }

    async fn outcome(&self, booking_id: Uuid, provider_refund_id: Option<String>) -> Result<RefundOutcome> {
        Ok(RefundOutcome {
            booking: self.deps.booking(booking_id).await?,
            transaction: self.deps.store.transaction_for_booking(booking_id).await?,
            provider_refund_id,
        })
    }

    /// Safe to receive before, after, or more than once relative to [`Self::refund`].
    pub async fn apply_provider_refund(&self, payment_intent_id: &str, refund_status: &str) -> Result<WebhookOutcome> {
        if refund_status != "succeeded" {
            tracing::debug!("Ignoring refund update for {} in status {}", payment_intent_id, refund_status);
            return Ok(WebhookOutcome::Ignored);
        }
        let Some(found) = self
            .deps
            .store
            .find_transaction_by_provider_id(payment_intent_id)
            .await?
        else {
            tracing::info!("Ignoring refund for unknown intent {}", payment_intent_id);
            return Ok(WebhookOutcome::Ignored);
        };

        let _guard = self.deps.locks.lock(found.booking_id).await;
        let transaction = self.deps.transaction_of(found.booking_id).await?;
        if transaction.status == TransactionStatus::Refunded {
            return Ok(WebhookOutcome::AlreadyApplied);
        }
        let booking = self.deps.booking(found.booking_id).await?;

        let update = RefundUpdate {
            transaction_id: transaction.id,
            transaction_from: transaction.status,
            booking_id: booking.id,
            booking_from: booking
                .status
                .can_transition_to(BookingStatus::Refunded)
                .then_some(booking.status),
            reason: PROVIDER_REFUND_REASON.to_string(),
            refunded_at: Utc::now(),
        };
        self.deps.store.mark_refunded(&update).await?;
        tracing::info!("Provider refund applied to booking {}", booking.id);

        self.deps
            .emit(
                Some(booking.expert_id),
                booking.student_id,
                NotificationMeta::RefundReview {
                    booking_id: booking.id,
                    transaction_id: transaction.id,
                    disabled: false,
                    texts: None,
                },
            )
            .await;

        Ok(WebhookOutcome::Applied)
    }
}
