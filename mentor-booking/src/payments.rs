use mentor_core::money::{breakdown, to_minor_units};
use mentor_core::types::{Booking, BookingStatus, NotificationMeta, Transaction, TransactionStatus};
use mentor_core::{MentorError, Result};
use mentor_providers::{Balance, HoldRequest, IntentStatus, Payout};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::LifecycleDeps;

pub fn hold_key(booking_id: Uuid) -> String {
    format!("hold-{}", booking_id)
}

pub fn capture_key(booking_id: Uuid) -> String {
    format!("capture-{}", booking_id)
}

pub fn payout_key(booking_id: Uuid) -> String {
    format!("payout-{}", booking_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldOutcome {
    pub transaction_id: Uuid,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoutResult {
    Created { payout_id: String, amount_minor: i64 },
    Failed { amount_minor: i64, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureOutcome {
    pub transaction: Transaction,
    pub payout: PayoutResult,
}

pub struct PaymentOrchestrator {
    deps: LifecycleDeps,
}

impl PaymentOrchestrator {
    pub fn new(deps: LifecycleDeps) -> Self {
        Self { deps }
    }

    pub async fn create_hold(&self, booking_id: Uuid, actor_id: Uuid) -> Result<HoldOutcome> {
        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;
        if booking.student_id != actor_id {
            return Err(MentorError::Permission(
                "Only the booking's student can pay for it".to_string(),
            ));
        }
        let transaction = self.deps.transaction_of(booking_id).await?;
        if booking.status != BookingStatus::Pending || transaction.status != TransactionStatus::Pending {
            return Err(MentorError::Conflict("Booking is no longer awaiting payment".to_string()));
        }
        let account = self.deps.payment_account(booking.expert_id).await?;
        self.hold_for(&booking, &transaction, &account).await
    }

    /// Caller must hold the booking lock or own a freshly inserted booking.
    pub(crate) async fn hold_for(
        &self,
        booking: &Booking,
        transaction: &Transaction,
        account: &str,
    ) -> Result<HoldOutcome> {
        let charge = breakdown(transaction.amount)?;
        let request = HoldRequest {
            booking_id: booking.id,
            amount_minor: charge.amount_minor,
            fee_minor: charge.fee_minor,
            currency: transaction.currency.clone(),
            destination_account: account.to_string(),
            idempotency_key: hold_key(booking.id),
        };
        let hold = self.deps.payments.create_payment_hold(&request).await?;

        match transaction.provider_id.as_deref() {
            Some(existing) if existing == hold.id => {}
            Some(existing) => {
                tracing::error!(
                    "Booking {} already has intent {} but provider returned {}",
                    booking.id,
                    existing,
                    hold.id
                );
                return Err(MentorError::Conflict(
                    "Booking already has a different payment hold".to_string(),
                ));
            }
            None => {
                if !self.deps.store.set_provider_id(transaction.id, &hold.id).await? {
                    return Err(MentorError::Conflict(
                        "Payment hold was recorded concurrently".to_string(),
                    ));
                }
            }
        }

        tracing::info!(
            "Hold {} for booking {}: {} minor units, fee {}",
            hold.id,
            booking.id,
            charge.amount_minor,
            charge.fee_minor
        );

        Ok(HoldOutcome {
            transaction_id: transaction.id,
            payment_intent_id: hold.id,
            client_secret: hold.client_secret,
            status: hold.status.as_str().to_string(),
        })
    }

    pub async fn confirm_and_capture(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        payment_method: Option<&str>,
    ) -> Result<Transaction> {
        let booking_id = self
            .deps
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Transaction not found".to_string()))?
            .booking_id;

        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;
        let transaction = self.deps.transaction_of(booking_id).await?;

        if booking.student_id != actor_id {
            return Err(MentorError::Permission(
                "Only the booking's student can confirm payment".to_string(),
            ));
        }
        if transaction.status != TransactionStatus::Pending || booking.status != BookingStatus::Pending {
            return Err(MentorError::Conflict("Payment was already processed".to_string()));
        }
        let intent_id = transaction
            .provider_id
            .clone()
            .ok_or_else(|| MentorError::Conflict("Payment hold has not been created".to_string()))?;

        let mut status = self.deps.payments.retrieve_intent(&intent_id).await?;
        if status.needs_confirmation() {
            let payment_method = payment_method
                .filter(|pm| !pm.trim().is_empty())
                .ok_or_else(|| MentorError::Validation("A payment method is required".to_string()))?;
            status = self
                .deps
                .payments
                .attach_and_confirm(&intent_id, payment_method)
                .await?;
        }
        if status == IntentStatus::RequiresCapture {
            status = self
                .deps
                .payments
                .capture(&intent_id, &capture_key(booking_id))
                .await?;
        }
        if status != IntentStatus::Succeeded {
            tracing::warn!(
                "Intent {} for booking {} ended in {}",
                intent_id,
                booking_id,
                status.as_str()
            );
            return Err(MentorError::PaymentProcessing(format!(
                "Payment is {}",
                status.as_str()
            )));
        }

        self.complete_payment(&booking, &transaction).await
    }

    async fn complete_payment(&self, booking: &Booking, transaction: &Transaction) -> Result<Transaction> {
        let moved = self
            .deps
            .store
            .update_transaction_status(transaction.id, TransactionStatus::Pending, TransactionStatus::Completed)
            .await?;
        if !moved {
            return Err(MentorError::Conflict("Payment was already processed".to_string()));
        }
        tracing::info!("Payment for booking {} captured", booking.id);

        self.deps
            .emit(
                Some(booking.student_id),
                booking.expert_id,
                NotificationMeta::BookingRequested {
                    booking_id: booking.id,
                    disabled: false,
                    texts: None,
                },
            )
            .await;

        self.deps
            .store
            .get_transaction(transaction.id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Transaction not found".to_string()))
    }

    pub async fn apply_payment_succeeded(&self, intent_id: &str) -> Result<bool> {
        let Some(found) = self.deps.store.find_transaction_by_provider_id(intent_id).await? else {
            tracing::info!("Ignoring payment_intent.succeeded for unknown intent {}", intent_id);
            return Ok(false);
        };

        let _guard = self.deps.locks.lock(found.booking_id).await;
        let transaction = self.deps.transaction_of(found.booking_id).await?;
        let booking = self.deps.booking(found.booking_id).await?;
        if transaction.status != TransactionStatus::Pending || booking.status != BookingStatus::Pending {
            tracing::debug!("Intent {} already applied", intent_id);
            return Ok(false);
        }

        match self.complete_payment(&booking, &transaction).await {
            Ok(_) => Ok(true),
            Err(MentorError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A failed payout is reported, not raised.
    pub async fn capture_post_session(&self, booking_id: Uuid, actor_id: Uuid) -> Result<CaptureOutcome> {
        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;
        if !booking.is_participant(&actor_id) {
            return Err(MentorError::Permission(
                "Only booking participants can capture payment".to_string(),
            ));
        }
        if booking.status != BookingStatus::Completed {
            return Err(MentorError::InvalidState(format!(
                "Booking is {}, payment can only be captured after completion",
                booking.status
            )));
        }

        let mut transaction = self.deps.transaction_of(booking_id).await?;
        if transaction.status == TransactionStatus::Refunded {
            return Err(MentorError::Conflict("Payment was refunded".to_string()));
        }
        if transaction.payout_id.is_some() {
            return Err(MentorError::Conflict("Expert was already paid out".to_string()));
        }
        let account = self.deps.payment_account(booking.expert_id).await?;

        if transaction.status == TransactionStatus::Pending {
            transaction = self.capture_hold(&transaction).await?;
        }

        let charge = breakdown(transaction.amount)?;
        let payout = match self
            .deps
            .payments
            .payout(&account, charge.net_minor, &transaction.currency, &payout_key(booking_id))
            .await
        {
            Ok(payout) => {
                if !self.deps.store.set_payout(transaction.id, &payout.id).await? {
                    tracing::warn!("Payout {} for booking {} was already recorded", payout.id, booking_id);
                }
                tracing::info!("Payout {} of {} created for booking {}", payout.id, payout.amount_minor, booking_id);
                PayoutResult::Created {
                    payout_id: payout.id,
                    amount_minor: charge.net_minor,
                }
            }
            Err(e) => {
                tracing::error!("Payout for booking {} failed: {}", booking_id, e);
                PayoutResult::Failed {
                    amount_minor: charge.net_minor,
                    message: e.public_message(),
                }
            }
        };

        let transaction = self
            .deps
            .store
            .get_transaction(transaction.id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Transaction not found".to_string()))?;
        Ok(CaptureOutcome { transaction, payout })
    }

    async fn capture_hold(&self, transaction: &Transaction) -> Result<Transaction> {
        let intent_id = transaction
            .provider_id
            .as_deref()
            .ok_or_else(|| MentorError::Conflict("Payment hold has not been created".to_string()))?;

        let mut status = self.deps.payments.retrieve_intent(intent_id).await?;
        if status == IntentStatus::RequiresCapture {
            status = self
                .deps
                .payments
                .capture(intent_id, &capture_key(transaction.booking_id))
                .await?;
        }
        if status != IntentStatus::Succeeded {
            return Err(MentorError::PaymentProcessing(format!(
                "Payment is {}",
                status.as_str()
            )));
        }

        if !self
            .deps
            .store
            .update_transaction_status(transaction.id, TransactionStatus::Pending, TransactionStatus::Completed)
            .await?
        {
            return Err(MentorError::Conflict("Transaction was modified concurrently".to_string()));
        }
        self.deps
            .store
            .get_transaction(transaction.id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Transaction not found".to_string()))
    }

    pub async fn payout(&self, expert_id: Uuid, amount: Decimal) -> Result<Payout> {
        let account = self.deps.payment_account(expert_id).await?;
        if amount <= Decimal::ZERO {
            return Err(MentorError::Validation("Amount must be greater than zero".to_string()));
        }
        let amount_minor = to_minor_units(amount)?;
        let key = format!("payout-{}-{}", expert_id, Uuid::new_v4());
        self.deps
            .payments
            .payout(&account, amount_minor, &self.deps.currency, &key)
            .await
    }

    pub async fn balance(&self, expert_id: Uuid) -> Result<Balance> {
        let account = self.deps.payment_account(expert_id).await?;
        self.deps.payments.get_balance(&account).await
    }

    pub async fn payout_created(&self, account_id: &str, payout: Payout) -> Result<bool> {
        let Some(profile) = self.deps.store.find_expert_by_account(account_id).await? else {
            tracing::info!("Ignoring payout {} for unknown account {}", payout.id, account_id);
            return Ok(false);
        };

        self.deps
            .emit(
                None,
                profile.user_id,
                NotificationMeta::PayoutCreated {
                    payout_id: payout.id,
                    amount_minor: payout.amount_minor,
                    currency: payout.currency,
                },
            )
            .await;
        Ok(true)
    }
}
