use chrono::Utc;
use mentor_core::money::{breakdown, from_minor_units};
use mentor_core::types::{
    ActionTexts, ActiveProfile, Booking, BookingStatus, NotificationMeta, Transaction,
    TransactionStatus,
};
use mentor_core::{MentorError, Result};
use mentor_providers::MeetingRequest;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::payments::{HoldOutcome, PaymentOrchestrator};
use crate::refunds::RefundCoordinator;
use crate::schedule::{parse_timezone, profile_timezone, resolve_session_times};
use crate::store::BookingChange;
use crate::LifecycleDeps;

pub const REJECT_REASON: &str = "Rejected by expert";
pub const PROVIDER: &str = "stripe";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewBooking {
    pub expert_id: Option<Uuid>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub details: Option<String>,
    pub amount: Option<Decimal>,
    /// Zone `date` and `time` are expressed in; UTC when absent.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub transaction: Transaction,
    pub hold: HoldOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingDetails {
    pub booking: Booking,
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MeetingOutcome {
    Ignored,
    Missed { booking_id: Uuid },
    Unchanged { booking_id: Uuid, status: BookingStatus },
}

pub struct BookingLedger {
    deps: LifecycleDeps,
    payments: Arc<PaymentOrchestrator>,
    refunds: Arc<RefundCoordinator>,
}

fn require<T>(value: Option<T>, field: &str, missing: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        missing.push(field.to_string());
    }
    value
}

impl BookingLedger {
    pub fn new(deps: LifecycleDeps, payments: Arc<PaymentOrchestrator>, refunds: Arc<RefundCoordinator>) -> Self {
        Self { deps, payments, refunds }
    }

    pub async fn create_booking(&self, student_id: Uuid, request: NewBooking) -> Result<CreatedBooking> {
        let mut missing = Vec::new();
        let expert_id = require(request.expert_id, "expert_id", &mut missing);
        let date = require(request.date.filter(|d| !d.trim().is_empty()), "date", &mut missing);
        let time = require(request.time.filter(|t| !t.trim().is_empty()), "time", &mut missing);
        let duration = require(request.duration_minutes, "duration_minutes", &mut missing);
        let details = require(
            request.details.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            "details",
            &mut missing,
        );
        let amount = require(request.amount, "amount", &mut missing);

        let (Some(expert_id), Some(date), Some(time), Some(duration), Some(details), Some(amount)) =
            (expert_id, date, time, duration, details, amount)
        else {
            return Err(MentorError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        };

        if student_id == expert_id {
            return Err(MentorError::Validation("You cannot book a session with yourself".to_string()));
        }
        if duration <= 0 {
            return Err(MentorError::Validation("Session duration must be positive".to_string()));
        }
        let charge = breakdown(amount)?;
        let request_tz = parse_timezone(request.timezone.as_deref())?;

        let student = self
            .deps
            .store
            .get_user(student_id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Student not found".to_string()))?;
        let expert = self
            .deps
            .store
            .get_user(expert_id)
            .await?
            .ok_or_else(|| MentorError::NotFound("Expert not found".to_string()))?;
        let account = self.deps.payment_account(expert_id).await?;

        let times = resolve_session_times(
            &date,
            &time,
            request_tz,
            profile_timezone(expert.timezone.as_deref()),
            profile_timezone(student.timezone.as_deref()),
        )?;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            student_id,
            expert_id,
            date: times.date,
            expert_date_time: times.expert_local,
            student_date_time: times.student_local,
            session_duration: duration,
            session_details: details,
            status: BookingStatus::Pending,
            meeting_link: None,
            meeting_id: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        };
        let transaction = Transaction {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            amount: from_minor_units(charge.amount_minor),
            currency: self.deps.currency.clone(),
            status: TransactionStatus::Pending,
            provider: PROVIDER.to_string(),
            provider_id: None,
            payout_id: None,
            refund_date: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.deps.store.insert_booking(&booking, &transaction).await?;
        tracing::info!(
            "Booking {} created: student {} with expert {} at {}",
            booking.id,
            student_id,
            expert_id,
            booking.date
        );

        // Rows stay PENDING if the hold fails; create_hold can be retried.
        let _guard = self.deps.locks.lock(booking.id).await;
        let hold = self.payments.hold_for(&booking, &transaction, &account).await?;
        let transaction = self.deps.transaction_of(booking.id).await?;

        Ok(CreatedBooking { booking, transaction, hold })
    }

    pub async fn accept_or_reject(&self, booking_id: Uuid, expert_id: Uuid, action: BookingAction) -> Result<Booking> {
        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;

        if booking.expert_id != expert_id {
            return Err(MentorError::Permission(
                "Only the booked expert can respond to this booking".to_string(),
            ));
        }
        if booking.status != BookingStatus::Pending || booking.meeting_link.is_some() {
            return Err(MentorError::Conflict(format!(
                "Booking is {} and can no longer be accepted or rejected",
                booking.status
            )));
        }

        match action {
            BookingAction::Accept => self.accept_locked(booking).await,
            BookingAction::Reject => self.reject_locked(booking).await,
        }
    }

    async fn accept_locked(&self, booking: Booking) -> Result<Booking> {
        let transaction = self
            .deps
            .store
            .transaction_for_booking(booking.id)
            .await?
            .ok_or_else(|| MentorError::Conflict("Booking has no transaction".to_string()))?;
        if transaction.provider_id.is_none() || transaction.status != TransactionStatus::Completed {
            return Err(MentorError::Conflict(
                "Booking cannot be accepted until the student has paid".to_string(),
            ));
        }
        self.deps.payment_account(booking.expert_id).await?;

        let meeting = self.provision_meeting(&booking).await?;
        let change = BookingChange {
            meeting_link: meeting.as_ref().map(|m| m.join_url.clone()),
            meeting_id: meeting.as_ref().map(|m| m.id.clone()),
            refund_reason: None,
        };

        let moved = self
            .deps
            .store
            .update_booking_status(booking.id, BookingStatus::Pending, BookingStatus::Upcoming, change)
            .await?;
        if !moved {
            return Err(MentorError::Conflict("Booking was modified concurrently".to_string()));
        }
        tracing::info!("Booking {} accepted", booking.id);

        let updated = self.deps.booking(booking.id).await?;
        self.deps
            .emit(
                Some(booking.expert_id),
                booking.student_id,
                NotificationMeta::BookingConfirmed {
                    booking_id: booking.id,
                    meeting_link: updated.meeting_link.clone(),
                },
            )
            .await;
        self.resolve_request_prompt(&booking, "Accepted").await;

        Ok(updated)
    }

    async fn provision_meeting(&self, booking: &Booking) -> Result<Option<mentor_providers::Meeting>> {
        let expert = self.deps.store.get_user(booking.expert_id).await?;
        let student = self.deps.store.get_user(booking.student_id).await?;
        let topic = match (&expert, &student) {
            (Some(expert), Some(student)) => format!("{} x {}", expert.name, student.name),
            _ => "Mentorship session".to_string(),
        };
        let timezone = expert
            .as_ref()
            .and_then(|e| e.timezone.clone())
            .unwrap_or_else(|| "UTC".to_string());

        let meeting = self
            .deps
            .meetings
            .create_meeting(&MeetingRequest {
                topic,
                start_time: booking.date,
                duration_minutes: booking.session_duration,
                agenda: booking.session_details.clone(),
                timezone,
            })
            .await?;
        if meeting.is_none() {
            tracing::info!("No meeting provider configured; booking {} has no link", booking.id);
        }
        Ok(meeting)
    }

    async fn reject_locked(&self, booking: Booking) -> Result<Booking> {
        let outcome = self.refunds.release_locked(&booking, REJECT_REASON).await?;
        tracing::info!("Booking {} rejected", booking.id);

        self.deps
            .emit(
                Some(booking.expert_id),
                booking.student_id,
                NotificationMeta::BookingCancelledByExpert {
                    booking_id: booking.id,
                    disabled: false,
                    texts: None,
                },
            )
            .await;
        self.resolve_request_prompt(&booking, "Rejected").await;

        Ok(outcome.booking)
    }

    async fn resolve_request_prompt(&self, booking: &Booking, label: &str) {
        self.deps
            .notifier
            .resolve_booking_prompts(
                booking.expert_id,
                booking.id,
                ActionTexts { primary: label.to_string(), secondary: None },
            )
            .await;
    }

    pub async fn mark_completed(&self, booking_id: Uuid, actor_id: Uuid) -> Result<Booking> {
        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;

        if !booking.is_participant(&actor_id) {
            return Err(MentorError::Permission(
                "Only booking participants can complete a session".to_string(),
            ));
        }
        if booking.status != BookingStatus::Upcoming {
            return Err(MentorError::InvalidState(format!(
                "Booking is {}, only upcoming sessions can be completed",
                booking.status
            )));
        }

        let moved = self
            .deps
            .store
            .update_booking_status(booking_id, BookingStatus::Upcoming, BookingStatus::Completed, BookingChange::default())
            .await?;
        if !moved {
            return Err(MentorError::InvalidState("Booking was modified concurrently".to_string()));
        }
        tracing::info!("Booking {} completed by {}", booking_id, actor_id);

        self.deps
            .emit(
                Some(actor_id),
                booking.counterpart(&actor_id),
                NotificationMeta::SessionCompleted { booking_id },
            )
            .await;

        self.deps.booking(booking_id).await
    }

    pub async fn cancel(&self, booking_id: Uuid, actor_id: Uuid, reason: Option<&str>) -> Result<Booking> {
        let _guard = self.deps.locks.lock(booking_id).await;
        let booking = self.deps.booking(booking_id).await?;

        if !booking.is_participant(&actor_id) {
            return Err(MentorError::Permission(
                "Only booking participants can cancel".to_string(),
            ));
        }
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Upcoming) {
            return Err(MentorError::InvalidState(format!(
                "Booking is {} and can no longer be cancelled",
                booking.status
            )));
        }

        let reason = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => reason.to_string(),
            None if actor_id == booking.student_id => "Cancelled by student".to_string(),
            None => "Cancelled by expert".to_string(),
        };

        let outcome = self.refunds.release_locked(&booking, &reason).await?;
        tracing::info!("Booking {} cancelled by {}: {}", booking_id, actor_id, reason);

        self.deps
            .emit(
                Some(actor_id),
                booking.counterpart(&actor_id),
                NotificationMeta::BookingCancelled {
                    booking_id,
                    reason: Some(reason),
                },
            )
            .await;
        if booking.status == BookingStatus::Pending {
            self.resolve_request_prompt(&booking, "Cancelled").await;
        }

        Ok(outcome.booking)
    }

    /// A session nobody marked completed by then is recorded as missed.
    pub async fn meeting_ended(&self, meeting_id: &str) -> Result<MeetingOutcome> {
        let Some(found) = self.deps.store.find_booking_by_meeting(meeting_id).await? else {
            tracing::info!("Ignoring meeting.ended for unknown meeting {}", meeting_id);
            return Ok(MeetingOutcome::Ignored);
        };

        let _guard = self.deps.locks.lock(found.id).await;
        let booking = self.deps.booking(found.id).await?;
        if booking.status != BookingStatus::Upcoming {
            tracing::info!(
                "Meeting {} ended for booking {} in status {}; nothing to do",
                meeting_id,
                booking.id,
                booking.status
            );
            return Ok(MeetingOutcome::Unchanged {
                booking_id: booking.id,
                status: booking.status,
            });
        }

        let moved = self
            .deps
            .store
            .update_booking_status(booking.id, BookingStatus::Upcoming, BookingStatus::Missed, BookingChange::default())
            .await?;
        if !moved {
            let current = self.deps.booking(booking.id).await?;
            return Ok(MeetingOutcome::Unchanged {
                booking_id: booking.id,
                status: current.status,
            });
        }
        tracing::info!("Booking {} marked missed", booking.id);

        for recipient in [booking.student_id, booking.expert_id] {
            self.deps
                .emit(None, recipient, NotificationMeta::SessionMissed { booking_id: booking.id })
                .await;
        }

        Ok(MeetingOutcome::Missed { booking_id: booking.id })
    }

    pub async fn get_booking(&self, booking_id: Uuid, actor_id: Uuid) -> Result<BookingDetails> {
        let booking = self.deps.booking(booking_id).await?;
        if !booking.is_participant(&actor_id) {
            return Err(MentorError::Permission(
                "You are not a participant of this booking".to_string(),
            ));
        }
        let transaction = self.deps.store.transaction_for_booking(booking_id).await?;
        Ok(BookingDetails { booking, transaction })
    }

    pub async fn list_bookings(
        &self,
        actor_id: Uuid,
        role: Option<ActiveProfile>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        self.deps.store.list_bookings(actor_id, role, status).await
    }
}
