use async_trait::async_trait;
use chrono::Utc;
use mentor_core::types::{
    ActiveProfile, Booking, BookingStatus, ExpertProfile, Transaction, TransactionStatus, User,
};
use mentor_core::{MentorError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::store::{
    check_booking_edge, check_refund_edges, check_transaction_edge, BookingChange, BookingStore,
    RefundUpdate,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, ExpertProfile>,
    bookings: HashMap<Uuid, Booking>,
    transactions: HashMap<Uuid, Transaction>,
}

/// Store backed by hash maps behind one lock, so every method is atomic.
#[derive(Default)]
pub struct MemoryBookingStore {
    tables: Mutex<Tables>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }

    pub fn add_expert_profile(&self, profile: ExpertProfile) {
        self.tables().profiles.insert(profile.user_id, profile);
    }

    pub fn booking_count(&self) -> usize {
        self.tables().bookings.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.tables().transactions.len()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn get_expert_profile(&self, user_id: Uuid) -> Result<Option<ExpertProfile>> {
        Ok(self.tables().profiles.get(&user_id).cloned())
    }

    async fn find_expert_by_account(&self, account_id: &str) -> Result<Option<ExpertProfile>> {
        Ok(self
            .tables()
            .profiles
            .values()
            .find(|p| p.stripe_account_id.as_deref() == Some(account_id))
            .cloned())
    }

    async fn insert_booking(&self, booking: &Booking, transaction: &Transaction) -> Result<()> {
        let mut tables = self.tables();
        if tables.transactions.values().any(|t| t.booking_id == booking.id) {
            return Err(MentorError::Conflict("Booking already has a transaction".to_string()));
        }
        tables.bookings.insert(booking.id, booking.clone());
        tables.transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        Ok(self.tables().bookings.get(&id).cloned())
    }

    async fn find_booking_by_meeting(&self, meeting_id: &str) -> Result<Option<Booking>> {
        Ok(self
            .tables()
            .bookings
            .values()
            .find(|b| b.meeting_id.as_deref() == Some(meeting_id))
            .cloned())
    }

    async fn list_bookings(
        &self,
        user_id: Uuid,
        role: Option<ActiveProfile>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        let mut rows: Vec<Booking> = self
            .tables()
            .bookings
            .values()
            .filter(|b| match role {
                Some(ActiveProfile::Student) => b.student_id == user_id,
                Some(ActiveProfile::Expert) => b.expert_id == user_id,
                None => b.is_participant(&user_id),
            })
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        change: BookingChange,
    ) -> Result<bool> {
        check_booking_edge(from, to)?;
        let mut tables = self.tables();
        match tables.bookings.get_mut(&id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                if change.meeting_link.is_some() {
                    booking.meeting_link = change.meeting_link;
                }
                if change.meeting_id.is_some() {
                    booking.meeting_id = change.meeting_id;
                }
                if change.refund_reason.is_some() {
                    booking.refund_reason = change.refund_reason;
                }
                booking.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.tables().transactions.get(&id).cloned())
    }

    async fn transaction_for_booking(&self, booking_id: Uuid) -> Result<Option<Transaction>> {
        Ok(self
            .tables()
            .transactions
            .values()
            .find(|t| t.booking_id == booking_id)
            .cloned())
    }

    async fn find_transaction_by_provider_id(&self, provider_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .tables()
            .transactions
            .values()
            .find(|t| t.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    async fn set_provider_id(&self, transaction_id: Uuid, provider_id: &str) -> Result<bool> {
        let mut tables = self.tables();
        match tables.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.provider_id.is_none() => {
                tx.provider_id = Some(provider_id.to_string());
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<bool> {
        check_transaction_edge(from, to)?;
        let mut tables = self.tables();
        match tables.transactions.get_mut(&id) {
            Some(tx) if tx.status == from => {
                tx.status = to;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_payout(&self, transaction_id: Uuid, payout_id: &str) -> Result<bool> {
        let mut tables = self.tables();
        match tables.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.payout_id.is_none() => {
                tx.payout_id = Some(payout_id.to_string());
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_refunded(&self, update: &RefundUpdate) -> Result<()> {
        check_refund_edges(update)?;
        let mut tables = self.tables();

        let tx_matches = tables
            .transactions
            .get(&update.transaction_id)
            .map_or(false, |t| t.status == update.transaction_from);
        let booking_matches = match update.booking_from {
            Some(from) => tables
                .bookings
                .get(&update.booking_id)
                .map_or(false, |b| b.status == from),
            None => true,
        };
        if !tx_matches {
            return Err(MentorError::Conflict("Transaction was modified concurrently".to_string()));
        }
        if !booking_matches {
            return Err(MentorError::Conflict("Booking was modified concurrently".to_string()));
        }

        if let Some(tx) = tables.transactions.get_mut(&update.transaction_id) {
            tx.status = TransactionStatus::Refunded;
            tx.refund_date = Some(update.refunded_at);
            tx.refund_reason = Some(update.reason.clone());
            tx.updated_at = update.refunded_at;
        }
        if update.booking_from.is_some() {
            if let Some(booking) = tables.bookings.get_mut(&update.booking_id) {
                booking.status = BookingStatus::Refunded;
                booking.refund_reason = Some(update.reason.clone());
                booking.updated_at = update.refunded_at;
            }
        }
        Ok(())
    }
}
