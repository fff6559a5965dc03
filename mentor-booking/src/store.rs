//! Repository for bookings, their transactions and the profiles they
//! depend on.
//!
//! Every status write is conditional on the status the caller observed.
//! A `false` return means another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use mentor_core::schema::{bookings, expert_profiles, transactions, users};
use mentor_core::types::{
    ActiveProfile, Booking, BookingStatus, ExpertProfile, Transaction, TransactionStatus, User,
};
use mentor_core::{DbPool, MentorError, Result};
use std::sync::Arc;
use uuid::Uuid;

/// Optional columns written together with a booking status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChange {
    pub meeting_link: Option<String>,
    pub meeting_id: Option<String>,
    pub refund_reason: Option<String>,
}

/// Atomic refund of a transaction and, optionally, its booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundUpdate {
    pub transaction_id: Uuid,
    pub transaction_from: TransactionStatus,
    pub booking_id: Uuid,
    /// `None` leaves the booking untouched.
    pub booking_from: Option<BookingStatus>,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

pub(crate) fn check_booking_edge(from: BookingStatus, to: BookingStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(MentorError::InvalidState(format!("Booking cannot move from {} to {}", from, to)))
    }
}

pub(crate) fn check_transaction_edge(from: TransactionStatus, to: TransactionStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(MentorError::InvalidState(format!(
            "Transaction cannot move from {} to {}",
            from, to
        )))
    }
}

pub(crate) fn check_refund_edges(update: &RefundUpdate) -> Result<()> {
    check_transaction_edge(update.transaction_from, TransactionStatus::Refunded)?;
    match update.booking_from {
        Some(from) => check_booking_edge(from, BookingStatus::Refunded),
        None => Ok(()),
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_expert_profile(&self, user_id: Uuid) -> Result<Option<ExpertProfile>>;
    async fn find_expert_by_account(&self, account_id: &str) -> Result<Option<ExpertProfile>>;

    /// Writes a booking and its transaction in one database transaction.
    async fn insert_booking(&self, booking: &Booking, transaction: &Transaction) -> Result<()>;
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>>;
    async fn find_booking_by_meeting(&self, meeting_id: &str) -> Result<Option<Booking>>;
    async fn list_bookings(
        &self,
        user_id: Uuid,
        role: Option<ActiveProfile>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>>;
    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        change: BookingChange,
    ) -> Result<bool>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn transaction_for_booking(&self, booking_id: Uuid) -> Result<Option<Transaction>>;
    async fn find_transaction_by_provider_id(&self, provider_id: &str) -> Result<Option<Transaction>>;
    /// Records the payment intent; only succeeds while none is stored.
    async fn set_provider_id(&self, transaction_id: Uuid, provider_id: &str) -> Result<bool>;
    async fn update_transaction_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<bool>;
    /// Records a payout; only succeeds while none is stored.
    async fn set_payout(&self, transaction_id: Uuid, payout_id: &str) -> Result<bool>;

    /// Fails with `Conflict` and writes nothing if either row moved.
    async fn mark_refunded(&self, update: &RefundUpdate) -> Result<()>;
}

pub struct PgBookingStore {
    pool: Arc<DbPool>,
}

impl PgBookingStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = bookings)]
struct BookingChangeset<'a> {
    status: BookingStatus,
    meeting_link: Option<&'a str>,
    meeting_id: Option<&'a str>,
    refund_reason: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(user)
    }

    async fn get_expert_profile(&self, user_id: Uuid) -> Result<Option<ExpertProfile>> {
        let mut conn = self.pool.get().await?;
        let profile = expert_profiles::table
            .find(user_id)
            .select(ExpertProfile::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(profile)
    }

    async fn find_expert_by_account(&self, account_id: &str) -> Result<Option<ExpertProfile>> {
        let mut conn = self.pool.get().await?;
        let profile = expert_profiles::table
            .filter(expert_profiles::stripe_account_id.eq(account_id))
            .select(ExpertProfile::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(profile)
    }

    async fn insert_booking(&self, booking: &Booking, transaction: &Transaction) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, MentorError, _>(|conn| {
            async move {
                diesel::insert_into(bookings::table)
                    .values(booking)
                    .execute(conn)
                    .await?;
                diesel::insert_into(transactions::table)
                    .values(transaction)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let mut conn = self.pool.get().await?;
        let booking = bookings::table
            .find(id)
            .select(Booking::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(booking)
    }

    async fn find_booking_by_meeting(&self, meeting_id: &str) -> Result<Option<Booking>> {
        let mut conn = self.pool.get().await?;
        let booking = bookings::table
            .filter(bookings::meeting_id.eq(meeting_id))
            .select(Booking::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(booking)
    }

    async fn list_bookings(
        &self,
        user_id: Uuid,
        role: Option<ActiveProfile>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        let mut conn = self.pool.get().await?;
        let mut query = bookings::table
            .order(bookings::date.desc())
            .select(Booking::as_select())
            .into_boxed();

        query = match role {
            Some(ActiveProfile::Student) => query.filter(bookings::student_id.eq(user_id)),
            Some(ActiveProfile::Expert) => query.filter(bookings::expert_id.eq(user_id)),
            None => query.filter(
                bookings::student_id
                    .eq(user_id)
                    .or(bookings::expert_id.eq(user_id)),
            ),
        };
        if let Some(status) = status {
            query = query.filter(bookings::status.eq(status));
        }

        Ok(query.load(&mut conn).await?)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        change: BookingChange,
    ) -> Result<bool> {
        check_booking_edge(from, to)?;
        let mut conn = self.pool.get().await?;
        let changeset = BookingChangeset {
            status: to,
            meeting_link: change.meeting_link.as_deref(),
            meeting_id: change.meeting_id.as_deref(),
            refund_reason: change.refund_reason.as_deref(),
            updated_at: Utc::now(),
        };
        let updated = diesel::update(
            bookings::table
                .filter(bookings::id.eq(id))
                .filter(bookings::status.eq(from)),
        )
        .set(&changeset)
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let mut conn = self.pool.get().await?;
        let transaction = transactions::table
            .find(id)
            .select(Transaction::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn transaction_for_booking(&self, booking_id: Uuid) -> Result<Option<Transaction>> {
        let mut conn = self.pool.get().await?;
        let transaction = transactions::table
            .filter(transactions::booking_id.eq(booking_id))
            .select(Transaction::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn find_transaction_by_provider_id(&self, provider_id: &str) -> Result<Option<Transaction>> {
        let mut conn = self.pool.get().await?;
        let transaction = transactions::table
            .filter(transactions::provider_id.eq(provider_id))
            .select(Transaction::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn set_provider_id(&self, transaction_id: Uuid, provider_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            transactions::table
                .filter(transactions::id.eq(transaction_id))
                .filter(transactions::provider_id.is_null()),
        )
        .set((
            transactions::provider_id.eq(provider_id),
            transactions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<bool> {
        check_transaction_edge(from, to)?;
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            transactions::table
                .filter(transactions::id.eq(id))
                .filter(transactions::status.eq(from)),
        )
        .set((
            transactions::status.eq(to),
            transactions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn set_payout(&self, transaction_id: Uuid, payout_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            transactions::table
                .filter(transactions::id.eq(transaction_id))
                .filter(transactions::payout_id.is_null()),
        )
        .set((
            transactions::payout_id.eq(payout_id),
            transactions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn mark_refunded(&self, update: &RefundUpdate) -> Result<()> {
        check_refund_edges(update)?;
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, MentorError, _>(|conn| {
            async move {
                let updated = diesel::update(
                    transactions::table
                        .filter(transactions::id.eq(update.transaction_id))
                        .filter(transactions::status.eq(update.transaction_from)),
                )
                .set((
                    transactions::status.eq(TransactionStatus::Refunded),
                    transactions::refund_date.eq(Some(update.refunded_at)),
                    transactions::refund_reason.eq(Some(update.reason.as_str())),
                    transactions::updated_at.eq(update.refunded_at),
                ))
                .execute(conn)
                .await?;
                if updated != 1 {
                    return Err(MentorError::Conflict(
                        "Transaction was modified concurrently".to_string(),
                    ));
                }

                if let Some(from) = update.booking_from {
                    let updated = diesel::update(
                        bookings::table
                            .filter(bookings::id.eq(update.booking_id))
                            .filter(bookings::status.eq(from)),
                    )
                    .set((
                        bookings::status.eq(BookingStatus::Refunded),
                        bookings::refund_reason.eq(Some(update.reason.as_str())),
                        bookings::updated_at.eq(update.refunded_at),
                    ))
                    .execute(conn)
                    .await?;
                    if updated != 1 {
                        return Err(MentorError::Conflict(
                            "Booking was modified concurrently".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}
