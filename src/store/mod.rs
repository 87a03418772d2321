//! Persistence boundary for the booking core.
//!
//! The engine only ever talks to [`Repository`]; [`BookingStore`] is the
//! bundled implementation (in-memory, optionally durable through the WAL).

mod memory;
mod wal;
mod writer;

pub use memory::BookingStore;
pub use wal::Wal;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound { entity: &'static str, id: Ulid },
    AlreadyExists { entity: &'static str, id: Ulid },
    /// Another pending/confirmed booking already holds part of the span.
    SlotConflict { conflicting: Ulid },
    /// Compare-and-set on booking status lost to a concurrent update.
    StatusChanged { id: Ulid, actual: BookingStatus },
    Invalid(&'static str),
    Wal(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            StoreError::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            StoreError::SlotConflict { conflicting } => {
                write!(f, "slot taken by booking {conflicting}")
            }
            StoreError::StatusChanged { id, actual } => {
                write!(f, "booking {id} is now {actual}")
            }
            StoreError::Invalid(msg) => write!(f, "invalid: {msg}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Everything the booking core reads from and writes to persistence.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_availability(&self, expert_id: Ulid) -> Result<Vec<ExpertAvailability>, StoreError>;

    /// Bookings of `expert_id` in one of `statuses` whose span touches the UTC day `date`.
    async fn get_bookings_for_expert_on_date(
        &self,
        expert_id: Ulid,
        date: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError>;

    async fn get_consultation_type(&self, id: Ulid) -> Result<ConsultationType, StoreError>;

    /// Ordered by duration, shortest first.
    async fn list_consultation_types(&self, expert_id: Ulid) -> Result<Vec<ConsultationType>, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Booking, StoreError>;

    /// Fails with [`StoreError::SlotConflict`] if an active booking of the same
    /// expert overlaps at commit time.
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError>;

    /// Applies only if the booking is still in `expected`.
    async fn update_booking_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        status: BookingStatus,
        meeting_link: Option<String>,
        updated_at: Ms,
    ) -> Result<Booking, StoreError>;

    async fn list_bookings_by_client(&self, client_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    async fn list_bookings_by_expert(&self, expert_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    async fn get_user(&self, id: Ulid) -> Result<UserSummary, StoreError>;

    async fn get_expert(&self, id: Ulid) -> Result<ExpertProfile, StoreError>;

    async fn get_expert_by_user(&self, user_id: Ulid) -> Result<ExpertProfile, StoreError>;

    async fn insert_user(&self, user: UserSummary) -> Result<(), StoreError>;

    async fn insert_expert(&self, profile: ExpertProfile) -> Result<(), StoreError>;

    /// Applies `update` to the stored profile and returns the result.
    async fn update_expert(
        &self,
        id: Ulid,
        update: ExpertProfileUpdate,
        updated_at: Ms,
    ) -> Result<ExpertProfile, StoreError>;

    async fn insert_consultation_type(&self, consultation_type: ConsultationType) -> Result<(), StoreError>;

    async fn insert_availability(&self, window: ExpertAvailability) -> Result<(), StoreError>;

    async fn set_availability_active(&self, id: Ulid, active: bool) -> Result<ExpertAvailability, StoreError>;

    /// Fails unless the booking is completed, belongs to the reviewing client
    /// and has no review yet.
    async fn insert_review(&self, review: Review) -> Result<Review, StoreError>;

    async fn list_reviews_by_expert(&self, expert_id: Ulid) -> Result<Vec<Review>, StoreError>;
}
