use ulid::Ulid;

use crate::model::{BookingStatus, Ms};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    NotFound { entity: &'static str, id: Ulid },
    /// The requested start is not among the expert's open slots.
    SlotUnavailable { expert_id: Ulid, start: Ms },
    /// Lost the race at commit time; recompute slots and resubmit.
    SlotConflict { conflicting: Ulid },
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    /// A repository call exceeded the configured deadline.
    Timeout(&'static str),
    Invalid(String),
    Storage(String),
}

impl BookingError {
    /// Only a lost commit race is worth retrying, after re-reading slots.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::SlotConflict { .. })
    }

    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            BookingError::NotFound { .. } => "not_found",
            BookingError::SlotUnavailable { .. } => "slot_unavailable",
            BookingError::SlotConflict { .. } => "slot_conflict",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::Timeout(_) => "timeout",
            BookingError::Invalid(_) => "invalid",
            BookingError::Storage(_) => "storage",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            BookingError::SlotUnavailable { expert_id, start } => {
                write!(f, "slot {start} is not available for expert {expert_id}; pick another time")
            }
            BookingError::SlotConflict { conflicting } => write!(
                f,
                "slot was just taken by booking {conflicting}; reload slots and pick another time"
            ),
            BookingError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            BookingError::Timeout(op) => write!(f, "timed out waiting for store: {op}"),
            BookingError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => BookingError::NotFound { entity, id },
            StoreError::AlreadyExists { entity, id } => {
                BookingError::Invalid(format!("{entity} already exists: {id}"))
            }
            StoreError::SlotConflict { conflicting } => BookingError::SlotConflict { conflicting },
            // Callers that know the target status map this to InvalidTransition themselves.
            e @ StoreError::StatusChanged { .. } => BookingError::Invalid(e.to_string()),
            StoreError::Invalid(msg) => BookingError::Invalid(msg.into()),
            StoreError::Wal(e) => BookingError::Storage(e),
        }
    }
}
