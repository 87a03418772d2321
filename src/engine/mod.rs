mod availability;
mod error;
mod mutations;
mod queries;
mod validate;

pub use availability::{candidate_starts, merge_overlapping, open_slots, windows_on};
pub use error::BookingError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::observability;
use crate::store::{Repository, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Booking lifecycle service plus the availability engine it consults.
///
/// Holds no booking state: every operation re-reads the injected repository,
/// and every repository call runs under `store_timeout`.
pub struct BookingEngine {
    repo: Arc<dyn Repository>,
    store_timeout: Duration,
}

impl BookingEngine {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Bound a repository call by the deadline. The outer error is the
    /// timeout; the inner result is the store's own answer.
    pub(super) async fn within<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, BookingError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => Ok(result),
            Err(_) => {
                metrics::counter!(observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
                tracing::warn!(op, timeout_ms = self.store_timeout.as_millis() as u64, "store call timed out");
                Err(BookingError::Timeout(op))
            }
        }
    }

    pub(super) async fn fetch<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, BookingError> {
        Ok(self.within(op, call).await??)
    }

    /// Like `fetch`, but a missing record is `None` rather than an error.
    pub(super) async fn optional<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<Option<T>, BookingError> {
        match self.within(op, call).await? {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
