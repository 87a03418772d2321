use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::store::{BookingStore, StoreError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<BookingStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` appends landed since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_due(store: &BookingStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return Ok(false);
    }
    store.compact_wal().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!(appends, "compacted WAL");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::Repository;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("helpert_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn register(store: &BookingStore, n: usize) {
        for i in 0..n {
            store
                .insert_user(UserSummary {
                    id: Ulid::new(),
                    full_name: format!("user {i}"),
                    email: format!("user{i}@example.com"),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn below_threshold_is_left_alone() {
        let path = test_wal_path("below_threshold.wal");
        let store = BookingStore::open(&path).unwrap();
        register(&store, 3).await;
        assert!(!compact_if_due(&store, 10).await.unwrap());
        assert_eq!(store.wal_appends_since_compact().await, 3);
    }

    #[tokio::test]
    async fn threshold_reached_resets_counter() {
        let path = test_wal_path("threshold_reached.wal");
        let store = BookingStore::open(&path).unwrap();
        register(&store, 5).await;
        assert!(compact_if_due(&store, 5).await.unwrap());
        assert_eq!(store.wal_appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn volatile_store_never_compacts() {
        let store = BookingStore::new();
        register(&store, 5).await;
        assert!(!compact_if_due(&store, 1).await.unwrap());
    }
}
