use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that rewrites the WAL once `threshold` appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends}/{threshold} appends, skipping");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::dispatcher::NoopDispatcher;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("daybook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let rid = Ulid::new();
        catalog.register(rid, "Cabin");
        let engine = Engine::new(
            test_wal_path("threshold.wal"),
            Arc::new(NotifyHub::new()),
            catalog,
            Arc::new(NoopDispatcher),
        )
        .unwrap();

        let day = |d| NaiveDate::from_ymd_opt(2030, 1, d).unwrap();
        for d in 1..=3 {
            engine.fetch_range(rid, day(d), day(d)).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.fetch_range(rid, day(1), day(3)).await.unwrap().len(), 3);
    }
}
