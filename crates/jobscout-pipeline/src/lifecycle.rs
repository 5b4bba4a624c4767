//! Closure and retention stage.

use chrono::{DateTime, Utc};
use jobscout_storage::{Store, StoreError};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub closed: u64,
    pub purged: u64,
}

/// Close postings not seen within the staleness window, then delete
/// postings past retention. Engaged postings survive both sweeps.
pub async fn run_lifecycle(
    store: &Store,
    now: DateTime<Utc>,
    staleness_days: i64,
    retention_days: i64,
) -> Result<LifecycleReport, StoreError> {
    let closed = store.close_stale(now, staleness_days).await?;
    let purged = store.purge_expired(now, retention_days).await?;
    info!(closed, purged, "lifecycle stage finished");
    Ok(LifecycleReport { closed, purged })
}
