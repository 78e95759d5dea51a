use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::db::LogRepository;
use crate::models::sync::{SyncError, SyncPayload};
use crate::models::window::TimeWindow;
use crate::services::health_aggregator::HealthSnapshotAggregator;

/// Merges the cached log entries and a fresh health snapshot for one window.
/// Read-only: nothing in the log store is consumed or marked.
#[derive(Clone)]
pub struct PayloadBuilder {
    log_store: Arc<dyn LogRepository>,
    aggregator: HealthSnapshotAggregator,
}

impl PayloadBuilder {
    pub fn new(log_store: Arc<dyn LogRepository>, aggregator: HealthSnapshotAggregator) -> Self {
        Self {
            log_store,
            aggregator,
        }
    }

    pub async fn build(
        &self,
        window_hours: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncPayload, SyncError> {
        self.build_at(Utc::now(), window_hours, cancel).await
    }

    /// Both halves of the payload use the same trailing window ending at `now`.
    #[tracing::instrument(name = "Build sync payload", skip(self, cancel))]
    pub async fn build_at(
        &self,
        now: DateTime<Utc>,
        window_hours: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncPayload, SyncError> {
        let window = TimeWindow::trailing(now, window_hours);

        let fetch = self.aggregator.fetch_window(window, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let entries = self.log_store.query_window(window).await.map_err(|e| {
            tracing::error!("Failed to read cached log entries: {}", e);
            e
        })?;

        let mut seen = HashSet::with_capacity(entries.len());
        let cached_log_entries: Vec<_> = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.id))
            .collect();

        let glucose_summary = fetch.snapshot.glucose_stats();

        tracing::info!(
            "Payload built with {} log entries and {} glucose samples",
            cached_log_entries.len(),
            fetch.snapshot.glucose_samples.len()
        );

        Ok(SyncPayload {
            health_snapshot: fetch.snapshot,
            cached_log_entries,
            requested_at: now,
            authorization: fetch.report,
            glucose_summary,
        })
    }
}
