use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::models::health::AggregationReport;
use crate::models::sync::{InsightRecord, SyncError, SyncState, SyncSummary};
use crate::services::payload_builder::PayloadBuilder;
use crate::services::sync_client::SyncClient;

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub summary: SyncSummary,
    pub insights: Vec<InsightRecord>,
    pub authorization: AggregationReport,
    pub log_entries_sent: usize,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Runs one sync attempt at a time: build, upload, then request insights.
///
/// State per attempt goes `Idle -> Building -> Uploading -> Succeeded | Failed`
/// and is published on a watch channel. A failed attempt is never retried
/// here; the caller decides whether to offer a manual retry.
pub struct SyncCoordinator {
    builder: PayloadBuilder,
    client: SyncClient,
    state: watch::Sender<SyncState>,
    in_flight: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(builder: PayloadBuilder, client: SyncClient) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            builder,
            client,
            state,
            in_flight: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SyncState) {
        let previous = self.state.send_replace(next);
        tracing::debug!("Sync state {:?} -> {:?}", previous, next);
    }

    #[tracing::instrument(name = "Sync attempt", skip(self, cancel))]
    pub async fn sync(
        &self,
        window_hours: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            tracing::warn!("Sync requested while another attempt is in flight");
            SyncError::AlreadyInFlight
        })?;

        let result = self.attempt(window_hours, cancel).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    "Sync succeeded with {} log entries and {} insights",
                    outcome.log_entries_sent,
                    outcome.insights.len()
                );
                self.transition(SyncState::Succeeded);
            }
            Err(e) => {
                tracing::error!("Sync failed: {}", e);
                self.transition(SyncState::Failed);
            }
        }
        result
    }

    async fn attempt(
        &self,
        window_hours: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.transition(SyncState::Building);
        let payload = self.builder.build(window_hours, cancel).await?;

        self.transition(SyncState::Uploading);
        let summary = self.client.upload(&payload, cancel).await?;
        let insights = self.client.generate_insights(&payload, cancel).await?;

        Ok(SyncOutcome {
            summary,
            insights,
            authorization: payload.authorization,
            log_entries_sent: payload.cached_log_entries.len(),
            requested_at: payload.requested_at,
            completed_at: Utc::now(),
        })
    }
}
