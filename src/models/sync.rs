use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::models::health::{AggregationError, AggregationReport, GlucoseStats, HealthSnapshot};
use crate::models::log_entry::{LogEntry, LogStoreError};

/// Everything sent to the remote service for one sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub health_snapshot: HealthSnapshot,
    pub cached_log_entries: Vec<LogEntry>,
    pub requested_at: DateTime<Utc>,
    pub authorization: AggregationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glucose_summary: Option<GlucoseStats>,
}

impl SyncPayload {
    pub fn is_empty(&self) -> bool {
        self.cached_log_entries.is_empty() && self.health_snapshot.is_empty()
    }
}

/// Per-category counts acknowledged by the service after an upload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    #[serde(default)]
    pub glucose_readings: u32,
    #[serde(default)]
    pub workouts: u32,
    #[serde(default)]
    pub nutrition_entries: u32,
    #[serde(default)]
    pub log_entries: u32,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub last_sync_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRecord {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub data_points: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Dose suggested by the model, if any. Checked by the guardrails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_units: Option<f64>,
    /// Target suggested by the model in mg/dL, if any. Checked by the guardrails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose_target: Option<f64>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Idle,
    Building,
    Uploading,
    Succeeded,
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Succeeded | SyncState::Failed)
    }
}

// Error types for the session/token collaborator
#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum TokenError {
    #[error("No signed-in session")]
    NotSignedIn,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

// Error types for sync and insight generation
#[derive(Debug, ThisError)]
pub enum SyncError {
    #[error("Local persistence error: {0}")]
    LocalPersistence(#[from] LogStoreError),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Sync service returned HTTP {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Authentication expired")]
    AuthenticationExpired,

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("A sync is already in progress")]
    AlreadyInFlight,

    #[error("Invalid sync configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Network(e)
        }
    }

    /// Timeouts, unreachable hosts and non-2xx responses.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout
                | SyncError::Network(_)
                | SyncError::ServerError { .. }
                | SyncError::RateLimited
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::LocalPersistence(_) => "Your saved entries could not be read. Please try again.",
            SyncError::Timeout
            | SyncError::Network(_)
            | SyncError::ServerError { .. }
            | SyncError::RateLimited => "We couldn't reach the server. No insights this time.",
            SyncError::InvalidResponse(_) => "The server sent an unexpected response. No insights this time.",
            SyncError::AuthenticationExpired => "Your session has expired. Please sign in again.",
            SyncError::Cancelled => "Sync was cancelled.",
            SyncError::AlreadyInFlight => "A sync is already running.",
            SyncError::Config(_) => "Sync is not configured correctly.",
        }
    }
}

impl From<AggregationError> for SyncError {
    fn from(e: AggregationError) -> Self {
        match e {
            AggregationError::Cancelled => SyncError::Cancelled,
        }
    }
}
