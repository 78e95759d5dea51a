pub mod health;
pub mod log_entry;
pub mod sync;
pub mod window;

pub use health::{
    AggregationReport, GlucoseSample, GlucoseStats, GlucoseUnit, HealthSnapshot, MetricKind,
    MetricStatus, NutritionEntry, SnapshotFetch, Workout,
};
pub use log_entry::{FieldError, LogCategory, LogEntry, LogEvent, LogFields, LogStoreError};
pub use sync::{InsightRecord, SyncError, SyncPayload, SyncState, SyncSummary, TokenError};
pub use window::{TimeWindow, DEFAULT_WINDOW_HOURS};
