use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::models::window::TimeWindow;

/// Metric types read from the health platform. Authorization is granted per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Glucose,
    Workouts,
    Nutrition,
    Steps,
    ExerciseMinutes,
    HeartRate,
    Sleep,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Glucose,
        MetricKind::Workouts,
        MetricKind::Nutrition,
        MetricKind::Steps,
        MetricKind::ExerciseMinutes,
        MetricKind::HeartRate,
        MetricKind::Sleep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Glucose => "glucose",
            MetricKind::Workouts => "workouts",
            MetricKind::Nutrition => "nutrition",
            MetricKind::Steps => "steps",
            MetricKind::ExerciseMinutes => "exercise_minutes",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Sleep => "sleep",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseUnit {
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

// Raw samples as handed over by the health platform, before normalisation.

#[derive(Debug, Clone, PartialEq)]
pub struct RawGlucoseSample {
    pub value: f64,
    pub unit: GlucoseUnit,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawWorkout {
    pub activity: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub energy_kcal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawNutrition {
    pub name: Option<String>,
    pub calories: Option<f64>,
    pub carbs: Option<f64>,
    pub protein: Option<f64>,
    pub fat: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A cumulative or discrete quantity (steps, exercise minutes, bpm) over `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantitySample {
    pub value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStage {
    InBed,
    Asleep,
    Awake,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SleepInterval {
    pub stage: SleepStage,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// Normalised snapshot

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseSample {
    /// Integer in mg/dL.
    pub value: i32,
    pub unit: GlucoseUnit,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Minutes.
    pub duration: f64,
    pub calories_burned: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEntry {
    pub name: String,
    pub calories: f64,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of the externally-sourced metrics for one window.
///
/// Collections are chronological. Scalars are never negative; missing data is
/// zero. Whether zero means "nothing recorded" or "not readable" is reported
/// separately by [`AggregationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub glucose_samples: Vec<GlucoseSample>,
    pub workouts: Vec<Workout>,
    pub nutrition_entries: Vec<NutritionEntry>,
    pub steps: u64,
    pub active_minutes: u32,
    pub average_heart_rate: f64,
    pub sleep_hours: f64,
}

impl HealthSnapshot {
    pub fn empty(window: TimeWindow) -> Self {
        Self {
            window_start: window.start,
            window_end: window.end,
            glucose_samples: vec![],
            workouts: vec![],
            nutrition_entries: vec![],
            steps: 0,
            active_minutes: 0,
            average_heart_rate: 0.0,
            sleep_hours: 0.0,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.window_start, self.window_end)
    }

    pub fn latest_glucose(&self) -> Option<&GlucoseSample> {
        self.glucose_samples.last()
    }

    pub fn is_empty(&self) -> bool {
        self.glucose_samples.is_empty()
            && self.workouts.is_empty()
            && self.nutrition_entries.is_empty()
            && self.steps == 0
            && self.active_minutes == 0
            && self.average_heart_rate == 0.0
            && self.sleep_hours == 0.0
    }

    pub fn glucose_stats(&self) -> Option<GlucoseStats> {
        crate::utils::glucose::glucose_stats(&self.glucose_samples)
    }
}

/// Summary statistics over the glucose samples of a snapshot, in mg/dL and percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseStats {
    pub total_readings: usize,
    pub average_glucose: f64,
    pub time_in_range: f64,
    pub time_below_range: f64,
    pub time_above_range: f64,
    pub glucose_management_indicator: f64,
    pub coefficient_of_variation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricStatus {
    /// Read succeeded; an empty result means nothing was recorded.
    Available,
    /// The user never granted (or revoked) read access for this type.
    Unauthorized,
    /// Access exists but the read failed.
    Failed,
    /// No health platform on this device.
    PlatformUnavailable,
    /// Authorization was never requested, so nothing was read.
    NotRequested,
}

/// Per-metric outcome of one snapshot fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub metrics: BTreeMap<MetricKind, MetricStatus>,
}

impl AggregationReport {
    pub fn uniform(status: MetricStatus) -> Self {
        Self {
            metrics: MetricKind::ALL.iter().map(|m| (*m, status)).collect(),
        }
    }

    pub fn record(&mut self, metric: MetricKind, status: MetricStatus) {
        self.metrics.insert(metric, status);
    }

    pub fn status(&self, metric: MetricKind) -> MetricStatus {
        self.metrics
            .get(&metric)
            .copied()
            .unwrap_or(MetricStatus::NotRequested)
    }

    /// True when every metric was read successfully.
    pub fn is_complete(&self) -> bool {
        MetricKind::ALL
            .iter()
            .all(|m| self.status(*m) == MetricStatus::Available)
    }

    pub fn with_status(&self, status: MetricStatus) -> Vec<MetricKind> {
        MetricKind::ALL
            .iter()
            .copied()
            .filter(|m| self.status(*m) == status)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotFetch {
    pub snapshot: HealthSnapshot,
    pub report: AggregationReport,
}

// Error types for the health platform collaborator
#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum HealthSourceError {
    #[error("Not authorized to read {0}")]
    Unauthorized(MetricKind),

    #[error("Health data platform unavailable")]
    Unavailable,

    #[error("Health query failed: {0}")]
    Query(String),
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Snapshot fetch was cancelled")]
    Cancelled,
}
