use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::HealthSettings;
use crate::models::health::{
    AggregationError, AggregationReport, GlucoseSample, GlucoseUnit, HealthSnapshot,
    HealthSourceError, MetricKind, MetricStatus, NutritionEntry, QuantitySample, RawGlucoseSample,
    RawNutrition, RawWorkout, SleepInterval, SleepStage, SnapshotFetch, Workout,
};
use crate::models::window::TimeWindow;
use crate::utils::glucose::{is_plausible, to_mg_dl};

/// The device health platform. Each read may fail independently; a read for a
/// metric the user has not granted returns [`HealthSourceError::Unauthorized`].
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    /// False when the device has no health platform at all.
    async fn is_available(&self) -> bool;

    /// False until the permission prompt has been shown at least once.
    async fn authorization_requested(&self) -> bool {
        true
    }

    async fn glucose(&self, window: &TimeWindow) -> Result<Vec<RawGlucoseSample>, HealthSourceError>;
    async fn workouts(&self, window: &TimeWindow) -> Result<Vec<RawWorkout>, HealthSourceError>;
    async fn nutrition(&self, window: &TimeWindow) -> Result<Vec<RawNutrition>, HealthSourceError>;
    async fn steps(&self, window: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError>;
    async fn exercise_minutes(&self, window: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError>;
    async fn heart_rate(&self, window: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError>;
    async fn sleep(&self, window: &TimeWindow) -> Result<Vec<SleepInterval>, HealthSourceError>;
}

/// Stand-in for devices without a health platform (simulators, desktop builds).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHealthSource;

#[async_trait]
impl HealthDataSource for NullHealthSource {
    async fn is_available(&self) -> bool {
        false
    }

    async fn glucose(&self, _: &TimeWindow) -> Result<Vec<RawGlucoseSample>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn workouts(&self, _: &TimeWindow) -> Result<Vec<RawWorkout>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn nutrition(&self, _: &TimeWindow) -> Result<Vec<RawNutrition>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn steps(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn exercise_minutes(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn heart_rate(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }

    async fn sleep(&self, _: &TimeWindow) -> Result<Vec<SleepInterval>, HealthSourceError> {
        Err(HealthSourceError::Unavailable)
    }
}

#[derive(Clone)]
pub struct HealthSnapshotAggregator {
    source: Arc<dyn HealthDataSource>,
    settings: HealthSettings,
}

impl HealthSnapshotAggregator {
    pub fn new(source: Arc<dyn HealthDataSource>, settings: HealthSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub async fn is_authorization_requested(&self) -> bool {
        self.source.authorization_requested().await
    }

    /// Snapshot of the `window_hours` leading up to now.
    pub async fn fetch_snapshot(
        &self,
        window_hours: u32,
        cancel: &CancellationToken,
    ) -> Result<SnapshotFetch, AggregationError> {
        self.fetch_window(TimeWindow::trailing(Utc::now(), window_hours), cancel)
            .await
    }

    /// Never fails because of the platform: unreadable metrics come back empty
    /// and are flagged in the report. Only cancellation aborts the fetch.
    #[tracing::instrument(
        name = "Fetch health snapshot",
        skip(self, cancel),
        fields(window_start = %window.start, window_end = %window.end)
    )]
    pub async fn fetch_window(
        &self,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<SnapshotFetch, AggregationError> {
        if cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }

        if !self.source.authorization_requested().await {
            tracing::warn!("Health authorization was never requested; skipping metric reads");
            return Ok(SnapshotFetch {
                snapshot: HealthSnapshot::empty(window),
                report: AggregationReport::uniform(MetricStatus::NotRequested),
            });
        }

        if !self.source.is_available().await {
            tracing::info!("Health data platform unavailable; returning empty snapshot");
            return Ok(SnapshotFetch {
                snapshot: HealthSnapshot::empty(window),
                report: AggregationReport::uniform(MetricStatus::PlatformUnavailable),
            });
        }

        let source = &self.source;
        let reads = async {
            futures::join!(
                source.glucose(&window),
                source.workouts(&window),
                source.nutrition(&window),
                source.steps(&window),
                source.exercise_minutes(&window),
                source.heart_rate(&window),
                source.sleep(&window),
            )
        };

        let (glucose, workouts, nutrition, steps, exercise, heart_rate, sleep) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Snapshot fetch cancelled");
                return Err(AggregationError::Cancelled);
            }
            results = reads => results,
        };

        let mut report = AggregationReport::uniform(MetricStatus::Available);
        let glucose = settle(&mut report, MetricKind::Glucose, glucose);
        let workouts = settle(&mut report, MetricKind::Workouts, workouts);
        let nutrition = settle(&mut report, MetricKind::Nutrition, nutrition);
        let steps = settle(&mut report, MetricKind::Steps, steps);
        let exercise = settle(&mut report, MetricKind::ExerciseMinutes, exercise);
        let heart_rate = settle(&mut report, MetricKind::HeartRate, heart_rate);
        let sleep = settle(&mut report, MetricKind::Sleep, sleep);

        let snapshot = HealthSnapshot {
            window_start: window.start,
            window_end: window.end,
            glucose_samples: normalize_glucose(glucose, &window, &self.settings),
            workouts: normalize_workouts(workouts, &window),
            nutrition_entries: normalize_nutrition(nutrition, &window),
            steps: total_quantity(&steps, &window).round() as u64,
            active_minutes: total_quantity(&exercise, &window).round() as u32,
            average_heart_rate: average_quantity(&heart_rate, &window),
            sleep_hours: sleep_hours(&sleep, &window),
        };

        tracing::info!(
            "Health snapshot ready: {} glucose, {} workouts, {} nutrition, {} steps",
            snapshot.glucose_samples.len(),
            snapshot.workouts.len(),
            snapshot.nutrition_entries.len(),
            snapshot.steps
        );

        Ok(SnapshotFetch { snapshot, report })
    }
}

/// Maps a failed metric read to empty data and records why.
fn settle<T: Default>(
    report: &mut AggregationReport,
    metric: MetricKind,
    result: Result<T, HealthSourceError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            let status = match &e {
                HealthSourceError::Unauthorized(_) => {
                    tracing::info!("No read access for {}", metric);
                    MetricStatus::Unauthorized
                }
                HealthSourceError::Unavailable => {
                    tracing::warn!("Platform unavailable while reading {}", metric);
                    MetricStatus::PlatformUnavailable
                }
                HealthSourceError::Query(_) => {
                    tracing::warn!("Failed to read {}: {}", metric, e);
                    MetricStatus::Failed
                }
            };
            report.record(metric, status);
            T::default()
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn normalize_glucose(
    raw: Vec<RawGlucoseSample>,
    window: &TimeWindow,
    settings: &HealthSettings,
) -> Vec<GlucoseSample> {
    let total = raw.len();
    let mut samples: Vec<GlucoseSample> = raw
        .into_iter()
        .filter(|s| window.contains(s.timestamp) && s.value.is_finite())
        .map(|s| GlucoseSample {
            value: to_mg_dl(s.value, s.unit),
            unit: GlucoseUnit::MgDl,
            timestamp: s.timestamp,
        })
        .filter(|s| is_plausible(s.value, settings.min_glucose_mg_dl, settings.max_glucose_mg_dl))
        .collect();

    if samples.len() < total {
        tracing::debug!(
            "Dropped {} glucose samples outside the window or plausible range",
            total - samples.len()
        );
    }

    samples.sort_by_key(|s| s.timestamp);
    samples
}

fn normalize_workouts(raw: Vec<RawWorkout>, window: &TimeWindow) -> Vec<Workout> {
    let mut workouts: Vec<Workout> = raw
        .into_iter()
        .filter(|w| window.contains(w.start))
        .map(|w| {
            let end = w.end.max(w.start);
            Workout {
                name: w.activity,
                start_time: w.start,
                end_time: end,
                duration: (end - w.start).num_seconds() as f64 / 60.0,
                calories_burned: non_negative(w.energy_kcal.unwrap_or(0.0)),
            }
        })
        .collect();
    workouts.sort_by_key(|w| w.start_time);
    workouts
}

fn normalize_nutrition(raw: Vec<RawNutrition>, window: &TimeWindow) -> Vec<NutritionEntry> {
    let mut entries: Vec<NutritionEntry> = raw
        .into_iter()
        .filter(|n| window.contains(n.timestamp))
        .map(|n| NutritionEntry {
            name: n.name.unwrap_or_else(|| "Unknown".to_string()),
            calories: non_negative(n.calories.unwrap_or(0.0)),
            carbs: non_negative(n.carbs.unwrap_or(0.0)),
            protein: non_negative(n.protein.unwrap_or(0.0)),
            fat: non_negative(n.fat.unwrap_or(0.0)),
            timestamp: n.timestamp,
        })
        .collect();
    entries.sort_by_key(|n| n.timestamp);
    entries
}

fn in_window<'a>(
    samples: &'a [QuantitySample],
    window: &'a TimeWindow,
) -> impl Iterator<Item = f64> + 'a {
    samples
        .iter()
        .filter(move |s| window.contains(s.start))
        .map(|s| non_negative(s.value))
}

fn total_quantity(samples: &[QuantitySample], window: &TimeWindow) -> f64 {
    in_window(samples, window).sum()
}

fn average_quantity(samples: &[QuantitySample], window: &TimeWindow) -> f64 {
    let values: Vec<f64> = in_window(samples, window).filter(|v| *v > 0.0).collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sleep_hours(intervals: &[SleepInterval], window: &TimeWindow) -> f64 {
    let seconds: i64 = intervals
        .iter()
        .filter(|i| i.stage == SleepStage::Asleep)
        .map(|i| window.overlap(i.start, i.end).num_seconds())
        .sum();
    seconds as f64 / 3600.0
}
