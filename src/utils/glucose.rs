use crate::models::health::{GlucoseSample, GlucoseStats, GlucoseUnit};

/// mg/dL per mmol/L of glucose.
pub const MMOL_TO_MG_DL: f64 = 18.0182;

/// Readings outside these bounds are sensor artefacts.
pub const MIN_PLAUSIBLE_MG_DL: i32 = 20;
pub const MAX_PLAUSIBLE_MG_DL: i32 = 600;

pub const RANGE_LOW_MG_DL: i32 = 70;
pub const RANGE_HIGH_MG_DL: i32 = 180;

/// Converts a reading to whole mg/dL.
pub fn to_mg_dl(value: f64, unit: GlucoseUnit) -> i32 {
    let mg_dl = match unit {
        GlucoseUnit::MgDl => value,
        GlucoseUnit::MmolL => value * MMOL_TO_MG_DL,
    };
    mg_dl.round() as i32
}

pub fn is_plausible(mg_dl: i32, min: i32, max: i32) -> bool {
    (min..=max).contains(&mg_dl)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Average, time-in-range split, GMI and coefficient of variation.
/// Returns `None` when there are no samples.
pub fn glucose_stats(samples: &[GlucoseSample]) -> Option<GlucoseStats> {
    if samples.is_empty() {
        return None;
    }
    let total = samples.len() as f64;
    let values: Vec<f64> = samples.iter().map(|s| f64::from(s.value)).collect();
    let mean = values.iter().sum::<f64>() / total;

    let below = samples.iter().filter(|s| s.value < RANGE_LOW_MG_DL).count() as f64;
    let above = samples.iter().filter(|s| s.value > RANGE_HIGH_MG_DL).count() as f64;
    let in_range = total - below - above;

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / total;
    let cv = if mean > 0.0 {
        variance.sqrt() / mean * 100.0
    } else {
        0.0
    };

    Some(GlucoseStats {
        total_readings: samples.len(),
        average_glucose: round1(mean),
        time_in_range: round1(in_range / total * 100.0),
        time_below_range: round1(below / total * 100.0),
        time_above_range: round1(above / total * 100.0),
        glucose_management_indicator: round1(3.31 + 0.02392 * mean),
        coefficient_of_variation: round1(cv),
    })
}
