use crate::models::sync::InsightRecord;

/// Largest single bolus an insight may suggest.
pub const MAX_SINGLE_BOLUS_UNITS: f64 = 15.0;
/// Lowest glucose target an insight may suggest, mg/dL.
pub const MIN_GLUCOSE_TARGET_MG_DL: f64 = 60.0;

pub fn check_insulin_dose(units: f64) -> Option<String> {
    (units > MAX_SINGLE_BOLUS_UNITS).then(|| {
        format!(
            "Suggested insulin dose ({}u) exceeds safe single bolus limit ({}u). Please consult your healthcare provider.",
            units, MAX_SINGLE_BOLUS_UNITS
        )
    })
}

pub fn check_glucose_target(target_mg_dl: f64) -> Option<String> {
    (target_mg_dl < MIN_GLUCOSE_TARGET_MG_DL).then(|| {
        format!(
            "Suggested glucose target ({} mg/dL) is below safe minimum ({} mg/dL). Please consult your healthcare provider.",
            target_mg_dl, MIN_GLUCOSE_TARGET_MG_DL
        )
    })
}

/// Flags a record carrying a dangerous suggestion. Flagged records are kept
/// so the caller can show why the advice was withheld.
pub fn apply_guardrails(record: &mut InsightRecord) {
    let reason = record
        .insulin_units
        .and_then(check_insulin_dose)
        .or_else(|| record.glucose_target.and_then(check_glucose_target));

    match reason {
        Some(reason) => {
            tracing::warn!("Insight \"{}\" blocked by guardrail: {}", record.title, reason);
            record.blocked = true;
            record.block_reason = Some(reason);
        }
        None => {
            record.blocked = false;
            record.block_reason = None;
        }
    }
}
