use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use uuid::Uuid;

pub type LogFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Food,
    Insulin,
    Other,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Food => "food",
            LogCategory::Insulin => "insulin",
            LogCategory::Other => "other",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "food" => Ok(LogCategory::Food),
            "insulin" => Ok(LogCategory::Insulin),
            "other" => Ok(LogCategory::Other),
            other => Err(FieldError::UnknownCategory(other.to_string())),
        }
    }
}

/// A user-entered event as persisted by the log store.
///
/// `fields` is the loose on-disk representation; use [`LogEntry::event`] to
/// get the typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub category: LogCategory,
    pub fields: LogFields,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn event(&self) -> Result<LogEvent, FieldError> {
        LogEvent::from_parts(self.category, &self.fields)
    }
}

/// Typed view of a log entry, used at the boundary nearest the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Food {
        description: String,
        carbs: f64,
    },
    Insulin {
        dose: f64,
        note: Option<String>,
    },
    Other {
        note: String,
    },
}

impl LogEvent {
    pub fn category(&self) -> LogCategory {
        match self {
            LogEvent::Food { .. } => LogCategory::Food,
            LogEvent::Insulin { .. } => LogCategory::Insulin,
            LogEvent::Other { .. } => LogCategory::Other,
        }
    }

    pub fn into_parts(self) -> (LogCategory, LogFields) {
        let category = self.category();
        let mut fields = LogFields::new();
        match self {
            LogEvent::Food { description, carbs } => {
                fields.insert("description".into(), description);
                fields.insert("carbs".into(), carbs.to_string());
            }
            LogEvent::Insulin { dose, note } => {
                fields.insert("dose".into(), dose.to_string());
                if let Some(note) = note {
                    fields.insert("note".into(), note);
                }
            }
            LogEvent::Other { note } => {
                fields.insert("note".into(), note);
            }
        }
        (category, fields)
    }

    pub fn from_parts(category: LogCategory, fields: &LogFields) -> Result<Self, FieldError> {
        match category {
            LogCategory::Food => Ok(LogEvent::Food {
                description: required(fields, "description")?.to_string(),
                carbs: number(fields, "carbs")?,
            }),
            LogCategory::Insulin => Ok(LogEvent::Insulin {
                dose: number(fields, "dose")?,
                note: fields.get("note").cloned(),
            }),
            LogCategory::Other => Ok(LogEvent::Other {
                note: required(fields, "note")?.to_string(),
            }),
        }
    }
}

fn required<'a>(fields: &'a LogFields, key: &'static str) -> Result<&'a str, FieldError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or(FieldError::MissingField(key))
}

fn number(fields: &LogFields, key: &'static str) -> Result<f64, FieldError> {
    let raw = required(fields, key)?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FieldError::InvalidNumber {
            field: key,
            value: raw.to_string(),
        })
}

#[derive(Debug, ThisError, PartialEq)]
pub enum FieldError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Unknown log category: {0}")]
    UnknownCategory(String),
}

// Error types for the log store
#[derive(Debug, ThisError)]
pub enum LogStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt log entry row: {0}")]
    CorruptRow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> LogFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_food_event_to_fields() {
        let (category, map) = LogEvent::Food {
            description: "Toast".into(),
            carbs: 30.0,
        }
        .into_parts();
        assert_eq!(category, LogCategory::Food);
        assert_eq!(map, fields(&[("description", "Toast"), ("carbs", "30")]));
    }

    #[test]
    fn test_insulin_fields_to_event() {
        let event = LogEvent::from_parts(
            LogCategory::Insulin,
            &fields(&[("dose", "4"), ("note", "correction")]),
        )
        .unwrap();
        assert_eq!(
            event,
            LogEvent::Insulin {
                dose: 4.0,
                note: Some("correction".into())
            }
        );
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        assert_eq!(
            LogEvent::from_parts(LogCategory::Other, &LogFields::new()),
            Err(FieldError::MissingField("note"))
        );
        assert_eq!(
            LogEvent::from_parts(
                LogCategory::Food,
                &fields(&[("description", "Toast"), ("carbs", "lots")])
            ),
            Err(FieldError::InvalidNumber {
                field: "carbs",
                value: "lots".into()
            })
        );
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("insulin".parse::<LogCategory>(), Ok(LogCategory::Insulin));
        assert!("snack".parse::<LogCategory>().is_err());
        assert_eq!(LogCategory::Food.to_string(), "food");
    }
}
