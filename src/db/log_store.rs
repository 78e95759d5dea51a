use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::LogStoreSettings;
use crate::models::log_entry::{LogCategory, LogEntry, LogEvent, LogFields, LogStoreError};
use crate::models::window::TimeWindow;

/// Durable, append-only cache of user-entered events.
///
/// Results are ordered by `created_at` ascending, ties in insertion order.
/// Every query is a consistent snapshot: writes racing with it are either
/// fully visible or not at all.
#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(
        &self,
        category: LogCategory,
        fields: LogFields,
        at: DateTime<Utc>,
    ) -> Result<LogEntry, LogStoreError>;

    async fn append_event(&self, event: LogEvent, at: DateTime<Utc>) -> Result<LogEntry, LogStoreError> {
        let (category, fields) = event.into_parts();
        self.append(category, fields, at).await
    }

    /// Entries with `created_at >= since`.
    async fn query(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>, LogStoreError>;

    /// Entries with `window.start <= created_at <= window.end`.
    async fn query_window(&self, window: TimeWindow) -> Result<Vec<LogEntry>, LogStoreError>;

    /// Removes every entry. Returns how many were removed.
    async fn clear_all(&self) -> Result<u64, LogStoreError>;

    async fn count(&self) -> Result<u64, LogStoreError>;
}

fn new_entry(category: LogCategory, fields: LogFields, at: DateTime<Utc>) -> LogEntry {
    LogEntry {
        id: Uuid::new_v4(),
        category,
        fields,
        // Storage keeps microseconds; truncate so the returned entry equals what is read back.
        created_at: at.trunc_subsecs(6),
    }
}

#[derive(Debug, FromRow)]
struct LogEntryRow {
    id: String,
    category: String,
    fields: String,
    created_at_us: i64,
}

impl TryFrom<LogEntryRow> for LogEntry {
    type Error = LogStoreError;

    fn try_from(row: LogEntryRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| LogStoreError::CorruptRow(format!("id {:?}: {}", row.id, e)))?;
        let category = row
            .category
            .parse::<LogCategory>()
            .map_err(|e| LogStoreError::CorruptRow(e.to_string()))?;
        let fields: LogFields = serde_json::from_str(&row.fields)?;
        let created_at = DateTime::from_timestamp_micros(row.created_at_us).ok_or_else(|| {
            LogStoreError::CorruptRow(format!("timestamp out of range: {}", row.created_at_us))
        })?;
        Ok(LogEntry {
            id,
            category,
            fields,
            created_at,
        })
    }
}

#[derive(Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub async fn connect(settings: &LogStoreSettings) -> Result<Self, LogStoreError> {
        Self::connect_url(&settings.database_url).await
    }

    pub async fn connect_url(database_url: &str) -> Result<Self, LogStoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives as long as its single connection.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Self::from_pool(pool).await
    }

    pub async fn open(path: &Path) -> Result<Self, LogStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, LogStoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LogRepository for SqliteLogStore {
    #[tracing::instrument(name = "Append log entry", skip(self, category, fields), fields(category = %category))]
    async fn append(
        &self,
        category: LogCategory,
        fields: LogFields,
        at: DateTime<Utc>,
    ) -> Result<LogEntry, LogStoreError> {
        let entry = new_entry(category, fields, at);
        let fields_json = serde_json::to_string(&entry.fields)?;

        sqlx::query(
            r#"
            INSERT INTO log_entries (id, category, fields, created_at_us)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.category.as_str())
        .bind(fields_json)
        .bind(entry.created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to persist log entry: {}", e);
            e
        })?;

        tracing::debug!("Log entry {} stored", entry.id);
        Ok(entry)
    }

    async fn query(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>, LogStoreError> {
        let rows = sqlx::query_as::<_, LogEntryRow>(
            r#"
            SELECT id, category, fields, created_at_us
            FROM log_entries
            WHERE created_at_us >= ?1
            ORDER BY created_at_us ASC, seq ASC
            "#,
        )
        .bind(since.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }

    async fn query_window(&self, window: TimeWindow) -> Result<Vec<LogEntry>, LogStoreError> {
        let rows = sqlx::query_as::<_, LogEntryRow>(
            r#"
            SELECT id, category, fields, created_at_us
            FROM log_entries
            WHERE created_at_us >= ?1 AND created_at_us <= ?2
            ORDER BY created_at_us ASC, seq ASC
            "#,
        )
        .bind(window.start.timestamp_micros())
        .bind(window.end.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }

    #[tracing::instrument(name = "Clear log store", skip(self))]
    async fn clear_all(&self) -> Result<u64, LogStoreError> {
        let result = sqlx::query("DELETE FROM log_entries")
            .execute(&self.pool)
            .await?;
        tracing::info!("Removed {} log entries", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64, LogStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Non-durable store for tests and previews.
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, keep: impl Fn(&LogEntry) -> bool + Send) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        let mut selected: Vec<LogEntry> = entries.iter().filter(|e| keep(e)).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps.
        selected.sort_by_key(|e| e.created_at);
        selected
    }
}

#[async_trait]
impl LogRepository for InMemoryLogStore {
    async fn append(
        &self,
        category: LogCategory,
        fields: LogFields,
        at: DateTime<Utc>,
    ) -> Result<LogEntry, LogStoreError> {
        let entry = new_entry(category, fields, at);
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>, LogStoreError> {
        Ok(self.select(|e| e.created_at >= since).await)
    }

    async fn query_window(&self, window: TimeWindow) -> Result<Vec<LogEntry>, LogStoreError> {
        Ok(self.select(|e| window.contains(e.created_at)).await)
    }

    async fn clear_all(&self) -> Result<u64, LogStoreError> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, LogStoreError> {
        Ok(self.entries.read().await.len() as u64)
    }
}
