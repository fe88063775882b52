//! Storage collaborators for the analysis engine.
//!
//! The engine reads queries and their recent operations, writes the
//! analysis snapshot back wholesale, and runs EXPLAIN statements through an
//! [`AnalysisStore`]. SQL-backed implementations are gated behind feature
//! flags; [`MemoryStore`] is always available.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dialect::Dialect;
#[cfg(any(feature = "duckdb", feature = "postgres", feature = "sqlite"))]
use crate::error::PulseError;
use crate::error::Result;
use crate::models::{AnalysisSnapshot, Operation, Query};

mod memory;
pub use memory::MemoryStore;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Dialect of the engine that EXPLAIN statements are sent to.
    fn dialect(&self) -> Dialect;

    async fn fetch_query(&self, id: i64) -> Result<Option<Query>>;

    /// Operations of `query_id` with `occurred_at > since`, most recent first, at most `limit`.
    async fn fetch_recent_operations(
        &self,
        query_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Operation>>;

    /// Replaces the whole analysis snapshot of a query.
    async fn save_analysis(&self, query_id: i64, snapshot: &AnalysisSnapshot) -> Result<()>;

    /// Runs a raw diagnostic statement and returns its output as text.
    async fn explain(&self, statement: &str) -> Result<String>;

    async fn latest_operation_at(&self, query_id: i64) -> Result<Option<DateTime<Utc>>>;
}

/// Fields of an operation to be recorded; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub query_id: Option<i64>,
    pub request_id: Option<i64>,
    pub duration: f64,
    pub occurred_at: DateTime<Utc>,
    pub codebase_location: Option<String>,
    pub label: String,
}

impl NewOperation {
    pub fn new(query_id: i64, label: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            query_id: Some(query_id),
            request_id: None,
            duration: 0.0,
            occurred_at,
            codebase_location: None,
            label: label.into(),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.codebase_location = Some(location.into());
        self
    }

    pub fn in_request(mut self, request_id: i64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub(crate) fn into_operation(self, id: i64) -> Operation {
        Operation {
            id,
            query_id: self.query_id,
            request_id: self.request_id,
            duration: self.duration,
            occurred_at: self.occurred_at,
            codebase_location: self.codebase_location,
            label: self.label,
        }
    }
}

// SQL backends store timestamps as integer microseconds and the snapshot as JSON text.

#[cfg(any(feature = "duckdb", feature = "postgres", feature = "sqlite"))]
pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

#[cfg(any(feature = "duckdb", feature = "postgres", feature = "sqlite"))]
pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| PulseError::Storage(format!("timestamp {micros} out of range")))
}

#[cfg(any(feature = "duckdb", feature = "postgres", feature = "sqlite"))]
pub(crate) fn decode_snapshot(json: Option<&str>) -> Result<AnalysisSnapshot> {
    match json {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(text)?),
        _ => Ok(AnalysisSnapshot::default()),
    }
}

#[cfg(feature = "duckdb")]
mod duckdb;
#[cfg(feature = "duckdb")]
pub use self::duckdb::DuckDbStore;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresStore;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteStore;

#[cfg(all(test, any(feature = "duckdb", feature = "postgres", feature = "sqlite")))]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn micros_round_trip_through_storage_encoding() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        assert_eq!(from_micros(to_micros(at)).unwrap(), at);
        assert!(from_micros(i64::MAX).is_err());
    }

    #[test]
    fn blank_snapshot_text_is_default() {
        assert_eq!(decode_snapshot(None).unwrap(), AnalysisSnapshot::default());
        assert_eq!(decode_snapshot(Some("")).unwrap(), AnalysisSnapshot::default());
        assert!(decode_snapshot(Some("{not json")).is_err());
    }
}
