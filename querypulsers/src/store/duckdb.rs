//! DuckDB-backed store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::params;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::dialect::Dialect;
use crate::error::{PulseError, Result};
use crate::models::{AnalysisSnapshot, Operation, Query};

use super::{decode_snapshot, from_micros, to_micros, AnalysisStore, NewOperation};

const SCHEMA: &str = r#"
CREATE SEQUENCE IF NOT EXISTS pulse_queries_id_seq START 1;
CREATE TABLE IF NOT EXISTS pulse_queries (
    id BIGINT PRIMARY KEY DEFAULT nextval('pulse_queries_id_seq'),
    normalized_sql VARCHAR NOT NULL UNIQUE,
    analysis VARCHAR
);
CREATE SEQUENCE IF NOT EXISTS pulse_operations_id_seq START 1;
CREATE TABLE IF NOT EXISTS pulse_operations (
    id BIGINT PRIMARY KEY DEFAULT nextval('pulse_operations_id_seq'),
    query_id BIGINT,
    request_id BIGINT,
    duration DOUBLE NOT NULL,
    occurred_at_us BIGINT NOT NULL,
    codebase_location VARCHAR,
    label VARCHAR NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pulse_operations_query_time
    ON pulse_operations (query_id, occurred_at_us);
"#;

const OPERATION_COLUMNS: &str =
    "id, query_id, request_id, duration, occurred_at_us, codebase_location, label";

/// Embedded DuckDB file holding queries and operations.
///
/// DuckDB is not one of the analysed dialects, so [`AnalysisStore::dialect`]
/// reports [`Dialect::Unknown`] and [`AnalysisStore::explain`] always fails
/// with a diagnostic error.
#[derive(Clone)]
pub struct DuckDbStore {
    database_path: PathBuf,
    limiter: Arc<Semaphore>,
    pool: Arc<Mutex<Vec<duckdb::Connection>>>,
}

impl DuckDbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        tracing::info!(path = %path.display(), max_concurrency = 16, "opening DuckDB store");
        Self {
            database_path: path,
            limiter: Arc::new(Semaphore::new(16)),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure maximum concurrent executions.
    pub fn with_max_concurrency(mut self, max_in_flight: usize) -> Self {
        tracing::debug!(max_concurrency = max_in_flight, "configuring DuckDB concurrency");
        self.limiter = Arc::new(Semaphore::new(max_in_flight));
        self
    }

    /// Create the `pulse_queries` and `pulse_operations` tables if missing.
    pub async fn migrate(&self) -> Result<()> {
        self.with_connection("migrate", |conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// Find-or-create a query by its normalized text.
    pub async fn insert_query(&self, normalized_sql: &str) -> Result<i64> {
        let sql = normalized_sql.to_string();
        self.with_connection("insert_query", move |conn| {
            let mut existing = conn.prepare("SELECT id FROM pulse_queries WHERE normalized_sql = ?")?;
            let mut rows = existing.query(params![sql])?;
            if let Some(row) = rows.next()? {
                return Ok(row.get(0)?);
            }

            let mut insert =
                conn.prepare("INSERT INTO pulse_queries (normalized_sql) VALUES (?) RETURNING id")?;
            let mut inserted = insert.query(params![sql])?;
            match inserted.next()? {
                Some(row) => Ok(row.get(0)?),
                None => Err(PulseError::Storage("insert returned no query id".into())),
            }
        })
        .await
    }

    pub async fn insert_operation(&self, operation: NewOperation) -> Result<Operation> {
        self.with_connection("insert_operation", move |conn| {
            let mut insert = conn.prepare(
                "INSERT INTO pulse_operations \
                 (query_id, request_id, duration, occurred_at_us, codebase_location, label) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )?;
            let mut rows = insert.query(params![
                operation.query_id,
                operation.request_id,
                operation.duration,
                to_micros(operation.occurred_at),
                operation.codebase_location,
                operation.label,
            ])?;
            let id: i64 = match rows.next()? {
                Some(row) => row.get(0)?,
                None => return Err(PulseError::Storage("insert returned no operation id".into())),
            };
            Ok(operation.into_operation(id))
        })
        .await
    }

    /// Waits for a free slot, then hands out a pooled or freshly opened connection.
    async fn lease(&self, op: &'static str) -> Result<(OwnedSemaphorePermit, duckdb::Connection)> {
        if self.limiter.available_permits() == 0 {
            tracing::debug!(op, "store busy, waiting for a slot");
        }
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PulseError::Storage(format!("duckdb store closed: {e}")))?;

        let pooled = self.pool.lock().await.pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => {
                tracing::debug!(op, path = %self.database_path.display(), "connecting to DuckDB file");
                duckdb::Connection::open(&self.database_path)
                    .map_err(|e| PulseError::Storage(format!("open duckdb: {e}")))?
            }
        };
        Ok((permit, conn))
    }

    /// Runs `work` on a leased connection off the async runtime.
    ///
    /// The slot and the connection belong to the blocking task: a caller that
    /// stops waiting (an EXPLAIN timeout) releases neither until `work` returns.
    async fn with_connection<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T> + Send + 'static,
    {
        let (permit, conn) = self.lease(op).await?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = work(&conn);
            tracing::debug!(op, ms = start.elapsed().as_millis(), ok = result.is_ok(), "duckdb call");
            pool.blocking_lock().push(conn);
            drop(permit);
            result
        })
        .await
        .map_err(|e| PulseError::Storage(format!("task join error: {e}")))?
    }
}

fn operation_from_row(row: &duckdb::Row<'_>) -> Result<Operation> {
    Ok(Operation {
        id: row.get(0)?,
        query_id: row.get(1)?,
        request_id: row.get(2)?,
        duration: row.get(3)?,
        occurred_at: from_micros(row.get(4)?)?,
        codebase_location: row.get(5)?,
        label: row.get(6)?,
    })
}

#[async_trait]
impl AnalysisStore for DuckDbStore {
    fn dialect(&self) -> Dialect {
        Dialect::Unknown
    }

    async fn fetch_query(&self, id: i64) -> Result<Option<Query>> {
        self.with_connection("fetch_query", move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, normalized_sql, analysis FROM pulse_queries WHERE id = ?")?;
            let mut rows = stmt.query(params![id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let analysis: Option<String> = row.get(2)?;
            Ok(Some(Query {
                id: row.get(0)?,
                normalized_sql: row.get(1)?,
                analysis: decode_snapshot(analysis.as_deref())?,
            }))
        })
        .await
    }

    async fn fetch_recent_operations(
        &self,
        query_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Operation>> {
        let since = to_micros(since);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection("fetch_recent_operations", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OPERATION_COLUMNS} FROM pulse_operations \
                 WHERE query_id = ? AND occurred_at_us > ? \
                 ORDER BY occurred_at_us DESC LIMIT ?"
            ))?;
            let mut rows = stmt.query(params![query_id, since, limit])?;
            let mut operations = Vec::new();
            while let Some(row) = rows.next()? {
                operations.push(operation_from_row(row)?);
            }
            Ok(operations)
        })
        .await
    }

    async fn save_analysis(&self, query_id: i64, snapshot: &AnalysisSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.with_connection("save_analysis", move |conn| {
            let updated = conn.execute(
                "UPDATE pulse_queries SET analysis = ? WHERE id = ?",
                params![json, query_id],
            )?;
            if updated == 0 {
                return Err(PulseError::NotFound(query_id));
            }
            Ok(())
        })
        .await
    }

    async fn explain(&self, _statement: &str) -> Result<String> {
        Err(PulseError::Diagnostic("EXPLAIN is not supported for DuckDB".into()))
    }

    async fn latest_operation_at(&self, query_id: i64) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = self
            .with_connection("latest_operation_at", move |conn| {
                let mut stmt = conn
                    .prepare("SELECT MAX(occurred_at_us) FROM pulse_operations WHERE query_id = ?")?;
                let mut rows = stmt.query(params![query_id])?;
                match rows.next()? {
                    Some(row) => Ok(row.get(0)?),
                    None => Ok(None),
                }
            })
            .await?;
        latest.map(from_micros).transpose()
    }
}
