//! SQLite-backed store.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::dialect::Dialect;
use crate::error::{PulseError, Result};
use crate::executor::{sqlite_value_to_json, ColumnMeta, QueryResult};
use crate::models::{AnalysisSnapshot, Operation, Query};

use super::{decode_snapshot, from_micros, to_micros, AnalysisStore, NewOperation};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pulse_queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    normalized_sql TEXT NOT NULL UNIQUE,
    analysis TEXT
);
CREATE TABLE IF NOT EXISTS pulse_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_id INTEGER REFERENCES pulse_queries (id),
    request_id INTEGER,
    duration REAL NOT NULL,
    occurred_at_us INTEGER NOT NULL,
    codebase_location TEXT,
    label TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pulse_operations_query_time
    ON pulse_operations (query_id, occurred_at_us);
"#;

/// A single serialized SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening SQLite store");
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

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
            conn.execute(
                "INSERT OR IGNORE INTO pulse_queries (normalized_sql) VALUES (?1)",
                params![sql],
            )?;
            Ok(conn.query_row(
                "SELECT id FROM pulse_queries WHERE normalized_sql = ?1",
                params![sql],
                |row| row.get(0),
            )?)
        })
        .await
    }

    pub async fn insert_operation(&self, operation: NewOperation) -> Result<Operation> {
        self.with_connection("insert_operation", move |conn| {
            conn.execute(
                "INSERT INTO pulse_operations \
                 (query_id, request_id, duration, occurred_at_us, codebase_location, label) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    operation.query_id,
                    operation.request_id,
                    operation.duration,
                    to_micros(operation.occurred_at),
                    operation.codebase_location,
                    operation.label,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(operation.into_operation(id))
        })
        .await
    }

    /// Runs `work` against the connection off the async runtime.
    async fn with_connection<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let guard = self.conn.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = work(&guard);
            tracing::debug!(op, ms = start.elapsed().as_millis(), ok = result.is_ok(), "sqlite call");
            result
        })
        .await
        .map_err(|e| PulseError::Storage(format!("task join error: {e}")))?
    }
}

fn operation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let occurred_at = from_micros(row.get(4)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, e.to_string().into())
    })?;
    Ok(Operation {
        id: row.get(0)?,
        query_id: row.get(1)?,
        request_id: row.get(2)?,
        duration: row.get(3)?,
        occurred_at,
        codebase_location: row.get(5)?,
        label: row.get(6)?,
    })
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch_query(&self, id: i64) -> Result<Option<Query>> {
        let row = self
            .with_connection("fetch_query", move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, normalized_sql, analysis FROM pulse_queries WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Option<String>>(2)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        row.map(|(id, normalized_sql, analysis)| {
            Ok(Query {
                id,
                normalized_sql,
                analysis: decode_snapshot(analysis.as_deref())?,
            })
        })
        .transpose()
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
            let mut stmt = conn.prepare(
                "SELECT id, query_id, request_id, duration, occurred_at_us, codebase_location, label \
                 FROM pulse_operations WHERE query_id = ?1 AND occurred_at_us > ?2 \
                 ORDER BY occurred_at_us DESC LIMIT ?3",
            )?;
            let operations = stmt
                .query_map(params![query_id, since, limit], operation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(operations)
        })
        .await
    }

    async fn save_analysis(&self, query_id: i64, snapshot: &AnalysisSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.with_connection("save_analysis", move |conn| {
            let updated = conn.execute(
                "UPDATE pulse_queries SET analysis = ?1 WHERE id = ?2",
                params![json, query_id],
            )?;
            if updated == 0 {
                return Err(PulseError::NotFound(query_id));
            }
            Ok(())
        })
        .await
    }

    async fn explain(&self, statement: &str) -> Result<String> {
        let statement = statement.to_string();
        let result = self
            .with_connection("explain", move |conn| {
                let mut stmt = conn
                    .prepare(&statement)
                    .map_err(|e| PulseError::Diagnostic(e.to_string()))?;
                let columns: Vec<ColumnMeta> = stmt
                    .column_names()
                    .into_iter()
                    .map(|name| ColumnMeta {
                        name: name.to_string(),
                    })
                    .collect();
                let width = columns.len();
                let mut rows = stmt.query([])?;
                let mut values = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut line = Vec::with_capacity(width);
                    for idx in 0..width {
                        line.push(sqlite_value_to_json(row.get_ref(idx)?));
                    }
                    values.push(line);
                }
                Ok(QueryResult {
                    columns,
                    rows: values,
                })
            })
            .await?;
        Ok(result.plan_text(" | "))
    }

    async fn latest_operation_at(&self, query_id: i64) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = self
            .with_connection("latest_operation_at", move |conn| {
                Ok(conn.query_row(
                    "SELECT MAX(occurred_at_us) FROM pulse_operations WHERE query_id = ?1",
                    params![query_id],
                    |row| row.get(0),
                )?)
            })
            .await?;
        latest.map(from_micros).transpose()
    }
}
