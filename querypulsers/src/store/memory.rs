//! In-process store used by tests and embedders.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::dialect::Dialect;
use crate::error::{PulseError, Result};
use crate::models::{AnalysisSnapshot, Operation, Query};

use super::{AnalysisStore, NewOperation};

type ExplainResponder = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

#[derive(Default)]
struct Tables {
    queries: BTreeMap<i64, Query>,
    operations: Vec<Operation>,
}

/// `RwLock`-guarded tables with a scripted EXPLAIN responder.
pub struct MemoryStore {
    dialect: Dialect,
    tables: RwLock<Tables>,
    explain: Option<ExplainResponder>,
    explain_delay: Option<Duration>,
    explain_calls: AtomicUsize,
    fail_saves: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            dialect: Dialect::Unknown,
            tables: RwLock::new(Tables::default()),
            explain: None,
            explain_delay: None,
            explain_calls: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Answer EXPLAIN statements with `responder`. Without one, EXPLAIN fails.
    pub fn with_explain<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.explain = Some(Arc::new(responder));
        self
    }

    /// Delay every EXPLAIN answer, e.g. to exercise timeouts.
    pub fn with_explain_delay(mut self, delay: Duration) -> Self {
        self.explain_delay = Some(delay);
        self
    }

    /// Make subsequent `save_analysis` calls fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn explain_calls(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    /// Find-or-create a query by its normalized text.
    pub async fn insert_query(&self, normalized_sql: &str) -> i64 {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .queries
            .values()
            .find(|q| q.normalized_sql == normalized_sql)
        {
            return existing.id;
        }
        let id = tables.queries.keys().next_back().map_or(1, |last| last + 1);
        tables.queries.insert(id, Query::new(id, normalized_sql));
        tracing::trace!(query_id = id, "memory store created query");
        id
    }

    pub async fn insert_operation(&self, operation: NewOperation) -> Operation {
        let mut tables = self.tables.write().await;
        let id = tables.operations.len() as i64 + 1;
        let operation = operation.into_operation(id);
        tables.operations.push(operation.clone());
        operation
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch_query(&self, id: i64) -> Result<Option<Query>> {
        Ok(self.tables.read().await.queries.get(&id).cloned())
    }

    async fn fetch_recent_operations(
        &self,
        query_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Operation>> {
        let tables = self.tables.read().await;
        let mut recent: Vec<Operation> = tables
            .operations
            .iter()
            .filter(|op| op.query_id == Some(query_id) && op.occurred_at > since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn save_analysis(&self, query_id: i64, snapshot: &AnalysisSnapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PulseError::Storage("memory store rejected save".into()));
        }
        let mut tables = self.tables.write().await;
        let query = tables
            .queries
            .get_mut(&query_id)
            .ok_or(PulseError::NotFound(query_id))?;
        query.analysis = snapshot.clone();
        Ok(())
    }

    async fn explain(&self, statement: &str) -> Result<String> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.explain_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.explain {
            Some(responder) => responder(statement),
            None => Err(PulseError::Diagnostic("no EXPLAIN responder configured".into())),
        }
    }

    async fn latest_operation_at(&self, query_id: i64) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .operations
            .iter()
            .filter(|op| op.query_id == Some(query_id))
            .map(|op| op.occurred_at)
            .max())
    }
}
