//! EXPLAIN execution against one representative sample and plan red flags.
//!
//! This is the only stage that touches the database. Every failure here
//! (no sample, unsupported dialect, error, timeout) degrades to an empty
//! result and is logged; it never fails the surrounding analysis.

use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};
use crate::models::{Issue, Severity};
use crate::store::AnalysisStore;

use super::AnalysisContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainPlanResult {
    pub explain_plan: Option<String>,
    pub issues: Vec<Issue>,
}

pub struct ExplainPlanAnalyzer<'a> {
    ctx: &'a AnalysisContext<'a>,
    store: &'a dyn AnalysisStore,
}

impl<'a> ExplainPlanAnalyzer<'a> {
    pub const NAME: &'static str = "explain_plan";

    pub fn new(ctx: &'a AnalysisContext<'a>, store: &'a dyn AnalysisStore) -> Self {
        Self { ctx, store }
    }

    pub async fn analyze(&self) -> ExplainPlanResult {
        // Samples arrive most recent first.
        let Some(sample) = self.ctx.recent_operations().next() else {
            return ExplainPlanResult::default();
        };

        let explain_plan = self.generate_plan(&sample.label).await;
        let issues = explain_plan
            .as_deref()
            .map(|plan| plan_issues(plan, self.ctx))
            .unwrap_or_default();
        ExplainPlanResult {
            explain_plan,
            issues,
        }
    }

    async fn generate_plan(&self, sql: &str) -> Option<String> {
        let query_id = self.ctx.query.id;
        if !self.ctx.config.explain.enabled {
            tracing::debug!(query_id, "EXPLAIN disabled, skipping plan");
            return None;
        }
        let sanitized = sanitize(sql);
        if sanitized.is_empty() {
            return None;
        }
        let Some(statement) = self.ctx.dialect.explain_statement(sanitized) else {
            tracing::debug!(query_id, dialect = %self.ctx.dialect, "no EXPLAIN variant for dialect");
            return None;
        };

        match self.run_with_timeout(&statement).await {
            Ok(plan) => {
                tracing::debug!(query_id, bytes = plan.len(), "EXPLAIN finished");
                Some(plan)
            }
            Err(e) => {
                tracing::warn!(query_id, error = %e, "EXPLAIN failed, continuing without plan");
                None
            }
        }
    }

    async fn run_with_timeout(&self, statement: &str) -> Result<String> {
        let timeout = self.ctx.config.explain.timeout();
        tracing::trace!(statement, "running EXPLAIN");
        match tokio::time::timeout(timeout, self.store.explain(statement)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PulseError::Diagnostic(format!(
                "EXPLAIN timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Trims whitespace and trailing statement terminators.
fn sanitize(sql: &str) -> &str {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

fn plan_issues(plan: &str, ctx: &AnalysisContext<'_>) -> Vec<Issue> {
    if plan.trim().is_empty() {
        return Vec::new();
    }
    let lower = plan.to_lowercase();
    let mut issues = Vec::new();

    if ["seq scan", "table scan", "full table scan"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        issues.push(Issue::new(
            "sequential_scan",
            Severity::Warning,
            "Query performs sequential/table scan",
            "Poor performance on large tables",
        ));
    }
    if lower.contains("temporary") || lower.contains("filesort") {
        issues.push(Issue::new(
            "temporary_table",
            Severity::Warning,
            "Query uses temporary tables or filesort",
            "Increased memory usage and processing time",
        ));
    }

    issues.extend(ctx.dialect.plan_issues(plan));
    issues
}
