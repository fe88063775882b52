//! The analysis orchestrator.
//!
//! One `analyze` run loads the query, samples its recent operations, runs
//! every analyzer over the same context, derives suggestions and replaces
//! the persisted snapshot with a single write at the very end. Any failure
//! before that write leaves the previous snapshot as it was.
//!
//! Concurrent runs for the same query are not serialized; the last save wins.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::analysis::backtrace::BacktraceAnalyzer;
use crate::analysis::characteristics::QueryCharacteristicsAnalyzer;
use crate::analysis::explain_plan::ExplainPlanAnalyzer;
use crate::analysis::index_recommendations::IndexRecommendationEngine;
use crate::analysis::n_plus_one::NPlusOneDetector;
use crate::analysis::suggestions::SuggestionGenerator;
use crate::analysis::{AnalysisContext, AnalysisResult, Analyzer};
use crate::clock::{Clock, SystemClock};
use crate::config::PulseConfig;
use crate::error::{PulseError, Result};
use crate::models::{AnalysisMetadata, AnalysisSnapshot, AnalysisStatus, Query, ANALYSIS_VERSION};
use crate::store::AnalysisStore;

/// Analyzer stages in the order they run, as recorded in snapshot metadata.
pub const ANALYZERS_USED: [&str; 5] = [
    QueryCharacteristicsAnalyzer::NAME,
    IndexRecommendationEngine::NAME,
    NPlusOneDetector::NAME,
    ExplainPlanAnalyzer::NAME,
    BacktraceAnalyzer::NAME,
];

pub struct QueryAnalysisService {
    store: Arc<dyn AnalysisStore>,
    config: PulseConfig,
    clock: Arc<dyn Clock>,
}

impl QueryAnalysisService {
    pub fn new(store: Arc<dyn AnalysisStore>, config: PulseConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// A service on the wall clock.
    pub fn with_system_clock(store: Arc<dyn AnalysisStore>, config: PulseConfig) -> Self {
        Self::new(store, config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// Run every analyzer for `query_id` and persist the consolidated snapshot.
    pub async fn analyze(&self, query_id: i64) -> Result<AnalysisResult> {
        let start = Instant::now();
        let query = self.load_query(query_id).await?;
        let now = self.clock.now();
        let operations = self.sample_operations(query_id, now).await?;
        let dialect = self.store.dialect();

        tracing::info!(
            query_id,
            dialect = %dialect,
            samples = operations.len(),
            "analyzing query"
        );
        tracing::trace!(query_id, sql = %query.normalized_sql, "query text");

        let ctx = AnalysisContext {
            query: &query,
            operations: &operations,
            dialect,
            config: &self.config,
            now,
        };

        let query_characteristics = run_stage(query_id, QueryCharacteristicsAnalyzer::new(&ctx))?;
        let index_recommendations = run_stage(query_id, IndexRecommendationEngine::new(&ctx))?;
        let n_plus_one_analysis = run_stage(query_id, NPlusOneDetector::new(&ctx))?;

        let explain_start = Instant::now();
        let explain_plan = ExplainPlanAnalyzer::new(&ctx, self.store.as_ref())
            .analyze()
            .await;
        tracing::debug!(
            query_id,
            stage = ExplainPlanAnalyzer::NAME,
            has_plan = explain_plan.explain_plan.is_some(),
            ms = explain_start.elapsed().as_millis(),
            "analyzer finished"
        );

        let backtrace_analysis = if operations.is_empty() {
            None
        } else {
            Some(run_stage(query_id, BacktraceAnalyzer::new(&ctx))?)
        };

        let mut result = AnalysisResult {
            analyzed_at: now,
            query_characteristics,
            index_recommendations,
            n_plus_one_analysis,
            explain_plan,
            backtrace_analysis,
            suggestions: Vec::new(),
        };
        result.suggestions = SuggestionGenerator::from_result(&result).generate();

        let snapshot = build_snapshot(&result);
        self.store.save_analysis(query_id, &snapshot).await.map_err(|e| {
            tracing::error!(query_id, error = %e, "failed to save analysis");
            e
        })?;

        tracing::info!(
            query_id,
            issues = snapshot.issues.len(),
            suggestions = result.suggestions.len(),
            n_plus_one = result.n_plus_one_analysis.is_likely_n_plus_one,
            ms = start.elapsed().as_millis(),
            "analysis saved"
        );
        Ok(result)
    }

    /// Whether any operation of the query falls inside the recency window.
    pub async fn has_recent_operations(&self, query_id: i64) -> Result<bool> {
        let since = self.clock.now() - self.config.analysis.recent_window();
        let sample = self.store.fetch_recent_operations(query_id, since, 1).await?;
        Ok(!sample.is_empty())
    }

    pub async fn needs_reanalysis(&self, query_id: i64) -> Result<bool> {
        let (query, latest) = self.query_with_latest(query_id).await?;
        Ok(query.needs_reanalysis(latest))
    }

    pub async fn analysis_status(&self, query_id: i64) -> Result<AnalysisStatus> {
        let (query, latest) = self.query_with_latest(query_id).await?;
        Ok(query.analysis_status(latest))
    }

    async fn query_with_latest(&self, query_id: i64) -> Result<(Query, Option<DateTime<Utc>>)> {
        let query = self.load_query(query_id).await?;
        let latest = self.store.latest_operation_at(query_id).await?;
        Ok((query, latest))
    }

    async fn load_query(&self, query_id: i64) -> Result<Query> {
        self.store
            .fetch_query(query_id)
            .await?
            .ok_or(PulseError::NotFound(query_id))
    }

    async fn sample_operations(
        &self,
        query_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<crate::models::Operation>> {
        let since = now - self.config.analysis.recent_window();
        self.store
            .fetch_recent_operations(query_id, since, self.config.analysis.sample_limit)
            .await
    }
}

fn run_stage<A: Analyzer>(query_id: i64, analyzer: A) -> Result<A::Output> {
    let start = Instant::now();
    let output = analyzer.analyze().map_err(|e| {
        tracing::warn!(query_id, stage = A::NAME, error = %e, "analyzer failed");
        match e {
            err @ PulseError::Analyzer { .. } => err,
            other => PulseError::analyzer(A::NAME, other.to_string()),
        }
    })?;
    tracing::debug!(
        query_id,
        stage = A::NAME,
        ms = start.elapsed().as_millis(),
        "analyzer finished"
    );
    Ok(output)
}

/// The persisted form of a run: stats without pattern issues, all issues in one list.
pub fn build_snapshot(result: &AnalysisResult) -> AnalysisSnapshot {
    let mut issues = result.query_characteristics.pattern_issues.clone();
    issues.extend(result.explain_plan.issues.iter().cloned());

    AnalysisSnapshot {
        analyzed_at: Some(result.analyzed_at),
        explain_plan: result.explain_plan.explain_plan.clone(),
        issues,
        metadata: Some(AnalysisMetadata {
            analyzers_used: ANALYZERS_USED.iter().map(|name| name.to_string()).collect(),
            analysis_version: ANALYSIS_VERSION.to_string(),
            total_recommendations: result.index_recommendations.len(),
            n_plus_one_detected: result.n_plus_one_analysis.is_likely_n_plus_one,
        }),
        query_stats: Some(result.query_characteristics.stats.clone()),
        backtrace_analysis: result.backtrace_analysis.clone(),
        index_recommendations: result.index_recommendations.clone(),
        n_plus_one_analysis: Some(result.n_plus_one_analysis.clone()),
        suggestions: result.suggestions.clone(),
    }
}
