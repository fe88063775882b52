//! Integration tests for the analysis service.
//!
//! These drive `QueryAnalysisService` end to end against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use querypulse::analysis::characteristics::QueryType;
use querypulse::analysis::index_recommendations::IndexType;
use querypulse::analysis::suggestions::{SuggestionGenerator, SuggestionKind};
use querypulse::models::Priority;
use querypulse::{
    AnalysisStatus, AnalysisStore, Dialect, FixedClock, MemoryStore, NewOperation, PulseConfig,
    PulseError, QueryAnalysisService,
};

// ============================================================================
// Test fixtures
// ============================================================================

mod fixtures {
    use super::*;

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub fn now() -> DateTime<Utc> {
        base_time() + Duration::hours(1)
    }

    pub fn service(store: &Arc<MemoryStore>, config: PulseConfig) -> QueryAnalysisService {
        QueryAnalysisService::new(store.clone(), config, Arc::new(FixedClock(now())))
    }

    pub fn interactive(timeout_ms: u64) -> PulseConfig {
        let mut config = PulseConfig::default();
        config.explain.enabled = true;
        config.explain.timeout_ms = timeout_ms;
        config
    }

    /// Records `count` executions of `sql`, `step` apart, starting at [`base_time`].
    pub async fn record(store: &MemoryStore, query_id: i64, sql: &str, count: i64, step: Duration) {
        for i in 0..count {
            store
                .insert_operation(
                    NewOperation::new(query_id, sql, base_time() + step * i as i32)
                        .with_duration(12.5)
                        .with_location("app/controllers/users_controller.rb:12:in `index'"),
                )
                .await;
        }
    }
}

use fixtures::*;

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn lookup_without_samples() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT * FROM users WHERE id = ?").await;

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;

    let stats = &result.query_characteristics.stats;
    assert_eq!(stats.query_type, QueryType::Select);
    assert_eq!(stats.table_count, 1);
    assert_eq!(stats.join_count, 0);
    assert!(result
        .query_characteristics
        .pattern_issues
        .iter()
        .any(|issue| issue.issue_type == "select_star"));

    let rec = result
        .index_recommendations
        .iter()
        .find(|rec| rec.table == "users" && rec.columns == vec!["id".to_string()])
        .expect("users.id recommendation");
    assert_eq!(rec.index_type, IndexType::SingleColumn);
    assert_eq!(rec.priority, Priority::High);
    Ok(())
}

#[tokio::test]
async fn unfiltered_select() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT name FROM users").await;

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let issues: Vec<_> = result
        .query_characteristics
        .pattern_issues
        .iter()
        .map(|issue| issue.issue_type.as_str())
        .collect();
    assert!(issues.contains(&"missing_where_clause"));
    assert!(!result.query_characteristics.stats.has_limit);
    Ok(())
}

#[tokio::test]
async fn burst_within_one_minute_is_suspicious() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sql = "SELECT * FROM posts WHERE user_id = ?";
    let id = store.insert_query(sql).await;
    record(&store, id, "SELECT * FROM posts WHERE user_id = 7", 12, Duration::seconds(1)).await;

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let backtrace = result.backtrace_analysis.expect("backtrace for sampled query");
    assert_eq!(backtrace.total_executions, 12);
    assert!(backtrace.potential_n_plus_one.detected);
    assert_eq!(backtrace.potential_n_plus_one.suspicious_periods.len(), 1);
    assert_eq!(backtrace.potential_n_plus_one.suspicious_periods[0].count, 12);
    Ok(())
}

#[tokio::test]
async fn complex_reporting_query() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_query(
            "SELECT u.name, COUNT(c.id) FROM users u \
             INNER JOIN posts p ON p.user_id = u.id \
             LEFT JOIN comments c ON c.post_id = p.id \
             WHERE u.active = ? GROUP BY u.name HAVING COUNT(c.id) > ? ORDER BY u.name",
        )
        .await;

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let stats = &result.query_characteristics.stats;
    assert!(stats.estimated_complexity > 10);
    assert_eq!(stats.table_count, 3);
    assert_eq!(stats.join_count, 2);
    assert!(stats.has_group_by && stats.has_having && stats.has_order_by && stats.has_aggregations);
    Ok(())
}

#[tokio::test]
async fn stale_samples_leave_diagnostics_empty() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new().with_dialect(Dialect::Postgres).with_explain(|_| {
        Ok("Seq Scan on users".into())
    }));
    let id = store.insert_query("SELECT * FROM users WHERE email = ?").await;
    store
        .insert_operation(NewOperation::new(
            id,
            "SELECT * FROM users WHERE email = 'a@b.c'",
            now() - Duration::hours(72),
        ))
        .await;

    let result = service(&store, interactive(1_000)).analyze(id).await?;
    assert!(result.explain_plan.explain_plan.is_none());
    assert!(result.backtrace_analysis.is_none());
    assert_eq!(store.explain_calls(), 0);
    assert_eq!(result.query_characteristics.stats.table_count, 1);

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["backtrace_analysis"], json!({}));
    assert_eq!(json["explain_plan"], json!({"explain_plan": null, "issues": []}));
    Ok(())
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn snapshot_round_trips_query_stats() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT id FROM orders WHERE customer_id = ? ORDER BY id").await;
    record(&store, id, "SELECT id FROM orders WHERE customer_id = 3 ORDER BY id", 3, Duration::minutes(5)).await;

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let query = store.fetch_query(id).await?.expect("query exists");

    assert!(query.is_analyzed());
    assert_eq!(query.analysis.analyzed_at, Some(now()));
    assert_eq!(query.analysis.query_stats.as_ref(), Some(&result.query_characteristics.stats));
    assert_eq!(query.analysis.suggestions, result.suggestions);
    assert_eq!(query.analysis.index_recommendations, result.index_recommendations);

    let metadata = query.analysis.metadata.expect("metadata");
    assert_eq!(metadata.analysis_version, "2.0");
    assert_eq!(metadata.total_recommendations, result.index_recommendations.len());
    assert_eq!(
        metadata.analyzers_used,
        vec![
            "query_characteristics",
            "index_recommendations",
            "n_plus_one_analysis",
            "explain_plan",
            "backtrace_analysis"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_query_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let err = service(&store, PulseConfig::non_interactive())
        .analyze(404)
        .await
        .unwrap_err();
    assert!(matches!(err, PulseError::NotFound(404)));
}

#[tokio::test]
async fn failed_save_keeps_previous_snapshot() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT name FROM users").await;
    let svc = service(&store, PulseConfig::non_interactive());

    svc.analyze(id).await?;
    let before = store.fetch_query(id).await?.expect("query exists").analysis;

    record(&store, id, "SELECT name FROM users", 4, Duration::milliseconds(10)).await;
    store.fail_saves(true);
    let err = svc.analyze(id).await.unwrap_err();
    assert!(matches!(err, PulseError::Storage(_)));

    let after = store.fetch_query(id).await?.expect("query exists").analysis;
    assert_eq!(after, before);
    Ok(())
}

// ============================================================================
// EXPLAIN
// ============================================================================

#[tokio::test]
async fn plan_issues_follow_pattern_issues() -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::new()
            .with_dialect(Dialect::Postgres)
            .with_explain(|_| Ok("Seq Scan on users  (cost=0.00..1520.50 rows=50000 width=64)".into())),
    );
    let id = store.insert_query("SELECT * FROM users WHERE id = ?").await;
    record(&store, id, "SELECT * FROM users WHERE id = 1", 1, Duration::seconds(1)).await;

    let result = service(&store, interactive(1_000)).analyze(id).await?;
    assert!(result.explain_plan.explain_plan.is_some());

    let query = store.fetch_query(id).await?.expect("query exists");
    let issues: Vec<_> = query.analysis.issues.iter().map(|i| i.issue_type.as_str()).collect();
    assert_eq!(issues.first(), Some(&"select_star"));
    assert!(issues.ends_with(&["sequential_scan", "high_cost_operation"]));
    Ok(())
}

#[tokio::test]
async fn explain_failure_does_not_fail_analysis() -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::new()
            .with_dialect(Dialect::MySql)
            .with_explain(|_| Err(PulseError::Diagnostic("permission denied".into()))),
    );
    let id = store.insert_query("SELECT * FROM users WHERE id = ?").await;
    record(&store, id, "SELECT * FROM users WHERE id = 1", 2, Duration::seconds(1)).await;

    let result = service(&store, interactive(1_000)).analyze(id).await?;
    assert!(result.explain_plan.explain_plan.is_none());
    assert!(result.explain_plan.issues.is_empty());
    assert_eq!(store.explain_calls(), 1);
    assert!(store.fetch_query(id).await?.expect("query exists").is_analyzed());
    Ok(())
}

#[tokio::test]
async fn slow_explain_is_abandoned() -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::new()
            .with_dialect(Dialect::Postgres)
            .with_explain(|_| Ok("Seq Scan on users".into()))
            .with_explain_delay(StdDuration::from_millis(500)),
    );
    let id = store.insert_query("SELECT * FROM users WHERE id = ?").await;
    record(&store, id, "SELECT * FROM users WHERE id = 1", 1, Duration::seconds(1)).await;

    let result = service(&store, interactive(50)).analyze(id).await?;
    assert!(result.explain_plan.explain_plan.is_none());
    Ok(())
}

// ============================================================================
// N+1 and suggestions
// ============================================================================

#[tokio::test]
async fn repeated_lookups_are_flagged() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT * FROM comments WHERE post_id = ?").await;
    for i in 0..5 {
        store
            .insert_operation(NewOperation::new(
                id,
                format!("SELECT * FROM comments WHERE post_id = {i}"),
                base_time() + Duration::milliseconds(i * 10),
            ))
            .await;
    }

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let n_plus_one = &result.n_plus_one_analysis;
    assert!(n_plus_one.is_likely_n_plus_one);
    assert_eq!(n_plus_one.confidence_score, 50);
    assert!(result
        .suggestions
        .iter()
        .any(|s| s.kind == SuggestionKind::NPlusOne && s.priority == Priority::High));

    let query = store.fetch_query(id).await?.expect("query exists");
    assert!(query.analysis.metadata.expect("metadata").n_plus_one_detected);
    Ok(())
}

#[tokio::test]
async fn suggestions_are_stable_and_unique() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_query("SELECT * FROM posts WHERE user_id = ? AND published_at > ? ORDER BY created_at DESC")
        .await;
    for i in 0..4 {
        store
            .insert_operation(NewOperation::new(
                id,
                "SELECT * FROM posts WHERE user_id = 1 AND published_at > '2024-01-01' ORDER BY created_at DESC",
                base_time() + Duration::milliseconds(i * 20),
            ))
            .await;
    }

    let result = service(&store, PulseConfig::non_interactive()).analyze(id).await?;
    let regenerated = SuggestionGenerator::from_result(&result).generate();
    assert_eq!(regenerated, result.suggestions);
    assert_eq!(SuggestionGenerator::from_result(&result).generate(), regenerated);

    let actions: HashSet<_> = result.suggestions.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions.len(), result.suggestions.len());

    let ranks: Vec<_> = result.suggestions.iter().map(|s| s.priority.rank()).collect();
    assert!(ranks.windows(2).all(|pair| pair[0] >= pair[1]));
    Ok(())
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn status_tracks_new_executions() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT name FROM users WHERE id = ?").await;
    record(&store, id, "SELECT name FROM users WHERE id = 1", 2, Duration::minutes(1)).await;
    let svc = service(&store, PulseConfig::non_interactive());

    assert_eq!(svc.analysis_status(id).await?, AnalysisStatus::NotAnalyzed);
    assert!(svc.needs_reanalysis(id).await?);
    assert!(svc.has_recent_operations(id).await?);

    svc.analyze(id).await?;
    assert_eq!(svc.analysis_status(id).await?, AnalysisStatus::Current);
    assert!(!svc.needs_reanalysis(id).await?);

    store
        .insert_operation(NewOperation::new(id, "SELECT name FROM users WHERE id = 2", now() + Duration::minutes(5)))
        .await;
    assert_eq!(svc.analysis_status(id).await?, AnalysisStatus::NeedsUpdate);
    assert!(matches!(svc.analysis_status(999).await, Err(PulseError::NotFound(999))));
    Ok(())
}

#[tokio::test]
async fn old_operations_are_not_recent() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_query("SELECT 1").await;
    store
        .insert_operation(NewOperation::new(id, "SELECT 1", now() - Duration::hours(49)))
        .await;
    assert!(!service(&store, PulseConfig::non_interactive()).has_recent_operations(id).await?);
    Ok(())
}
