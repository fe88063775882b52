use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::backtrace::BacktraceAnalysis;
use crate::analysis::characteristics::QueryStats;
use crate::analysis::index_recommendations::IndexRecommendation;
use crate::analysis::n_plus_one::NPlusOneAnalysis;
use crate::analysis::suggestions::Suggestion;
use crate::config::QueryThresholds;

pub const ANALYSIS_VERSION: &str = "2.0";

/// A distinct normalized SQL statement, the subject of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub normalized_sql: String,
    #[serde(default)]
    pub analysis: AnalysisSnapshot,
}

/// One observed execution of a query within a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub query_id: Option<i64>,
    pub request_id: Option<i64>,
    /// Milliseconds.
    pub duration: f64,
    pub occurred_at: DateTime<Utc>,
    pub codebase_location: Option<String>,
    pub label: String,
}

/// Persisted result of the most recent analysis. Always replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSnapshot {
    pub analyzed_at: Option<DateTime<Utc>>,
    pub explain_plan: Option<String>,
    pub issues: Vec<Issue>,
    pub metadata: Option<AnalysisMetadata>,
    pub query_stats: Option<QueryStats>,
    #[serde(default, with = "crate::analysis::empty_object")]
    pub backtrace_analysis: Option<BacktraceAnalysis>,
    pub index_recommendations: Vec<IndexRecommendation>,
    pub n_plus_one_analysis: Option<NPlusOneAnalysis>,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analyzers_used: Vec<String>,
    pub analysis_version: String,
    pub total_recommendations: usize,
    pub n_plus_one_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub impact: String,
}

impl Issue {
    pub fn new(
        issue_type: &str,
        severity: Severity,
        description: impl Into<String>,
        impact: impl Into<String>,
    ) -> Self {
        Self {
            issue_type: issue_type.to_string(),
            severity,
            description: description.into(),
            impact: impact.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Ordering weight used when ranking suggestions.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    /// Base score of an index recommendation before frequency boosting.
    pub fn base_score(self) -> u32 {
        match self {
            Priority::High => 100,
            Priority::Medium => 60,
            Priority::Low => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PerformanceCritical,
    DatabaseOptimization,
    SqlOptimization,
    CodeQuality,
}

impl Category {
    pub fn rank(self) -> u8 {
        match self {
            Category::PerformanceCritical => 4,
            Category::DatabaseOptimization => 3,
            Category::SqlOptimization => 2,
            Category::CodeQuality => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    NotAnalyzed,
    NeedsUpdate,
    Current,
}

/// Speed bucket of a query's average duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Fast,
    Slow,
    VerySlow,
    Critical,
}

impl PerformanceStatus {
    pub fn classify(average_ms: f64, thresholds: &QueryThresholds) -> Self {
        if average_ms < thresholds.slow {
            PerformanceStatus::Fast
        } else if average_ms < thresholds.very_slow {
            PerformanceStatus::Slow
        } else if average_ms < thresholds.critical {
            PerformanceStatus::VerySlow
        } else {
            PerformanceStatus::Critical
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl Query {
    pub fn new(id: i64, normalized_sql: impl Into<String>) -> Self {
        Self {
            id,
            normalized_sql: normalized_sql.into(),
            analysis: AnalysisSnapshot::default(),
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis.analyzed_at.is_some()
    }

    /// True when never analyzed or an execution was recorded after the last analysis.
    pub fn needs_reanalysis(&self, latest_operation_at: Option<DateTime<Utc>>) -> bool {
        match (self.analysis.analyzed_at, latest_operation_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(analyzed_at), Some(latest)) => latest > analyzed_at,
        }
    }

    pub fn analysis_status(&self, latest_operation_at: Option<DateTime<Utc>>) -> AnalysisStatus {
        if !self.is_analyzed() {
            AnalysisStatus::NotAnalyzed
        } else if self.needs_reanalysis(latest_operation_at) {
            AnalysisStatus::NeedsUpdate
        } else {
            AnalysisStatus::Current
        }
    }

    pub fn issues_by_severity(&self) -> BTreeMap<Severity, Vec<&Issue>> {
        let mut grouped: BTreeMap<Severity, Vec<&Issue>> = BTreeMap::new();
        if !self.is_analyzed() {
            return grouped;
        }
        for issue in &self.analysis.issues {
            grouped.entry(issue.severity).or_default().push(issue);
        }
        grouped
    }

    pub fn critical_issues_count(&self) -> usize {
        self.issues_by_severity()
            .get(&Severity::Critical)
            .map_or(0, Vec::len)
    }

    pub fn warning_issues_count(&self) -> usize {
        self.issues_by_severity()
            .get(&Severity::Warning)
            .map_or(0, Vec::len)
    }
}

impl Operation {
    pub fn new(label: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            query_id: None,
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

    pub fn for_query(mut self, query_id: i64) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn analyzed_query(issues: Vec<Issue>) -> Query {
        let mut query = Query::new(1, "SELECT * FROM users");
        query.analysis.analyzed_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        query.analysis.issues = issues;
        query
    }

    #[test]
    fn status_tracks_new_operations() {
        let never = Query::new(1, "SELECT 1");
        assert_eq!(never.analysis_status(None), AnalysisStatus::NotAnalyzed);

        let query = analyzed_query(vec![]);
        let analyzed_at = query.analysis.analyzed_at.unwrap();
        assert_eq!(query.analysis_status(None), AnalysisStatus::Current);
        assert_eq!(
            query.analysis_status(Some(analyzed_at - Duration::minutes(1))),
            AnalysisStatus::Current
        );
        assert_eq!(
            query.analysis_status(Some(analyzed_at + Duration::minutes(1))),
            AnalysisStatus::NeedsUpdate
        );
    }

    #[test]
    fn counts_issues_by_severity() {
        let query = analyzed_query(vec![
            Issue::new("missing_limit", Severity::Warning, "a", "b"),
            Issue::new("select_star", Severity::Info, "a", "b"),
            Issue::new("sequential_scan", Severity::Warning, "a", "b"),
        ]);
        assert_eq!(query.warning_issues_count(), 2);
        assert_eq!(query.critical_issues_count(), 0);
        assert_eq!(query.issues_by_severity()[&Severity::Info].len(), 1);
    }

    #[test]
    fn classifies_performance_status() {
        let thresholds = QueryThresholds::default();
        assert_eq!(PerformanceStatus::classify(10.0, &thresholds), PerformanceStatus::Fast);
        assert_eq!(PerformanceStatus::classify(200.0, &thresholds), PerformanceStatus::Slow);
        assert_eq!(PerformanceStatus::classify(750.0, &thresholds), PerformanceStatus::VerySlow);
        assert_eq!(PerformanceStatus::classify(5000.0, &thresholds).ordinal(), 3);
    }

    #[test]
    fn issue_serializes_type_key() {
        let issue = Issue::new("select_star", Severity::Info, "d", "i");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "select_star");
        assert_eq!(json["severity"], "info");
    }
}
