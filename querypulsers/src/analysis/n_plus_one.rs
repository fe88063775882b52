//! N+1 detection: repeated query shapes inside tight request-like clusters.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};
use crate::models::Operation;
use crate::sql_text;

use super::{callsite, round_to, tally, AnalysisContext, Analyzer};

static SINGLE_RECORD_LOOKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)SELECT.*FROM.*WHERE.*=\s*\?").expect("valid lookup regex"));
static LOOKUP_ASSOCIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"from\s+(\w+).*where\s+(\w+)\s*=").expect("valid association regex"));

const GENERIC_INCLUDE_EXAMPLE: &str = "Model.includes(:association)";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NPlusOneAnalysis {
    pub is_likely_n_plus_one: bool,
    pub confidence_score: u32,
    pub evidence: Vec<Evidence>,
    pub suggested_fixes: Vec<SuggestedFix>,
    #[serde(default, with = "super::empty_object")]
    pub execution_patterns: Option<ExecutionPatterns>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    RepetitiveQuery,
    SingleRecordLookup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub description: String,
    pub query_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    EagerLoading,
    Includes,
    Preload,
    Joins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    #[serde(rename = "type")]
    pub kind: FixKind,
    pub description: String,
    pub code_example: String,
}

impl SuggestedFix {
    fn new(kind: FixKind, description: &str, code_example: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.to_string(),
            code_example: code_example.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPatterns {
    pub total_executions: usize,
    pub time_span_minutes: f64,
    pub executions_per_minute: f64,
    pub peak_execution_periods: Vec<PeakPeriod>,
    #[serde(default, with = "super::empty_object")]
    pub common_execution_contexts: Option<ExecutionContexts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakPeriod {
    pub period: String,
    pub executions: usize,
    pub above_average_by: f64,
}

/// Call-site tallies over the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContexts {
    pub controller_actions: BTreeMap<String, usize>,
    pub model_methods: BTreeMap<String, usize>,
    pub unique_locations: usize,
    pub total_contexts: usize,
}

/// Findings from one request cluster.
#[derive(Default)]
struct ClusterFindings {
    confidence: u32,
    evidence: Vec<Evidence>,
    fixes: Vec<SuggestedFix>,
}

pub struct NPlusOneDetector<'a> {
    ctx: &'a AnalysisContext<'a>,
}

impl<'a> NPlusOneDetector<'a> {
    pub fn new(ctx: &'a AnalysisContext<'a>) -> Self {
        Self { ctx }
    }

    /// Greedy partition of the time-sorted sample; singleton clusters are dropped.
    fn request_clusters(&self) -> Vec<Vec<&'a Operation>> {
        let window = Duration::milliseconds(self.ctx.config.n_plus_one.grouping_window_ms);
        let mut sorted: Vec<&Operation> = self.ctx.operations.iter().collect();
        sorted.sort_by_key(|op| op.occurred_at);

        let mut clusters = Vec::new();
        let mut current: Vec<&Operation> = Vec::new();
        for op in sorted {
            let joins_current = current
                .last()
                .map_or(true, |last| op.occurred_at - last.occurred_at < window);
            if !joins_current {
                let finished = std::mem::take(&mut current);
                if finished.len() > 1 {
                    clusters.push(finished);
                }
            }
            current.push(op);
        }
        if current.len() > 1 {
            clusters.push(current);
        }
        clusters
    }

    fn inspect_cluster(&self, cluster: &[&Operation]) -> ClusterFindings {
        let settings = &self.ctx.config.n_plus_one;
        let mut findings = ClusterFindings::default();

        let shapes = tally(cluster.iter().map(|op| sql_text::shape(&op.label)));
        for (shape, count) in shapes {
            if count < settings.repetition_threshold {
                continue;
            }
            let per_occurrence = settings.confidence_per_occurrence;
            findings.confidence = findings
                .confidence
                .saturating_add(u32::try_from(count).unwrap_or(u32::MAX).saturating_mul(per_occurrence));
            findings.evidence.push(Evidence {
                kind: EvidenceKind::RepetitiveQuery,
                description: format!("Query executed {count} times in single request"),
                query_pattern: shape.clone(),
                occurrences: Some(count),
            });

            if SINGLE_RECORD_LOOKUP.is_match(&shape) {
                findings.evidence.push(Evidence {
                    kind: EvidenceKind::SingleRecordLookup,
                    description: "Single record lookup pattern suggests missing eager loading".into(),
                    query_pattern: shape.clone(),
                    occurrences: None,
                });
                findings.fixes.push(SuggestedFix::new(
                    FixKind::EagerLoading,
                    "Use includes() or preload() to load associated records",
                    association_example(&shape),
                ));
            }
        }
        findings
    }

    fn execution_patterns(&self) -> Result<Option<ExecutionPatterns>> {
        let operations = self.ctx.operations;
        if operations.is_empty() {
            return Ok(None);
        }
        let total = operations.len();
        let span_minutes = span_seconds(operations) / 60.0;

        let (time_span_minutes, executions_per_minute) = if total < 2 {
            (0.0, 0.0)
        } else if span_minutes <= 0.0 {
            (0.0, total as f64)
        } else {
            (round_to(span_minutes, 2), round_to(total as f64 / span_minutes, 2))
        };

        Ok(Some(ExecutionPatterns {
            total_executions: total,
            time_span_minutes,
            executions_per_minute,
            peak_execution_periods: self.peak_periods()?,
            common_execution_contexts: execution_contexts(operations),
        }))
    }

    fn peak_periods(&self) -> Result<Vec<PeakPeriod>> {
        let settings = &self.ctx.config.n_plus_one;
        let bucket_secs = settings.peak_bucket_secs.max(1);

        let mut windows: BTreeMap<i64, usize> = BTreeMap::new();
        for op in self.ctx.operations {
            let bucket = op.occurred_at.timestamp().div_euclid(bucket_secs) * bucket_secs;
            *windows.entry(bucket).or_default() += 1;
        }
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let average = windows.values().sum::<usize>() as f64 / windows.len() as f64;
        windows
            .into_iter()
            .filter(|(_, count)| *count as f64 > average * settings.peak_factor)
            .map(|(bucket, count)| {
                Ok(PeakPeriod {
                    period: format_period(bucket, Self::NAME)?,
                    executions: count,
                    above_average_by: round_to((count as f64 - average) / average * 100.0, 1),
                })
            })
            .collect()
    }
}

impl Analyzer for NPlusOneDetector<'_> {
    type Output = NPlusOneAnalysis;
    const NAME: &'static str = "n_plus_one_analysis";

    fn analyze(&self) -> Result<NPlusOneAnalysis> {
        if self.ctx.operations.is_empty() {
            return Ok(NPlusOneAnalysis::default());
        }

        let mut analysis = NPlusOneAnalysis::default();
        for cluster in self.request_clusters() {
            let findings = self.inspect_cluster(&cluster);
            if findings.evidence.is_empty() {
                continue;
            }
            analysis.is_likely_n_plus_one = true;
            analysis.confidence_score = analysis.confidence_score.saturating_add(findings.confidence);
            analysis.evidence.extend(findings.evidence);
            analysis.suggested_fixes.extend(findings.fixes);
        }
        analysis.confidence_score = analysis
            .confidence_score
            .min(self.ctx.config.n_plus_one.max_confidence);
        analysis.execution_patterns = self.execution_patterns()?;

        if analysis.is_likely_n_plus_one {
            analysis.suggested_fixes.extend(orm_fixes());
        }

        tracing::trace!(
            flagged = analysis.is_likely_n_plus_one,
            confidence = analysis.confidence_score,
            "n+1 detection finished"
        );
        Ok(analysis)
    }
}

/// `Post.includes(:user)` when the lookup column looks like a foreign key.
fn association_example(shape: &str) -> String {
    let Some(caps) = LOOKUP_ASSOCIATION.captures(shape) else {
        return GENERIC_INCLUDE_EXAMPLE.to_string();
    };
    match caps[2].strip_suffix("_id") {
        Some(association) if !association.is_empty() => {
            format!("{}.includes(:{association})", sql_text::classify(&caps[1]))
        }
        _ => GENERIC_INCLUDE_EXAMPLE.to_string(),
    }
}

fn orm_fixes() -> [SuggestedFix; 3] {
    [
        SuggestedFix::new(
            FixKind::Includes,
            "Use includes() to eager load associations",
            "User.includes(:posts).where(active: true)",
        ),
        SuggestedFix::new(
            FixKind::Preload,
            "Use preload() when you don't need to query on associations",
            "User.preload(:posts).limit(10)",
        ),
        SuggestedFix::new(
            FixKind::Joins,
            "Use joins() when you only need to filter, not access associated data",
            "User.joins(:posts).where(posts: { published: true })",
        ),
    ]
}

/// Seconds between the earliest and latest sample.
pub(crate) fn span_seconds(operations: &[Operation]) -> f64 {
    let first = operations.iter().map(|op| op.occurred_at).min();
    let last = operations.iter().map(|op| op.occurred_at).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

/// `YYYY-MM-DD HH:MM` label for a unix-second bucket start.
pub(crate) fn format_period(bucket_start: i64, analyzer: &'static str) -> Result<String> {
    DateTime::<Utc>::from_timestamp(bucket_start, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .ok_or_else(|| PulseError::analyzer(analyzer, format!("timestamp {bucket_start} out of range")))
}

fn execution_contexts(operations: &[Operation]) -> Option<ExecutionContexts> {
    let locations: Vec<&str> = operations
        .iter()
        .filter_map(|op| op.codebase_location.as_deref())
        .filter(|loc| !loc.is_empty())
        .collect();
    if locations.is_empty() {
        return None;
    }

    let controller_actions = locations
        .iter()
        .filter_map(|loc| callsite::controller_action(loc));
    let model_methods = locations
        .iter()
        .filter_map(|loc| callsite::model_method(loc))
        .map(|(model, method)| format!("{model}.{method}"));
    let mut unique = locations.clone();
    unique.sort_unstable();
    unique.dedup();

    Some(ExecutionContexts {
        controller_actions: tally(controller_actions).into_iter().collect(),
        model_methods: tally(model_methods).into_iter().collect(),
        unique_locations: unique.len(),
        total_contexts: locations.len(),
    })
}
