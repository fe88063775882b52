//! Query analyzers.
//!
//! Every analyzer is built over one [`AnalysisContext`]: the query's
//! normalized SQL plus the bounded window of recent operations. Analyzers
//! return plain serializable values and degrade to empty/zeroed results on
//! empty or unparseable input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PulseConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::models::{Operation, Query};

pub mod backtrace;
pub mod callsite;
pub mod characteristics;
pub mod explain_plan;
pub mod index_recommendations;
pub mod n_plus_one;
pub mod suggestions;

use backtrace::BacktraceAnalysis;
use characteristics::QueryCharacteristics;
use explain_plan::ExplainPlanResult;
use index_recommendations::IndexRecommendation;
use n_plus_one::NPlusOneAnalysis;
use suggestions::Suggestion;

/// A synchronous analysis stage.
pub trait Analyzer {
    type Output;
    /// Key of this stage in the consolidated result.
    const NAME: &'static str;

    fn analyze(&self) -> Result<Self::Output>;
}

/// Inputs shared by all analyzers for one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub query: &'a Query,
    /// Recent-sample window, most recent first. May be empty.
    pub operations: &'a [Operation],
    pub dialect: Dialect,
    pub config: &'a PulseConfig,
    pub now: DateTime<Utc>,
}

impl<'a> AnalysisContext<'a> {
    pub fn sql(&self) -> &'a str {
        &self.query.normalized_sql
    }

    /// Operations inside the recency window relative to `now`.
    pub fn recent_operations(&self) -> impl Iterator<Item = &'a Operation> + 'a {
        let cutoff = self.now - self.config.analysis.recent_window();
        self.operations
            .iter()
            .filter(move |op| op.occurred_at > cutoff)
    }
}

/// Everything one `analyze` run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzed_at: DateTime<Utc>,
    pub query_characteristics: QueryCharacteristics,
    pub index_recommendations: Vec<IndexRecommendation>,
    pub n_plus_one_analysis: NPlusOneAnalysis,
    pub explain_plan: ExplainPlanResult,
    #[serde(default, with = "empty_object")]
    pub backtrace_analysis: Option<BacktraceAnalysis>,
    pub suggestions: Vec<Suggestion>,
}

/// Occurrence counts in first-seen order.
pub(crate) fn tally<I, S>(items: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    for item in items {
        let item = item.into();
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some((_, count)) => *count += 1,
            None => counts.push((item, 1)),
        }
    }
    counts
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub(crate) fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(part as f64 / total as f64 * 100.0, 1)
}

/// Serializes `None` as `{}` and reads `{}`/`null` back as `None`.
pub(crate) mod empty_object {
    use serde::de::{DeserializeOwned, Error as _};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
        }
    }
}
