//! Consolidates analyzer findings into one ranked suggestion list.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{Category, Priority};

use super::characteristics::QueryCharacteristics;
use super::explain_plan::ExplainPlanResult;
use super::index_recommendations::IndexRecommendation;
use super::n_plus_one::NPlusOneAnalysis;
use super::AnalysisResult;

const MANY_JOINS: usize = 3;
const HIGH_COMPLEXITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Optimization,
    Refactoring,
    Index,
    NPlusOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub action: String,
    pub benefit: String,
    pub priority: Priority,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
}

impl Suggestion {
    fn new(
        kind: SuggestionKind,
        action: impl Into<String>,
        benefit: impl Into<String>,
        priority: Priority,
        category: Category,
    ) -> Self {
        Self {
            kind,
            action: action.into(),
            benefit: benefit.into(),
            priority,
            category,
            migration_code: None,
            table: None,
            columns: None,
            code_example: None,
            confidence: None,
        }
    }
}

/// Pure mapping from findings to suggestions; performs no I/O.
pub struct SuggestionGenerator<'a> {
    characteristics: &'a QueryCharacteristics,
    index_recommendations: &'a [IndexRecommendation],
    n_plus_one: &'a NPlusOneAnalysis,
    explain_plan: &'a ExplainPlanResult,
}

impl<'a> SuggestionGenerator<'a> {
    pub fn new(
        characteristics: &'a QueryCharacteristics,
        index_recommendations: &'a [IndexRecommendation],
        n_plus_one: &'a NPlusOneAnalysis,
        explain_plan: &'a ExplainPlanResult,
    ) -> Self {
        Self {
            characteristics,
            index_recommendations,
            n_plus_one,
            explain_plan,
        }
    }

    /// Reads the analyzer sections of `result`, ignoring any suggestions already on it.
    pub fn from_result(result: &'a AnalysisResult) -> Self {
        Self::new(
            &result.query_characteristics,
            &result.index_recommendations,
            &result.n_plus_one_analysis,
            &result.explain_plan,
        )
    }

    pub fn generate(&self) -> Vec<Suggestion> {
        let mut suggestions = self.issue_suggestions();
        suggestions.extend(self.index_suggestions());
        suggestions.extend(self.n_plus_one_suggestions());
        suggestions.extend(self.characteristic_suggestions());
        suggestions.extend(self.explain_suggestions());
        prioritize(suggestions)
    }

    fn issue_suggestions(&self) -> Vec<Suggestion> {
        use Category::*;
        use Priority::*;
        use SuggestionKind::*;

        self.characteristics
            .pattern_issues
            .iter()
            .filter_map(|issue| match issue.issue_type.as_str() {
                "select_star" => Some(Suggestion::new(
                    Optimization,
                    "Specify only needed columns instead of SELECT *",
                    "Reduced memory usage and faster data transfer",
                    Medium,
                    SqlOptimization,
                )),
                "missing_limit" => Some(Suggestion::new(
                    Optimization,
                    "Add LIMIT clause to prevent large result sets",
                    "Controlled memory usage and faster response times",
                    High,
                    SqlOptimization,
                )),
                "missing_where_clause" => Some(Suggestion::new(
                    Optimization,
                    "Add WHERE clause to filter results",
                    "Avoid full table scans and reduce data transfer",
                    High,
                    SqlOptimization,
                )),
                "complex_where_clause" => Some(Suggestion::new(
                    Refactoring,
                    "Simplify WHERE clause by breaking into multiple queries or using views",
                    "Easier maintenance and potentially better performance",
                    Medium,
                    CodeQuality,
                )),
                _ => None,
            })
            .collect()
    }

    fn index_suggestions(&self) -> Vec<Suggestion> {
        self.index_recommendations
            .iter()
            .map(|rec| Suggestion {
                migration_code: Some(rec.migration_code.clone()),
                table: Some(rec.table.clone()),
                columns: Some(rec.columns.clone()),
                ..Suggestion::new(
                    SuggestionKind::Index,
                    format!("Add {} index: {}", rec.index_type.as_str(), rec.migration_code),
                    rec.estimated_benefit.clone(),
                    rec.priority,
                    Category::DatabaseOptimization,
                )
            })
            .collect()
    }

    fn n_plus_one_suggestions(&self) -> Vec<Suggestion> {
        if !self.n_plus_one.is_likely_n_plus_one {
            return Vec::new();
        }
        self.n_plus_one
            .suggested_fixes
            .iter()
            .map(|fix| Suggestion {
                code_example: Some(fix.code_example.clone()),
                confidence: Some(self.n_plus_one.confidence_score),
                ..Suggestion::new(
                    SuggestionKind::NPlusOne,
                    fix.description.clone(),
                    "Eliminate N+1 queries and reduce database load",
                    Priority::High,
                    Category::PerformanceCritical,
                )
            })
            .collect()
    }

    fn characteristic_suggestions(&self) -> Vec<Suggestion> {
        let stats = &self.characteristics.stats;
        let mut suggestions = Vec::new();

        if stats.join_count > MANY_JOINS {
            suggestions.push(Suggestion::new(
                SuggestionKind::Optimization,
                format!("Review if all {} JOINs are necessary", stats.join_count),
                "Simplified query execution and better performance",
                Priority::Medium,
                Category::SqlOptimization,
            ));
        }
        if stats.estimated_complexity > HIGH_COMPLEXITY {
            suggestions.push(Suggestion::new(
                SuggestionKind::Refactoring,
                format!(
                    "Consider breaking complex query (complexity: {}) into smaller parts",
                    stats.estimated_complexity
                ),
                "Easier maintenance and potentially better performance",
                Priority::Medium,
                Category::CodeQuality,
            ));
        }
        if stats.has_subqueries && stats.join_count > 1 {
            suggestions.push(Suggestion::new(
                SuggestionKind::Optimization,
                "Consider converting subqueries to JOINs for better performance",
                "More efficient query execution in most databases",
                Priority::Medium,
                Category::SqlOptimization,
            ));
        }
        suggestions
    }

    fn explain_suggestions(&self) -> Vec<Suggestion> {
        use Category::*;
        use Priority::*;
        use SuggestionKind::*;

        self.explain_plan
            .issues
            .iter()
            .filter_map(|issue| match issue.issue_type.as_str() {
                "sequential_scan" => Some(Suggestion::new(
                    Index,
                    "Consider adding database indexes for WHERE clause columns",
                    "Dramatically faster query execution",
                    High,
                    DatabaseOptimization,
                )),
                "temporary_table" => Some(Suggestion::new(
                    Optimization,
                    "Optimize query to avoid temporary tables and filesort operations",
                    "Reduced memory usage and faster execution",
                    Medium,
                    SqlOptimization,
                )),
                "high_cost_operation" => Some(Suggestion::new(
                    Optimization,
                    "Review query execution plan for high-cost operations",
                    "Identify specific bottlenecks for targeted optimization",
                    High,
                    PerformanceCritical,
                )),
                "where_without_index" => Some(Suggestion::new(
                    Index,
                    "Add indexes to support WHERE clause conditions",
                    "Eliminate row-by-row filtering during query execution",
                    High,
                    DatabaseOptimization,
                )),
                _ => None,
            })
            .collect()
    }
}

/// First occurrence of each action wins; then priority desc, category desc, action asc.
fn prioritize(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Suggestion> = suggestions
        .into_iter()
        .filter(|s| seen.insert(s.action.clone()))
        .collect();
    unique.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then_with(|| b.category.rank().cmp(&a.category.rank()))
            .then_with(|| a.action.cmp(&b.action))
    });
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::characteristics::{QueryCharacteristics, QueryStats, QueryType};
    use crate::analysis::index_recommendations::{ExecutionContext, IndexType};
    use crate::analysis::n_plus_one::{FixKind, SuggestedFix};
    use crate::models::{Issue, Severity};

    fn characteristics(issue_types: &[&str]) -> QueryCharacteristics {
        QueryCharacteristics {
            stats: QueryStats {
                query_type: QueryType::Select,
                table_count: 1,
                join_count: 0,
                where_clause_complexity: 1,
                has_subqueries: false,
                has_limit: false,
                has_order_by: false,
                has_group_by: false,
                has_having: false,
                has_distinct: false,
                has_aggregations: false,
                estimated_complexity: 3,
            },
            pattern_issues: issue_types
                .iter()
                .map(|t| Issue::new(t, Severity::Warning, "d", "i"))
                .collect(),
        }
    }

    fn recommendation(columns: &[&str], priority: Priority) -> IndexRecommendation {
        IndexRecommendation {
            index_type: IndexType::SingleColumn,
            table: "users".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            reason: "equality condition".into(),
            priority,
            migration_code: format!("add_index :users, :{}", columns[0]),
            estimated_benefit: "High - equality lookups".into(),
            priority_score: priority.base_score(),
            execution_context: ExecutionContext {
                frequency: 0,
                frequency_description: "Low frequency".into(),
            },
        }
    }

    fn flagged_n_plus_one() -> NPlusOneAnalysis {
        NPlusOneAnalysis {
            is_likely_n_plus_one: true,
            confidence_score: 40,
            suggested_fixes: vec![SuggestedFix {
                kind: FixKind::Includes,
                description: "Use includes() to eager load associations".into(),
                code_example: "User.includes(:posts).where(active: true)".into(),
            }],
            ..NPlusOneAnalysis::default()
        }
    }

    fn explain(issue_types: &[&str]) -> ExplainPlanResult {
        ExplainPlanResult {
            explain_plan: Some("plan".into()),
            issues: issue_types
                .iter()
                .map(|t| Issue::new(t, Severity::Warning, "d", "i"))
                .collect(),
        }
    }

    #[test]
    fn ranks_by_priority_then_category_then_action() {
        let chars = characteristics(&["select_star", "missing_limit"]);
        let recs = vec![recommendation(&["id"], Priority::High)];
        let n_plus_one = flagged_n_plus_one();
        let plan = explain(&["sequential_scan", "temporary_table"]);

        let suggestions = SuggestionGenerator::new(&chars, &recs, &n_plus_one, &plan).generate();
        let actions: Vec<&str> = suggestions.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "Use includes() to eager load associations",
                "Add single_column index: add_index :users, :id",
                "Consider adding database indexes for WHERE clause columns",
                "Add LIMIT clause to prevent large result sets",
                "Optimize query to avoid temporary tables and filesort operations",
                "Specify only needed columns instead of SELECT *",
            ]
        );

        let n_plus_one = &suggestions[0];
        assert_eq!(n_plus_one.kind, SuggestionKind::NPlusOne);
        assert_eq!(n_plus_one.confidence, Some(40));
        let index = &suggestions[1];
        assert_eq!(index.columns.as_deref(), Some(&["id".to_string()][..]));
        assert_eq!(index.benefit, "High - equality lookups");
    }

    #[test]
    fn unflagged_n_plus_one_contributes_nothing() {
        let chars = characteristics(&[]);
        let mut n_plus_one = flagged_n_plus_one();
        n_plus_one.is_likely_n_plus_one = false;
        let plan = ExplainPlanResult::default();

        let suggestions = SuggestionGenerator::new(&chars, &[], &n_plus_one, &plan).generate();
        assert!(suggestions.is_empty());
    }

    #[test]
    fn duplicate_actions_collapse() {
        let chars = characteristics(&["select_star", "select_star"]);
        let plan = explain(&["sequential_scan", "sequential_scan", "large_hash_join"]);
        let n_plus_one = NPlusOneAnalysis::default();

        let suggestions = SuggestionGenerator::new(&chars, &[], &n_plus_one, &plan).generate();
        assert_eq!(suggestions.len(), 2);
        let again = SuggestionGenerator::new(&chars, &[], &n_plus_one, &plan).generate();
        assert_eq!(suggestions, again);
    }

    #[test]
    fn characteristic_thresholds() {
        let mut chars = characteristics(&[]);
        chars.stats.join_count = 4;
        chars.stats.has_subqueries = true;
        chars.stats.estimated_complexity = 11;
        let n_plus_one = NPlusOneAnalysis::default();
        let plan = ExplainPlanResult::default();

        let suggestions = SuggestionGenerator::new(&chars, &[], &n_plus_one, &plan).generate();
        let actions: Vec<&str> = suggestions.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "Consider converting subqueries to JOINs for better performance",
                "Review if all 4 JOINs are necessary",
                "Consider breaking complex query (complexity: 11) into smaller parts",
            ]
        );
    }

    #[test]
    fn optional_fields_are_omitted() {
        let chars = characteristics(&["select_star"]);
        let n_plus_one = NPlusOneAnalysis::default();
        let plan = ExplainPlanResult::default();
        let suggestions = SuggestionGenerator::new(&chars, &[], &n_plus_one, &plan).generate();

        let json = serde_json::to_value(&suggestions[0]).unwrap();
        assert_eq!(json["type"], "optimization");
        assert_eq!(json["priority"], "medium");
        assert_eq!(json["category"], "sql_optimization");
        assert!(json.get("migration_code").is_none());
    }
}
