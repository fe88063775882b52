//! Statement classification, clause detection and anti-pattern flags.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Issue, Severity};
use crate::sql_text;

use super::{AnalysisContext, Analyzer};

const COMPLEX_WHERE_CONNECTIVES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Unknown,
}

impl QueryType {
    pub fn detect(sql: &str) -> Self {
        let head = sql.trim_start().to_ascii_uppercase();
        [
            ("SELECT", QueryType::Select),
            ("INSERT", QueryType::Insert),
            ("UPDATE", QueryType::Update),
            ("DELETE", QueryType::Delete),
            ("CREATE", QueryType::Create),
            ("DROP", QueryType::Drop),
            ("ALTER", QueryType::Alter),
        ]
        .into_iter()
        .find(|(keyword, _)| head.starts_with(keyword))
        .map_or(QueryType::Unknown, |(_, query_type)| query_type)
    }
}

/// Characteristics persisted on the query as `query_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub query_type: QueryType,
    pub table_count: usize,
    pub join_count: usize,
    pub where_clause_complexity: usize,
    pub has_subqueries: bool,
    pub has_limit: bool,
    pub has_order_by: bool,
    pub has_group_by: bool,
    pub has_having: bool,
    pub has_distinct: bool,
    pub has_aggregations: bool,
    pub estimated_complexity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCharacteristics {
    #[serde(flatten)]
    pub stats: QueryStats,
    pub pattern_issues: Vec<Issue>,
}

pub struct QueryCharacteristicsAnalyzer<'a> {
    ctx: &'a AnalysisContext<'a>,
}

impl<'a> QueryCharacteristicsAnalyzer<'a> {
    pub fn new(ctx: &'a AnalysisContext<'a>) -> Self {
        Self { ctx }
    }

    fn stats(&self) -> QueryStats {
        let sql = self.ctx.sql();
        let upper = sql.to_ascii_uppercase();
        let table_count = sql_text::referenced_tables(sql).len();
        let join_count = sql_text::join_count(sql);
        let where_clause_complexity = where_complexity(sql);
        let subqueries = sql_text::subquery_count(sql);

        QueryStats {
            query_type: QueryType::detect(sql),
            table_count,
            join_count,
            where_clause_complexity,
            has_subqueries: subqueries > 0,
            has_limit: sql_text::has_limit(sql),
            has_order_by: upper.contains("ORDER BY"),
            has_group_by: upper.contains("GROUP BY"),
            has_having: upper.contains("HAVING"),
            has_distinct: upper.contains("DISTINCT"),
            has_aggregations: sql_text::has_aggregate(sql),
            estimated_complexity: table_count * 2
                + join_count * 3
                + where_clause_complexity
                + sql_text::union_count(sql) * 4
                + subqueries * 5,
        }
    }

    fn pattern_issues(&self, stats: &QueryStats) -> Vec<Issue> {
        let sql = self.ctx.sql();
        let upper = sql.to_ascii_uppercase();
        let where_fragment = sql_text::where_clause(sql);
        let is_select = stats.query_type == QueryType::Select;
        let mut issues = Vec::new();

        if is_select && where_fragment.is_none() && !stats.has_limit {
            issues.push(Issue::new(
                "missing_where_clause",
                Severity::Warning,
                "SELECT query without WHERE clause may return excessive data",
                "Performance degradation from full table scans",
            ));
        }

        if upper.contains("SELECT *") {
            issues.push(Issue::new(
                "select_star",
                Severity::Info,
                "Using SELECT * may retrieve unnecessary columns",
                "Increased memory usage and network transfer",
            ));
        }

        if is_select && where_fragment.is_some() && !stats.has_limit && !upper.contains("COUNT") {
            issues.push(Issue::new(
                "missing_limit",
                Severity::Warning,
                "Query may return large result sets without LIMIT",
                "Memory exhaustion and slow response times",
            ));
        }

        if where_fragment.is_some_and(|w| sql_text::connective_count(w) > COMPLEX_WHERE_CONNECTIVES) {
            issues.push(Issue::new(
                "complex_where_clause",
                Severity::Warning,
                "Complex WHERE clause with many conditions",
                "Difficult to optimize and maintain",
            ));
        }

        issues
    }
}

impl Analyzer for QueryCharacteristicsAnalyzer<'_> {
    type Output = QueryCharacteristics;
    const NAME: &'static str = "query_characteristics";

    fn analyze(&self) -> Result<QueryCharacteristics> {
        let stats = self.stats();
        let pattern_issues = self.pattern_issues(&stats);
        Ok(QueryCharacteristics {
            stats,
            pattern_issues,
        })
    }
}

/// Condition count (connectives + 1) plus two points per function call.
fn where_complexity(sql: &str) -> usize {
    match sql_text::where_clause(sql) {
        Some(fragment) => {
            sql_text::connective_count(fragment) + 1 + sql_text::function_call_count(fragment) * 2
        }
        None => 0,
    }
}
