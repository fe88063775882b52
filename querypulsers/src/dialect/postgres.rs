//! PostgreSQL EXPLAIN rules.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Issue, Severity};

static COST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cost=(\d+\.\d+)\.\.(\d+\.\d+)").expect("valid cost regex"));
static ROWS: Lazy<Regex> = Lazy::new(|| Regex::new(r"rows=(\d+)").expect("valid rows regex"));

const HIGH_COST: f64 = 1000.0;
const LARGE_HASH_JOIN_ROWS: u64 = 10_000;

pub(super) fn explain_statement(sql: &str) -> String {
    format!("EXPLAIN (ANALYZE, BUFFERS) {sql}")
}

pub(super) fn fulltext_migration(table: &str, column: &str) -> String {
    format!("add_index :{table}, :{column}, using: 'gin', opclass: 'gin_trgm_ops'")
}

pub(super) fn plan_issues(plan: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    // Only the first (outermost) node's total cost is considered.
    if let Some(total_cost) = COST
        .captures(plan)
        .and_then(|caps| caps[2].parse::<f64>().ok())
    {
        if total_cost > HIGH_COST {
            issues.push(Issue::new(
                "high_cost_operation",
                Severity::Warning,
                format!(
                    "Query has high execution cost ({})",
                    (total_cost * 100.0).round() / 100.0
                ),
                "May indicate need for optimization or indexing",
            ));
        }
    }

    if plan.contains("Hash Join") {
        if let Some(rows) = ROWS
            .captures(plan)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            if rows > LARGE_HASH_JOIN_ROWS {
                issues.push(Issue::new(
                    "large_hash_join",
                    Severity::Info,
                    format!("Hash join on large dataset ({rows} rows)"),
                    "High memory usage during query execution",
                ));
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_high_cost() {
        let plan = "Seq Scan on users  (cost=0.00..1834.50 rows=50 width=244)";
        let issues = plan_issues(plan);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "high_cost_operation");
        assert_eq!(issues[0].description, "Query has high execution cost (1834.5)");
    }

    #[test]
    fn flags_large_hash_join() {
        let plan = "Hash Join  (cost=1.00..2.00 rows=25000 width=8)";
        let issues = plan_issues(plan);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "large_hash_join");
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn cheap_plan_has_no_issues() {
        let plan = "Index Scan using users_pkey on users  (cost=0.29..8.30 rows=1 width=244)";
        assert!(plan_issues(plan).is_empty());
    }
}
