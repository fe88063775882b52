//! MySQL-family EXPLAIN rules.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Issue, Severity};

static FULL_SCAN_ROWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"type: ALL.*rows: (\d+)").expect("valid full scan regex"));

const LARGE_TABLE_ROWS: u64 = 1000;

pub(super) fn explain_statement(sql: &str) -> String {
    format!("EXPLAIN {sql}")
}

pub(super) fn fulltext_migration(table: &str, column: &str) -> String {
    format!("add_index :{table}, :{column}, type: 'fulltext'")
}

pub(super) fn plan_issues(plan: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    if plan.contains("Using where") && !plan.contains("Using index") {
        issues.push(Issue::new(
            "where_without_index",
            Severity::Warning,
            "WHERE clause not using index efficiently",
            "Slower query execution due to row-by-row filtering",
        ));
    }

    if let Some(rows) = FULL_SCAN_ROWS
        .captures(plan)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        if rows > LARGE_TABLE_ROWS {
            issues.push(Issue::new(
                "full_scan_large_table",
                Severity::Warning,
                format!("Full table scan on table with {rows} rows"),
                "Very slow query execution on large dataset",
            ));
        }
    }

    issues
}
