//! SQLite EXPLAIN QUERY PLAN rules.

use crate::models::{Issue, Severity};

pub(super) fn explain_statement(sql: &str) -> String {
    format!("EXPLAIN QUERY PLAN {sql}")
}

pub(super) fn plan_issues(plan: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    if plan.contains("SCAN TABLE") {
        issues.push(Issue::new(
            "table_scan",
            Severity::Warning,
            "SQLite performing table scan",
            "Linear search through all table rows",
        ));
    }

    if plan.contains("WHERE") && !plan.contains("USING INDEX") {
        issues.push(Issue::new(
            "no_index_usage",
            Severity::Info,
            "Query not utilizing available indexes",
            "Potential for optimization with proper indexing",
        ));
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_scan() {
        let issues = plan_issues("2 | 0 | 0 | SCAN TABLE users");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "table_scan");
    }

    #[test]
    fn index_search_is_clean() {
        assert!(plan_issues("3 | 0 | 0 | SEARCH users USING INDEX idx_users_email (email=?)").is_empty());
    }
}
