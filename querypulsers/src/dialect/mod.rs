//! Storage dialects understood by the analyzers.
//!
//! The dialect is resolved once from the storage engine's self-reported
//! adapter name. Each dialect-specific rule set lives in its own file and is
//! a pure function of the dialect tag; unknown engines skip EXPLAIN and
//! dialect-only rules instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Issue;

mod mysql;
mod postgres;
mod sqlite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[serde(rename = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
    #[default]
    Unknown,
}

impl Dialect {
    /// Map an adapter/engine name ("postgresql", "mysql2", "sqlite3", ...) to a dialect.
    pub fn from_adapter_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "postgis" => Dialect::Postgres,
            "mysql" | "mysql2" | "trilogy" | "mariadb" => Dialect::MySql,
            "sqlite" | "sqlite3" => Dialect::Sqlite,
            _ => Dialect::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Unknown => "unknown",
        }
    }

    /// The EXPLAIN-family statement for `sql`, or `None` when the dialect has none.
    pub fn explain_statement(self, sql: &str) -> Option<String> {
        match self {
            Dialect::Postgres => Some(postgres::explain_statement(sql)),
            Dialect::MySql => Some(mysql::explain_statement(sql)),
            Dialect::Sqlite => Some(sqlite::explain_statement(sql)),
            Dialect::Unknown => None,
        }
    }

    /// Dialect-specific red flags in EXPLAIN output.
    pub fn plan_issues(self, plan: &str) -> Vec<Issue> {
        match self {
            Dialect::Postgres => postgres::plan_issues(plan),
            Dialect::MySql => mysql::plan_issues(plan),
            Dialect::Sqlite => sqlite::plan_issues(plan),
            Dialect::Unknown => Vec::new(),
        }
    }

    /// Migration snippet replacing a leading-wildcard LIKE with a text index.
    pub fn fulltext_migration(self, table: &str, column: &str) -> String {
        match self {
            Dialect::Postgres => postgres::fulltext_migration(table, column),
            Dialect::MySql => mysql::fulltext_migration(table, column),
            Dialect::Sqlite | Dialect::Unknown => {
                format!("# Full-text search not supported for {}", self.as_str())
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
