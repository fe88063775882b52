//! Pattern-based SQL fragment extraction.
//!
//! Everything here is regex heuristics over normalized SQL text, not a SQL
//! parser: exotic statements (nested subqueries, quoted identifiers, CTEs)
//! can produce false positives or negatives. Every helper returns an empty
//! or absent value when nothing matches and never fails.

use once_cell::sync::Lazy;
use regex::Regex;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid built-in SQL pattern")
}

static MAIN_TABLE: Lazy<Regex> = Lazy::new(|| re(r"(?i)FROM\s+(\w+)"));
static JOIN_TABLE: Lazy<Regex> = Lazy::new(|| re(r"(?i)JOIN\s+(\w+)"));
static JOIN_KEYWORD: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bJOIN\b"));
static WHERE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)\bWHERE\s+(.+?)(?:\s+ORDER\s+BY|\s+GROUP\s+BY|\s+LIMIT|\s*$)")
});
static ORDER_CLAUSE: Lazy<Regex> =
    Lazy::new(|| re(r"(?im)ORDER\s+BY\s+(.+?)(?:\s+LIMIT|\s*$)"));
static SORT_DIRECTION: Lazy<Regex> = Lazy::new(|| re(r"(?i)\s+(ASC|DESC)\s*$"));
static SELECT_LIST: Lazy<Regex> = Lazy::new(|| re(r"(?i)SELECT\s+(.+?)\s+FROM"));
static JOIN_CONDITION: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)JOIN\s+(\w+)\s+.*?ON\s+(\w+)\.(\w+)\s*=\s*(\w+)\.(\w+)")
});
static EQUALITY_LITERAL: Lazy<Regex> = Lazy::new(|| re(r#"(\w+)\s*=\s*[?'"\d]"#));
static EQUALITY: Lazy<Regex> = Lazy::new(|| re(r"(\w+)\s*="));
static RANGE: Lazy<Regex> = Lazy::new(|| re(r"(?i)(\w+)\s*(?:>|<|>=|<=|BETWEEN)"));
static LIKE_LITERAL: Lazy<Regex> = Lazy::new(|| re(r"(?i)(\w+)\s*LIKE\s*'([^']+)'"));
static LIKE: Lazy<Regex> = Lazy::new(|| re(r"(?i)(\w+)\s*LIKE"));
static CONNECTIVE: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bAND\b|\bOR\b"));
static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| re(r"\w+\s*\("));
static UNION: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bUNION\b"));
static SUBQUERY: Lazy<Regex> = Lazy::new(|| re(r"(?i)\(SELECT"));
static LIMIT: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bLIMIT\s+(?:\d+|\?|\$\d+)"));
static AGGREGATE: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX|GROUP_CONCAT)\s*\("));
static NUMBER: Lazy<Regex> = Lazy::new(|| re(r"\d+"));
static QUOTED: Lazy<Regex> = Lazy::new(|| re(r"'[^']*'"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| re(r"\s+"));

const RESERVED: [&str; 6] = ["AND", "OR", "NOT", "NULL", "TRUE", "FALSE"];

/// A `JOIN <table> ... ON a.c1 = b.c2` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub join_table: String,
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

/// The first identifier following `FROM`.
pub fn main_table(sql: &str) -> Option<&str> {
    MAIN_TABLE
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Text between `WHERE` and the next ORDER BY / GROUP BY / LIMIT / line end.
pub fn where_clause(sql: &str) -> Option<&str> {
    WHERE_CLAUSE
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Collapse literals and whitespace so parameterized variants compare equal.
pub fn shape(sql: &str) -> String {
    if sql.trim().is_empty() {
        return String::new();
    }
    let numbers = NUMBER.replace_all(sql, "?");
    let strings = QUOTED.replace_all(&numbers, "?");
    WHITESPACE
        .replace_all(&strings, " ")
        .trim()
        .to_lowercase()
}

pub fn is_reserved_word(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Distinct identifiers following FROM or JOIN, in first-seen order.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let found = MAIN_TABLE
        .captures_iter(sql)
        .chain(JOIN_TABLE.captures_iter(sql))
        .map(|caps| caps[1].to_string());
    for table in found {
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables
}

pub fn join_count(sql: &str) -> usize {
    JOIN_KEYWORD.find_iter(sql).count()
}

pub fn connective_count(fragment: &str) -> usize {
    CONNECTIVE.find_iter(fragment).count()
}

pub fn function_call_count(fragment: &str) -> usize {
    FUNCTION_CALL.find_iter(fragment).count()
}

pub fn union_count(sql: &str) -> usize {
    UNION.find_iter(sql).count()
}

pub fn subquery_count(sql: &str) -> usize {
    SUBQUERY.find_iter(sql).count()
}

pub fn has_limit(sql: &str) -> bool {
    LIMIT.is_match(sql)
}

pub fn has_aggregate(sql: &str) -> bool {
    AGGREGATE.is_match(sql)
}

/// Columns compared for equality against a literal or placeholder.
pub fn equality_columns(fragment: &str) -> Vec<String> {
    capture_columns(&EQUALITY_LITERAL, fragment)
}

/// Columns used with `<`, `>`, `<=`, `>=` or BETWEEN.
pub fn range_columns(fragment: &str) -> Vec<String> {
    capture_columns(&RANGE, fragment)
}

/// `(column, pattern)` pairs for `column LIKE 'pattern'`.
pub fn like_conditions(fragment: &str) -> Vec<(String, String)> {
    LIKE_LITERAL
        .captures_iter(fragment)
        .filter(|caps| !is_reserved_word(&caps[1]))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Every filtered column of the WHERE clause, deduplicated in first-seen order.
pub fn where_columns(sql: &str) -> Vec<String> {
    let Some(fragment) = where_clause(sql) else {
        return Vec::new();
    };
    let mut columns = Vec::new();
    let found = capture_columns(&EQUALITY, fragment)
        .into_iter()
        .chain(capture_columns(&RANGE, fragment))
        .chain(capture_columns(&LIKE, fragment));
    for column in found {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    columns
}

/// ORDER BY expressions with their ASC/DESC suffix removed.
pub fn order_columns(sql: &str) -> Vec<String> {
    let Some(clause) = ORDER_CLAUSE.captures(sql).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };
    clause
        .as_str()
        .split(',')
        .map(|part| SORT_DIRECTION.replace(part.trim(), "").trim().to_string())
        .filter(|col| !col.is_empty())
        .collect()
}

/// The explicit SELECT list, or `None` for `*` selections and unmatched text.
pub fn select_columns(sql: &str) -> Option<Vec<String>> {
    let list = SELECT_LIST.captures(sql)?.get(1)?.as_str();
    if list.contains('*') {
        return None;
    }
    Some(
        list.split(',')
            .map(|col| col.trim().to_string())
            .filter(|col| !col.is_empty())
            .collect(),
    )
}

pub fn join_conditions(sql: &str) -> Vec<JoinCondition> {
    JOIN_CONDITION
        .captures_iter(sql)
        .map(|caps| JoinCondition {
            join_table: caps[1].to_string(),
            left_table: caps[2].to_string(),
            left_column: caps[3].to_string(),
            right_table: caps[4].to_string(),
            right_column: caps[5].to_string(),
        })
        .collect()
}

/// Singular CamelCase model name for a table: `blog_posts` -> `BlogPost`.
pub fn classify(table: &str) -> String {
    let singular = singularize(table);
    singular
        .split('/')
        .map(camelize)
        .collect::<Vec<_>>()
        .join("::")
}

fn camelize(segment: &str) -> String {
    segment
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with("sses") || word.ends_with("xes") {
        word[..word.len() - 2].to_string()
    } else if word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn capture_columns(pattern: &Regex, fragment: &str) -> Vec<String> {
    pattern
        .captures_iter(fragment)
        .map(|caps| caps[1].to_string())
        .filter(|col| !is_reserved_word(col))
        .collect()
}
