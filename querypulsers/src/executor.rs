//! Raw diagnostic result sets and their text rendering.
//!
//! EXPLAIN output differs in shape across engines (one text column per plan
//! line on Postgres, several columns per row on SQLite and MySQL); backends
//! collect it into a [`QueryResult`] and render it with [`QueryResult::plan_text`].

#[cfg(feature = "sqlite")]
use rusqlite::types::ValueRef as SqliteValueRef;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
}

/// Rows in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// One line per row, the row's values joined with `separator`.
    pub fn plan_text(&self, separator: &str) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(value_text)
                    .collect::<Vec<_>>()
                    .join(separator)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(feature = "sqlite")]
pub(crate) fn sqlite_value_to_json(value: SqliteValueRef<'_>) -> Value {
    match value {
        SqliteValueRef::Null => Value::Null,
        SqliteValueRef::Integer(i) => Value::from(i),
        SqliteValueRef::Real(f) => Value::from(f),
        SqliteValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        SqliteValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: vec![],
            rows,
        }
    }

    #[test]
    fn renders_multi_column_rows() {
        let plan = result(vec![
            vec![json!(2), json!(0), json!(0), json!("SCAN users")],
            vec![json!(5), json!(2), json!(0), Value::Null],
        ]);
        assert_eq!(plan.plan_text(" | "), "2 | 0 | 0 | SCAN users\n5 | 2 | 0 | ");
    }

    #[test]
    fn renders_single_column_lines() {
        let plan = result(vec![
            vec![json!("Seq Scan on users  (cost=0.00..1.05 rows=5 width=8)")],
            vec![json!("Planning Time: 0.05 ms")],
        ]);
        assert_eq!(
            plan.plan_text("\n"),
            "Seq Scan on users  (cost=0.00..1.05 rows=5 width=8)\nPlanning Time: 0.05 ms"
        );
        assert_eq!(result(vec![]).plan_text(" | "), "");
    }
}
