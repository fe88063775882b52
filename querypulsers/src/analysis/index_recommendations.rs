//! Candidate index derivation from WHERE, JOIN and ORDER BY usage.
//!
//! Recommendations are scored by priority, boosted by how often the query
//! ran in the sample window, deduplicated by `(table, sorted columns)` and
//! returned best-first.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Priority;
use crate::sql_text;

use super::{AnalysisContext, Analyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    SingleColumn,
    Composite,
    Covering,
    FullText,
}

impl IndexType {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexType::SingleColumn => "single_column",
            IndexType::Composite => "composite",
            IndexType::Covering => "covering",
            IndexType::FullText => "full_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub frequency: usize,
    pub frequency_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecommendation {
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub table: String,
    pub columns: Vec<String>,
    pub reason: String,
    pub priority: Priority,
    pub migration_code: String,
    pub estimated_benefit: String,
    pub priority_score: u32,
    pub execution_context: ExecutionContext,
}

pub struct IndexRecommendationEngine<'a> {
    ctx: &'a AnalysisContext<'a>,
    execution_context: ExecutionContext,
}

impl<'a> IndexRecommendationEngine<'a> {
    pub fn new(ctx: &'a AnalysisContext<'a>) -> Self {
        let frequency = ctx.operations.len();
        Self {
            ctx,
            execution_context: ExecutionContext {
                frequency,
                frequency_description: describe_frequency(frequency).to_string(),
            },
        }
    }

    fn build(
        &self,
        table: &str,
        columns: Vec<String>,
        index_type: IndexType,
        priority: Priority,
        reason: &str,
        benefit: String,
    ) -> IndexRecommendation {
        IndexRecommendation {
            index_type,
            table: table.to_string(),
            migration_code: migration_code(table, &columns),
            columns,
            reason: reason.to_string(),
            priority,
            estimated_benefit: benefit,
            priority_score: priority.base_score(),
            execution_context: self.execution_context.clone(),
        }
    }

    fn where_clause_indexes(&self, recs: &mut Vec<IndexRecommendation>) {
        let sql = self.ctx.sql();
        let (Some(table), Some(fragment)) = (sql_text::main_table(sql), sql_text::where_clause(sql))
        else {
            return;
        };

        for column in sql_text::equality_columns(fragment) {
            let benefit = format!("Fast lookups for {column} = value queries");
            recs.push(self.build(
                table,
                vec![column],
                IndexType::SingleColumn,
                Priority::High,
                "Equality condition in WHERE clause",
                benefit,
            ));
        }

        for column in sql_text::range_columns(fragment) {
            let benefit = format!("Efficient range scans for {column}");
            recs.push(self.build(
                table,
                vec![column],
                IndexType::SingleColumn,
                Priority::Medium,
                "Range condition in WHERE clause",
                benefit,
            ));
        }

        for (column, pattern) in sql_text::like_conditions(fragment) {
            if pattern.starts_with('%') {
                recs.push(IndexRecommendation {
                    index_type: IndexType::FullText,
                    table: table.to_string(),
                    migration_code: self.ctx.dialect.fulltext_migration(table, &column),
                    columns: vec![column],
                    reason: "LIKE with leading wildcard".to_string(),
                    priority: Priority::Low,
                    estimated_benefit: "Full-text search instead of slow LIKE queries".to_string(),
                    priority_score: Priority::Low.base_score(),
                    execution_context: self.execution_context.clone(),
                });
            } else {
                let benefit = format!("Prefix matching for {column}");
                recs.push(self.build(
                    table,
                    vec![column],
                    IndexType::SingleColumn,
                    Priority::Medium,
                    "LIKE with prefix pattern",
                    benefit,
                ));
            }
        }
    }

    /// The joined table's key is always indexed; the other side only when it
    /// is not the statement's main table.
    fn join_indexes(&self, recs: &mut Vec<IndexRecommendation>) {
        let sql = self.ctx.sql();
        let main_table = sql_text::main_table(sql);
        for join in sql_text::join_conditions(sql) {
            recs.push(self.build(
                &join.join_table,
                vec![join.right_column.clone()],
                IndexType::SingleColumn,
                Priority::High,
                "JOIN condition",
                "Fast JOIN execution".to_string(),
            ));
            if main_table != Some(join.left_table.as_str()) {
                recs.push(self.build(
                    &join.left_table,
                    vec![join.left_column.clone()],
                    IndexType::SingleColumn,
                    Priority::High,
                    "JOIN condition",
                    "Fast JOIN execution".to_string(),
                ));
            }
        }
    }

    fn order_by_indexes(&self, recs: &mut Vec<IndexRecommendation>) {
        let sql = self.ctx.sql();
        let Some(table) = sql_text::main_table(sql) else {
            return;
        };
        let order_columns = sql_text::order_columns(sql);
        match order_columns.len() {
            0 => {}
            1 => {
                let benefit = format!("Avoid sorting for ORDER BY {}", order_columns[0]);
                recs.push(self.build(
                    table,
                    order_columns,
                    IndexType::SingleColumn,
                    Priority::Medium,
                    "ORDER BY clause",
                    benefit,
                ));
            }
            _ => recs.push(self.build(
                table,
                order_columns,
                IndexType::Composite,
                Priority::Medium,
                "Multi-column ORDER BY",
                "Avoid sorting for complex ORDER BY".to_string(),
            )),
        }
    }

    fn composite_indexes(&self, recs: &mut Vec<IndexRecommendation>) {
        let sql = self.ctx.sql();
        let Some(table) = sql_text::main_table(sql) else {
            return;
        };
        let where_columns = sql_text::where_columns(sql);
        let order_columns = sql_text::order_columns(sql);

        if !where_columns.is_empty() && !order_columns.is_empty() {
            let columns = where_columns.iter().chain(&order_columns).cloned().collect();
            recs.push(self.build(
                table,
                columns,
                IndexType::Composite,
                Priority::High,
                "WHERE + ORDER BY optimization",
                "Single index for filtering and sorting".to_string(),
            ));
        }

        if where_columns.len() > 1 {
            recs.push(self.build(
                table,
                where_columns,
                IndexType::Composite,
                Priority::High,
                "Multiple WHERE conditions",
                "Efficient multi-column filtering".to_string(),
            ));
        }
    }

    fn covering_indexes(&self, recs: &mut Vec<IndexRecommendation>) {
        let sql = self.ctx.sql();
        let Some(table) = sql_text::main_table(sql) else {
            return;
        };
        let Some(selected) = sql_text::select_columns(sql) else {
            return;
        };
        let where_columns = sql_text::where_columns(sql);
        if where_columns.is_empty() || selected.len() > self.ctx.config.index.max_covering_columns {
            return;
        }

        let mut columns = where_columns.clone();
        for column in selected {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        let migration_code = format!(
            "add_index :{table}, {}, name: 'covering_idx_{table}_{}'",
            column_list(&columns),
            where_columns.join("_")
        );
        recs.push(IndexRecommendation {
            index_type: IndexType::Covering,
            table: table.to_string(),
            columns,
            reason: "Covering index opportunity".to_string(),
            priority: Priority::Medium,
            migration_code,
            estimated_benefit: "Index-only scan without table access".to_string(),
            priority_score: Priority::Medium.base_score(),
            execution_context: self.execution_context.clone(),
        });
    }

    fn prioritize(&self, recs: Vec<IndexRecommendation>) -> Vec<IndexRecommendation> {
        let index = &self.ctx.config.index;
        let frequency = u32::try_from(self.execution_context.frequency).unwrap_or(u32::MAX);
        let boost = frequency
            .saturating_mul(index.frequency_boost_factor)
            .min(index.max_frequency_boost);

        let mut seen = HashSet::new();
        let mut unique: Vec<IndexRecommendation> = recs
            .into_iter()
            .filter(|rec| {
                let mut key = rec.columns.clone();
                key.sort();
                seen.insert((rec.table.clone(), key))
            })
            .map(|mut rec| {
                rec.priority_score += boost;
                rec
            })
            .collect();
        unique.sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
        unique
    }
}

impl Analyzer for IndexRecommendationEngine<'_> {
    type Output = Vec<IndexRecommendation>;
    const NAME: &'static str = "index_recommendations";

    fn analyze(&self) -> Result<Vec<IndexRecommendation>> {
        if self.ctx.sql().trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut recs = Vec::new();
        self.where_clause_indexes(&mut recs);
        self.join_indexes(&mut recs);
        self.order_by_indexes(&mut recs);
        self.composite_indexes(&mut recs);
        self.covering_indexes(&mut recs);
        Ok(self.prioritize(recs))
    }
}

fn migration_code(table: &str, columns: &[String]) -> String {
    match columns {
        [column] => format!("add_index :{table}, :{column}"),
        _ => format!("add_index :{table}, {}", column_list(columns)),
    }
}

fn column_list(columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    format!("[{}]", quoted.join(", "))
}

fn describe_frequency(count: usize) -> &'static str {
    match count {
        0..=10 => "Low frequency",
        11..=50 => "Medium frequency",
        51..=100 => "High frequency",
        _ => "Very high frequency",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{op, TestContext};
    use crate::dialect::Dialect;

    fn recommend(fixture: &TestContext) -> Vec<IndexRecommendation> {
        let ctx = fixture.context();
        IndexRecommendationEngine::new(&ctx).analyze().unwrap()
    }

    fn find<'r>(recs: &'r [IndexRecommendation], table: &str, columns: &[&str]) -> Option<&'r IndexRecommendation> {
        recs.iter()
            .find(|r| r.table == table && r.columns.iter().map(String::as_str).eq(columns.iter().copied()))
    }

    #[test]
    fn empty_sql_has_no_recommendations() {
        assert!(recommend(&TestContext::new("", vec![])).is_empty());
        assert!(recommend(&TestContext::new("   ", vec![])).is_empty());
    }

    #[test]
    fn equality_lookup() {
        let recs = recommend(&TestContext::new("SELECT * FROM users WHERE id = ?", vec![]));
        let rec = find(&recs, "users", &["id"]).expect("users.id recommendation");
        assert_eq!(rec.index_type, IndexType::SingleColumn);
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.priority_score, 100);
        assert_eq!(rec.migration_code, "add_index :users, :id");
        assert_eq!(rec.execution_context.frequency_description, "Low frequency");
    }

    #[test]
    fn range_and_order_build_composites() {
        let sql = "SELECT * FROM posts WHERE user_id = ? AND published_at > ? ORDER BY created_at DESC";
        let recs = recommend(&TestContext::new(sql, vec![]));

        assert_eq!(find(&recs, "posts", &["published_at"]).unwrap().priority, Priority::Medium);
        assert_eq!(find(&recs, "posts", &["created_at"]).unwrap().reason, "ORDER BY clause");
        let combined = find(&recs, "posts", &["user_id", "published_at", "created_at"]).unwrap();
        assert_eq!(combined.index_type, IndexType::Composite);
        assert_eq!(
            combined.migration_code,
            r#"add_index :posts, ["user_id", "published_at", "created_at"]"#
        );
        let filtering = find(&recs, "posts", &["user_id", "published_at"]).unwrap();
        assert_eq!(filtering.reason, "Multiple WHERE conditions");
    }

    #[test]
    fn results_are_sorted_by_score() {
        let sql = "SELECT * FROM posts WHERE user_id = ? AND published_at > ?";
        let recs = recommend(&TestContext::new(sql, vec![]));
        assert!(recs.windows(2).all(|w| w[0].priority_score >= w[1].priority_score));
    }

    #[test]
    fn deduplicates_by_table_and_sorted_columns() {
        let sql = "SELECT * FROM users WHERE id = ? AND id > ?";
        let recs = recommend(&TestContext::new(sql, vec![]));
        let id_recs: Vec<_> = recs.iter().filter(|r| r.columns == ["id"]).collect();
        assert_eq!(id_recs.len(), 1);
        assert_eq!(id_recs[0].priority, Priority::High);
    }

    #[test]
    fn leading_wildcard_uses_fulltext_per_dialect() {
        let sql = "SELECT * FROM users WHERE email LIKE '%@example.com'";
        let fixture = TestContext::new(sql, vec![]).with_dialect(Dialect::Postgres);
        let recs = recommend(&fixture);
        let rec = find(&recs, "users", &["email"]).unwrap();
        assert_eq!(rec.index_type, IndexType::FullText);
        assert_eq!(rec.priority, Priority::Low);
        assert!(rec.migration_code.contains("gin_trgm_ops"));

        let recs = recommend(&TestContext::new(sql, vec![]).with_dialect(Dialect::Sqlite));
        assert!(find(&recs, "users", &["email"]).unwrap().migration_code.starts_with('#'));
    }

    #[test]
    fn prefix_like_uses_plain_index() {
        let sql = "SELECT * FROM users WHERE name LIKE 'bo%'";
        let recs = recommend(&TestContext::new(sql, vec![]));
        let rec = find(&recs, "users", &["name"]).unwrap();
        assert_eq!(rec.index_type, IndexType::SingleColumn);
        assert_eq!(rec.reason, "LIKE with prefix pattern");
    }

    #[test]
    fn join_recommendations_are_asymmetric() {
        // The ON clause's right-hand column is indexed on the joined table;
        // the left-hand side is indexed only when it is not the main table.
        let sql = "SELECT * FROM users u INNER JOIN posts p ON p.user_id = u.id";
        let recs = recommend(&TestContext::new(sql, vec![]));
        assert!(find(&recs, "posts", &["id"]).is_some());
        assert!(find(&recs, "p", &["user_id"]).is_some());

        let sql = "SELECT * FROM users JOIN posts ON users.id = posts.user_id";
        let recs = recommend(&TestContext::new(sql, vec![]));
        assert!(find(&recs, "posts", &["user_id"]).is_some());
        assert!(find(&recs, "users", &["id"]).is_none());
    }

    #[test]
    fn covering_index_for_narrow_select() {
        let sql = "SELECT id, email FROM users WHERE status = ?";
        let recs = recommend(&TestContext::new(sql, vec![]));
        let rec = find(&recs, "users", &["status", "id", "email"]).unwrap();
        assert_eq!(rec.index_type, IndexType::Covering);
        assert_eq!(
            rec.migration_code,
            r#"add_index :users, ["status", "id", "email"], name: 'covering_idx_users_status'"#
        );

        let wide = "SELECT a, b, c, d, e, f FROM users WHERE status = ?";
        let recs = recommend(&TestContext::new(wide, vec![]));
        assert!(recs.iter().all(|r| r.index_type != IndexType::Covering));
    }

    #[test]
    fn frequency_boost_is_capped() {
        let sql = "SELECT * FROM users WHERE id = ?";
        let five: Vec<_> = (0..5).map(|i| op(sql, i)).collect();
        let recs = recommend(&TestContext::new(sql, five));
        assert_eq!(find(&recs, "users", &["id"]).unwrap().priority_score, 110);

        let many: Vec<_> = (0..40).map(|i| op(sql, i)).collect();
        let recs = recommend(&TestContext::new(sql, many));
        let rec = find(&recs, "users", &["id"]).unwrap();
        assert_eq!(rec.priority_score, 150);
        assert_eq!(rec.execution_context.frequency, 40);
        assert_eq!(rec.execution_context.frequency_description, "Medium frequency");
    }

    #[test]
    fn columns_are_never_empty() {
        let sql = "SELECT * FROM t WHERE a = ? AND b BETWEEN ? AND ? ORDER BY c, d";
        let recs = recommend(&TestContext::new(sql, vec![]));
        assert!(!recs.is_empty());
        assert!(recs.iter().all(|r| !r.columns.is_empty()));
    }
}
