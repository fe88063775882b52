//! Records a burst of lookups in a scratch DuckDB file and prints the analysis.
//!
//! Run with `RUST_LOG=querypulse=debug` to see per-stage timings.

use std::sync::Arc;

use chrono::{Duration, Utc};

use querypulse::{telemetry, DuckDbStore, NewOperation, PulseConfig, QueryAnalysisService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(DuckDbStore::open(dir.path().join("demo.duckdb")));
    store.migrate().await?;

    let id = store
        .insert_query("SELECT * FROM comments WHERE post_id = ?")
        .await?;
    let start = Utc::now() - Duration::minutes(5);
    for post_id in 0..8 {
        store
            .insert_operation(
                NewOperation::new(
                    id,
                    format!("SELECT * FROM comments WHERE post_id = {post_id}"),
                    start + Duration::milliseconds(post_id * 12),
                )
                .with_duration(4.2)
                .in_request(1)
                .with_location("app/controllers/posts_controller.rb:14:in `index'"),
            )
            .await?;
    }

    let service = QueryAnalysisService::with_system_clock(store, PulseConfig::load_default());
    let result = service.analyze(id).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
