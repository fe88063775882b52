//! QueryPulse: heuristic analysis of normalized SQL and its recent executions.
//!
//! SQL is inspected with centralized pattern rules (see [`sql_text`]), not a
//! real parser, so false positives and negatives on exotic SQL are expected.

pub mod analysis;
pub mod clock;
pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod models;
pub mod service;
pub mod sql_text;
pub mod store;
pub mod telemetry;

pub use analysis::{AnalysisContext, AnalysisResult, Analyzer};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::PulseConfig;
pub use dialect::Dialect;
pub use error::{PulseError, Result};
pub use executor::QueryResult;
pub use models::{AnalysisSnapshot, AnalysisStatus, Issue, Operation, Query, Severity};
pub use service::QueryAnalysisService;
pub use store::{AnalysisStore, MemoryStore, NewOperation};
#[cfg(feature = "duckdb")]
pub use store::DuckDbStore;
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
