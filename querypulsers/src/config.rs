//! Configuration system for QueryPulse.
//!
//! Thresholds used by the analyzers are read from a TOML file and passed
//! explicitly into the service; nothing in the crate consults global state.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PulseConfig {
    pub analysis: SampleConfig,
    pub n_plus_one: NPlusOneConfig,
    pub backtrace: BacktraceConfig,
    pub index: IndexConfig,
    pub explain: ExplainConfig,
    pub query_thresholds: QueryThresholds,
}

/// Bounds of the recent-sample window fed to every analyzer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Only operations newer than this many hours are sampled (default: 48).
    pub recent_window_hours: i64,
    /// Maximum operations per analysis (default: 50).
    pub sample_limit: usize,
}

/// N+1 clustering and scoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NPlusOneConfig {
    /// Maximum gap between consecutive operations of one cluster (default: 100ms).
    pub grouping_window_ms: i64,
    /// Minimum occurrences of one shape inside a cluster (default: 3).
    pub repetition_threshold: usize,
    pub confidence_per_occurrence: u32,
    pub max_confidence: u32,
    /// Width of the buckets used for peak detection (default: 300s).
    pub peak_bucket_secs: i64,
    /// A bucket is a peak when its count exceeds the mean times this factor.
    pub peak_factor: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BacktraceConfig {
    /// More than this many executions in one calendar minute is suspicious.
    pub suspicious_per_minute: usize,
    pub top_locations: usize,
    pub top_hotspots: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub frequency_boost_factor: u32,
    pub max_frequency_boost: u32,
    /// Covering indexes are only suggested for SELECT lists up to this size.
    pub max_covering_columns: usize,
}

/// EXPLAIN execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Disable in non-interactive contexts where running EXPLAIN is unsafe.
    pub enabled: bool,
    /// Hard timeout for one EXPLAIN statement in milliseconds (default: 5000).
    pub timeout_ms: u64,
}

/// Average-duration thresholds in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryThresholds {
    pub slow: f64,
    pub very_slow: f64,
    pub critical: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            recent_window_hours: 48,
            sample_limit: 50,
        }
    }
}

impl Default for NPlusOneConfig {
    fn default() -> Self {
        Self {
            grouping_window_ms: 100,
            repetition_threshold: 3,
            confidence_per_occurrence: 10,
            max_confidence: 100,
            peak_bucket_secs: 300,
            peak_factor: 1.5,
        }
    }
}

impl Default for BacktraceConfig {
    fn default() -> Self {
        Self {
            suspicious_per_minute: 10,
            top_locations: 10,
            top_hotspots: 10,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            frequency_boost_factor: 2,
            max_frequency_boost: 50,
            max_covering_columns: 5,
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
        }
    }
}

impl Default for QueryThresholds {
    fn default() -> Self {
        Self {
            slow: 200.0,
            very_slow: 500.0,
            critical: 1000.0,
        }
    }
}

impl SampleConfig {
    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recent_window_hours)
    }
}

impl ExplainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PulseConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PulseError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| PulseError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `QUERYPULSE_CONFIG` environment variable
    /// 2. `./querypulse.toml` (current directory)
    /// 3. `~/.config/querypulse/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("QUERYPULSE_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from QUERYPULSE_CONFIG");
                return cfg;
            }
        }

        if let Ok(cfg) = Self::from_file("querypulse.toml") {
            tracing::info!("loaded config from ./querypulse.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("querypulse").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Defaults with EXPLAIN execution switched off, for batch jobs and tests.
    pub fn non_interactive() -> Self {
        let mut cfg = Self::default();
        cfg.explain.enabled = false;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PulseConfig::default();
        assert_eq!(cfg.analysis.recent_window_hours, 48);
        assert_eq!(cfg.analysis.sample_limit, 50);
        assert_eq!(cfg.n_plus_one.grouping_window_ms, 100);
        assert_eq!(cfg.n_plus_one.repetition_threshold, 3);
        assert_eq!(cfg.explain.timeout(), Duration::from_secs(5));
        assert!(cfg.explain.enabled);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[analysis]
sample_limit = 20

[explain]
enabled = false

[query_thresholds]
slow = 150.0
"#;
        let cfg = PulseConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.analysis.sample_limit, 20);
        assert_eq!(cfg.analysis.recent_window_hours, 48);
        assert!(!cfg.explain.enabled);
        assert_eq!(cfg.explain.timeout_ms, 5_000);
        assert_eq!(cfg.query_thresholds.slow, 150.0);
        assert_eq!(cfg.query_thresholds.critical, 1000.0);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PulseConfig::from_toml("[analysis\nsample_limit = ").unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }

    #[test]
    fn test_non_interactive_disables_explain() {
        assert!(!PulseConfig::non_interactive().explain.enabled);
    }
}
