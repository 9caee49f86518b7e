//! Tracker tunables consumed at startup.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What happens to a mutation attempted from a foreign thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncPolicy {
    /// Queue it and replay it on the owning thread at the next drain
    Queue,
    /// Reject it
    Drop,
}

/// Configuration for the PhaseTracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Emit diagnostics at all (default: true)
    pub verbose: bool,

    /// Report every occurrence instead of once per category (default: false)
    pub verbose_errors: bool,

    /// Stack depth above which entering a scope is reported as runaway (default: 6)
    pub runaway_depth: usize,

    /// Runaway reports emitted before they are suppressed (default: 3)
    pub max_runaway_count: usize,

    /// Nested processing depth at which effect chains are aborted (default: 100)
    pub max_block_processing_depth: usize,

    /// Cross-thread mutation handling (default: Queue)
    pub async_policy: AsyncPolicy,

    /// Ticks between deferred-mutation drains (default: 1)
    pub deferred_drain_interval: u64,

    /// Contexts cached per descriptor (default: 2)
    pub context_cache_size: usize,

    /// Capture a backtrace each time a scope is entered (default: false)
    pub capture_entry_traces: bool,

    /// Report world changes made while no scope is active (default: false)
    pub report_untracked_changes: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            verbose_errors: false,
            runaway_depth: 6,
            max_runaway_count: 3,
            max_block_processing_depth: 100,
            async_policy: AsyncPolicy::Queue,
            deferred_drain_interval: 1,
            context_cache_size: 2,
            capture_entry_traces: false,
            report_untracked_changes: false,
        }
    }
}

impl TrackerConfig {
    /// Parses a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// A silent configuration for hot loops and benchmarks.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_default() {
        let config = TrackerConfig::default();
        assert!(config.verbose);
        assert_eq!(config.runaway_depth, 6);
        assert_eq!(config.context_cache_size, 2);
        assert_eq!(config.async_policy, AsyncPolicy::Queue);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TrackerConfig::from_json_str(
            r#"{ "verbose": false, "async_policy": "drop", "max_block_processing_depth": 8 }"#,
        )
        .unwrap();
        assert!(!config.verbose);
        assert_eq!(config.async_policy, AsyncPolicy::Drop);
        assert_eq!(config.max_block_processing_depth, 8);
        assert_eq!(config.runaway_depth, 6);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = TrackerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
