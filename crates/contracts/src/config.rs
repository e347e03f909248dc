//! RouterConfig - Config Loader output
//!
//! Describes one router instance: data source, coordination store, destination
//! naming, rollup, tuning, timestamp extraction and backend transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::{period, RetryPolicy, RollupSpec, RouterTuning, TimestampFormat};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete router configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RouterConfig {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Target data source
    #[validate(length(min = 1))]
    pub data_source: String,

    /// Coordination store settings
    #[validate(nested)]
    pub discovery: DiscoveryConfig,

    /// Destination naming
    #[validate(nested)]
    pub location: LocationConfig,

    /// Rollup handed to each new destination
    pub rollup: RollupSpec,

    /// Windowing and fan-out
    #[serde(default)]
    #[validate(nested)]
    pub tuning: RouterTuning,

    /// Timestamp extraction
    #[serde(default)]
    #[validate(nested)]
    pub timestamp: TimestampConfig,

    /// Destination transport
    #[serde(default)]
    #[validate(nested)]
    pub backend: BackendConfig,
}

/// Coordination store settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiscoveryConfig {
    /// Root path under which registrations are namespaced
    #[validate(length(min = 2))]
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Store implementation
    #[serde(default)]
    pub store: StoreKind,

    /// Base directory for `store = "directory"`
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Upper bound on lookup staleness
    #[serde(default = "default_refresh_interval", with = "period")]
    pub refresh_interval: Duration,

    /// Identity recorded on registrations (defaults to host + pid)
    #[serde(default)]
    pub producer_id: Option<String>,

    /// Retry policy for store calls
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// How long after its bucket ends a closed tombstone is kept; must cover
    /// the window period
    #[serde(default = "default_tombstone_retention", with = "period")]
    pub tombstone_retention: Duration,
}

fn default_root_path() -> String {
    "/beam-router/discovery".to_string()
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_tombstone_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            store: StoreKind::default(),
            directory: None,
            refresh_interval: default_refresh_interval(),
            retry: RetryPolicy::default(),
            producer_id: None,
            tombstone_retention: default_tombstone_retention(),
        }
    }
}

/// Coordination store implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Process-local store (single producer or tests)
    #[default]
    Memory,
    /// Shared directory; atomic create via hard links
    Directory,
}

/// Destination naming
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationConfig {
    /// Service that runs indexing tasks
    #[validate(length(min = 1))]
    pub indexer_service: String,

    /// Destination id pattern; `%s` is replaced with the destination suffix
    #[validate(length(min = 2))]
    pub destination_pattern: String,
}

/// Timestamp extraction
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimestampConfig {
    /// Payload field holding the event time
    #[validate(length(min = 1))]
    #[serde(default = "default_timestamp_field")]
    pub field: String,

    /// Field encoding
    #[serde(default)]
    pub format: TimestampFormat,
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            field: default_timestamp_field(),
            format: TimestampFormat::default(),
        }
    }
}

/// Destination transport
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Transport kind
    #[serde(default)]
    pub kind: BackendKind,

    /// Per-destination queue capacity (batches)
    #[validate(range(min = 1))]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Handle-level retry policy for transient failures
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Kind-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            queue_capacity: default_queue_capacity(),
            retry: RetryPolicy::default(),
            params: HashMap::new(),
        }
    }
}

/// Backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Log batch summaries
    #[default]
    Log,
    /// Newline-delimited JSON per destination
    File,
    /// Length-prefixed batches over TCP
    Tcp,
    /// In-process buffer
    Memory,
}

impl LocationConfig {
    /// Expand the destination pattern
    pub fn destination_id(&self, suffix: &str) -> String {
        self.destination_pattern.replacen("%s", suffix, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_id_pattern() {
        let location = LocationConfig {
            indexer_service: "druid:local:indexer".into(),
            destination_pattern: "druid:local:firehose:%s".into(),
        };
        assert_eq!(
            location.destination_id("hey-20240301T1200Z-0000-0000"),
            "druid:local:firehose:hey-20240301T1200Z-0000-0000"
        );
    }

    #[test]
    fn test_discovery_defaults() {
        let discovery: DiscoveryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(discovery.root_path, "/beam-router/discovery");
        assert_eq!(discovery.store, StoreKind::Memory);
        assert_eq!(discovery.refresh_interval, Duration::from_secs(30));
    }
}
