//! Configuration types for the plan advisor.

use serde::{Deserialize, Serialize};

use crate::arms::{MAX_ARMS, MAX_QUERIES};
use crate::context::DEFAULT_MAX_CONTEXTS;
use crate::error::{OntoError, Result};
use crate::protocol::DEFAULT_PORT;
use prometheus::Registry;

/// How the arm for a query is chosen.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Send every candidate to the learning service and let it choose.
    #[default]
    Remote,
    /// Choose in-process with the configured [`LocalPolicy`].
    Local,
    /// Always use the host's own plan; no arm search.
    HostDefault,
}

/// In-process selection policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LocalPolicy {
    /// Cheapest arms within the cost epsilon, balanced by usage.
    #[default]
    GreedyBalanced,
    /// Follow the schedule table for the first round, then greedy-balanced.
    ColdStart,
}

/// Configuration for the plan advisor.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment
/// variables using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OntoConfig {
    /// Master switch (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Report execution latency to the learning service (default: true)
    #[serde(default = "default_true")]
    pub rewards: bool,

    /// Arm selection mode (default: remote)
    #[serde(default)]
    pub selection: SelectionMode,

    /// Policy for `selection = "local"` (default: greedy_balanced)
    #[serde(default)]
    pub local_policy: LocalPolicy,

    /// Learning service host (default: "localhost")
    #[serde(default = "default_host")]
    pub host: String,

    /// Learning service port (default: 9381)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of arms to consider, 1..=26 (default: 6)
    #[serde(default = "default_num_arms")]
    pub num_arms: usize,

    /// Schedule table length, 1..=500 (default: 500)
    #[serde(default = "default_queries_per_round")]
    pub queries_per_round: usize,

    /// Add the JSON blobs to explain output (default: false)
    #[serde(default)]
    pub include_json_in_explain: bool,

    /// Free-form id echoed into the metadata blob (default: "")
    #[serde(default)]
    pub sequence_id: String,

    /// Learning service I/O timeout in milliseconds; 0 waits forever
    /// (default: 5000)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Most planned-but-unreported contexts kept before the oldest is
    /// evicted (default: 10000)
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,

    /// Prefix for prometheus metric names (default: "onto")
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_num_arms() -> usize {
    6
}

fn default_queries_per_round() -> usize {
    MAX_QUERIES
}

fn default_io_timeout_ms() -> u64 {
    5000
}

fn default_max_contexts() -> usize {
    DEFAULT_MAX_CONTEXTS
}

fn default_metrics_prefix() -> String {
    "onto".to_string()
}

impl Default for OntoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rewards: default_true(),
            selection: SelectionMode::default(),
            local_policy: LocalPolicy::default(),
            host: default_host(),
            port: default_port(),
            num_arms: default_num_arms(),
            queries_per_round: default_queries_per_round(),
            include_json_in_explain: false,
            sequence_id: String::new(),
            io_timeout_ms: default_io_timeout_ms(),
            max_contexts: default_max_contexts(),
            metrics_prefix: default_metrics_prefix(),
            prometheus_registry: None,
        }
    }
}

impl OntoConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every ranged field.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ARMS).contains(&self.num_arms) {
            return Err(OntoError::InvalidConfig(format!(
                "num_arms must be in 1..={}, got {}",
                MAX_ARMS, self.num_arms
            )));
        }
        if !(1..=MAX_QUERIES).contains(&self.queries_per_round) {
            return Err(OntoError::InvalidConfig(format!(
                "queries_per_round must be in 1..={}, got {}",
                MAX_QUERIES, self.queries_per_round
            )));
        }
        if self.port == 0 {
            return Err(OntoError::InvalidConfig("port must be non-zero".into()));
        }
        if self.host.trim().is_empty() {
            return Err(OntoError::InvalidConfig("host must not be empty".into()));
        }
        if self.max_contexts == 0 {
            return Err(OntoError::InvalidConfig("max_contexts must be at least 1".into()));
        }
        Ok(())
    }
}
