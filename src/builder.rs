//! Builder pattern for constructing plan advisors.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::advisor::PlanAdvisor;
use crate::arms::SchedulerState;
use crate::config::{LocalPolicy, OntoConfig, SelectionMode};
use crate::error::Result;
use crate::plan::{Featurizer, Optimizer};

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;
use std::sync::Arc;

/// Builder for constructing a [`PlanAdvisor`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
/// 5. CLI arguments
///
/// # Examples
///
/// ```ignore
/// use onto_rs::OntoBuilder;
///
/// let advisor = OntoBuilder::new()
///     .file("onto.toml")
///     .env_prefix("ONTO")
///     .enabled(true)
///     .num_arms(5)
///     .build(optimizer, featurizer)?;
/// ```
pub struct OntoBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
    scheduler: Option<Arc<SchedulerState>>,
}

impl Default for OntoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OntoBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntoBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl OntoBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(OntoConfig::default())),
            prometheus_registry: None,
            scheduler: None,
        }
    }

    fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.figment = self.figment.merge(Serialized::default(key, value));
        self
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `ONTO_NUM_ARMS`, `ONTO_QUERIES_PER_ROUND`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Turn the advisor on or off.
    pub fn enabled(self, enabled: bool) -> Self {
        self.set("enabled", enabled)
    }

    /// Enable or disable reward reporting.
    pub fn rewards(self, enabled: bool) -> Self {
        self.set("rewards", enabled)
    }

    /// Set how arms are selected.
    pub fn selection(self, mode: SelectionMode) -> Self {
        self.set("selection", mode)
    }

    /// Set the policy used for local selection.
    pub fn local_policy(self, policy: LocalPolicy) -> Self {
        self.set("local_policy", policy)
    }

    /// Set the learning service host.
    pub fn host(self, host: impl Into<String>) -> Self {
        self.set("host", host.into())
    }

    /// Set the learning service port.
    pub fn port(self, port: u16) -> Self {
        self.set("port", port)
    }

    /// Set the number of arms to consider (1..=26).
    pub fn num_arms(self, n: usize) -> Self {
        self.set("num_arms", n)
    }

    /// Set the schedule table length (1..=500).
    pub fn queries_per_round(self, n: usize) -> Self {
        self.set("queries_per_round", n)
    }

    /// Include plan and buffer JSON in explain output.
    pub fn include_json_in_explain(self, include: bool) -> Self {
        self.set("include_json_in_explain", include)
    }

    /// Set the sequence id echoed into the metadata blob.
    pub fn sequence_id(self, id: impl Into<String>) -> Self {
        self.set("sequence_id", id.into())
    }

    /// Set the learning service I/O timeout. Zero waits forever.
    pub fn io_timeout_ms(self, ms: u64) -> Self {
        self.set("io_timeout_ms", ms)
    }

    /// Cap the number of unreported request contexts kept.
    pub fn max_contexts(self, n: usize) -> Self {
        self.set("max_contexts", n)
    }

    /// Set the prometheus metric name prefix.
    pub fn metrics_prefix(self, prefix: impl Into<String>) -> Self {
        self.set("metrics_prefix", prefix.into())
    }

    /// Provide an external Prometheus registry for metrics exposition.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Share scheduler state with other advisors on this node.
    ///
    /// Without this, the advisor gets a private state.
    pub fn scheduler_state(mut self, state: Arc<SchedulerState>) -> Self {
        self.scheduler = Some(state);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `OntoArgs` struct.
    pub fn with_cli_args(mut self, args: &OntoArgs) -> Self {
        if let Some(enabled) = args.onto_enabled {
            self = self.enabled(enabled);
        }
        if let Some(rewards) = args.onto_rewards {
            self = self.rewards(rewards);
        }
        if let Some(mode) = args.onto_selection {
            self = self.selection(mode);
        }
        if let Some(policy) = args.onto_local_policy {
            self = self.local_policy(policy);
        }
        if let Some(ref host) = args.onto_host {
            self = self.host(host.clone());
        }
        if let Some(port) = args.onto_port {
            self = self.port(port);
        }
        if let Some(n) = args.onto_num_arms {
            self = self.num_arms(n);
        }
        if let Some(n) = args.onto_queries_per_round {
            self = self.queries_per_round(n);
        }
        if let Some(ref id) = args.onto_sequence_id {
            self = self.sequence_id(id.clone());
        }
        if let Some(ms) = args.onto_io_timeout_ms {
            self = self.io_timeout_ms(ms);
        }
        if let Some(n) = args.onto_max_contexts {
            self = self.max_contexts(n);
        }
        self
    }

    /// Extract and validate the merged configuration.
    pub fn config(&self) -> Result<OntoConfig> {
        let mut config: OntoConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry.clone();
        config.validate()?;
        Ok(config)
    }

    /// Build the advisor around the host's optimizer and featurizer.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails or a value is out
    /// of range.
    pub fn build<O, F>(self, optimizer: O, featurizer: F) -> Result<PlanAdvisor<O, F>>
    where
        O: Optimizer,
        F: Featurizer<O::Query>,
    {
        let config = self.config()?;
        let state = self
            .scheduler
            .unwrap_or_else(|| Arc::new(SchedulerState::new()));
        PlanAdvisor::new(config, optimizer, featurizer, state)
    }
}

/// CLI arguments for advisor configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to an `OntoBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use onto_rs::{OntoArgs, OntoBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     onto: OntoArgs,
/// }
///
/// let args = MyArgs::parse();
/// let advisor = OntoBuilder::new()
///     .with_cli_args(&args.onto)
///     .build(optimizer, featurizer)?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct OntoArgs {
    /// Enable learned plan selection
    #[arg(long)]
    pub onto_enabled: Option<bool>,

    /// Report execution latency to the learning service
    #[arg(long)]
    pub onto_rewards: Option<bool>,

    /// Arm selection mode
    #[arg(long, value_enum)]
    pub onto_selection: Option<SelectionMode>,

    /// Local selection policy
    #[arg(long, value_enum)]
    pub onto_local_policy: Option<LocalPolicy>,

    /// Learning service host
    #[arg(long)]
    pub onto_host: Option<String>,

    /// Learning service port
    #[arg(long)]
    pub onto_port: Option<u16>,

    /// Number of arms to consider (1-26)
    #[arg(long)]
    pub onto_num_arms: Option<usize>,

    /// Schedule table length (1-500)
    #[arg(long)]
    pub onto_queries_per_round: Option<usize>,

    /// Sequence id echoed into query metadata
    #[arg(long)]
    pub onto_sequence_id: Option<String>,

    /// Learning service I/O timeout in milliseconds (0 = none)
    #[arg(long)]
    pub onto_io_timeout_ms: Option<u64>,

    /// Most unreported request contexts kept before eviction
    #[arg(long)]
    pub onto_max_contexts: Option<usize>,
}
