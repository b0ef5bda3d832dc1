//! Prometheus metrics for the plan advisor.
//!
//! Counters work standalone without a Registry; registration is only needed
//! for exposition. Metric names use a `{prefix}_` prefix (default: "onto").
//!
//! ```ignore
//! let registry = prometheus::Registry::new();
//! let advisor = OntoBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build(optimizer, featurizer)?;
//!
//! let encoder = TextEncoder::new();
//! encoder.encode(&registry.gather(), &mut buffer)?;
//! ```

use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::arms::{ArmChoice, SelectionPath};

/// Prometheus metrics for arm selection and the learning-service protocol.
#[derive(Clone)]
pub struct OntoMetrics {
    // === Selections ===
    /// Arms chosen by the learning service
    pub remote_selections: IntCounter,

    /// Remote picks replaced by arm 0 or the host plan
    pub remote_fallbacks: IntCounter,

    /// Arms chosen by greedy-balanced selection
    pub greedy_selections: IntCounter,

    /// Arms taken from the cold-start schedule
    pub cold_start_selections: IntCounter,

    /// Queries planned with the host default (mode or fallback)
    pub host_default_selections: IntCounter,

    // === Failures ===
    /// Arms whose candidate generation failed
    pub candidate_failures: IntCounter,

    /// Exchanges that failed (unreachable, timeout, cancelled, short read)
    pub protocol_failures: IntCounter,

    // === Rewards and predictions ===
    pub rewards_sent: IntCounter,

    /// Rewards not sent (disabled, failed, or context already consumed)
    pub rewards_dropped: IntCounter,

    /// Predictions that came back NaN or failed
    pub predictions_unavailable: IntCounter,

    /// Unreported contexts dropped from the full registry
    pub contexts_evicted: IntCounter,

    /// Last chosen arm id (-1 for the host default)
    pub last_arm: IntGauge,
}

impl Default for OntoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(prefix: &str) -> String {
    // [a-zA-Z_:] first, [a-zA-Z0-9_:] after
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = c.is_ascii_alphabetic() || c == '_' || c == ':' || (i > 0 && c.is_ascii_digit());
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

impl OntoMetrics {
    /// Create metrics with default prefix "onto".
    pub fn new() -> Self {
        Self::with_prefix("onto")
    }

    /// Create metrics with a custom prefix.
    ///
    /// Invalid metric-name characters in the prefix become underscores, so
    /// `"my-app"` yields `my_app_rewards_sent`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize(prefix);
        let p = prefix.as_str();
        Self {
            remote_selections: counter(p, "remote_selections", "Arms chosen by the learning service"),
            remote_fallbacks: counter(p, "remote_fallbacks", "Unusable remote picks replaced by a fallback"),
            greedy_selections: counter(p, "greedy_selections", "Arms chosen by greedy-balanced selection"),
            cold_start_selections: counter(p, "cold_start_selections", "Arms taken from the cold-start schedule"),
            host_default_selections: counter(p, "host_default_selections", "Queries planned with the host default"),
            candidate_failures: counter(p, "candidate_failures", "Arms whose candidate generation failed"),
            protocol_failures: counter(p, "protocol_failures", "Failed learning-service exchanges"),
            rewards_sent: counter(p, "rewards_sent", "Rewards sent to the learning service"),
            rewards_dropped: counter(p, "rewards_dropped", "Rewards not sent"),
            predictions_unavailable: counter(p, "predictions_unavailable", "Predictions that were NaN or failed"),
            contexts_evicted: counter(p, "contexts_evicted", "Unreported request contexts evicted"),
            last_arm: IntGauge::with_opts(Opts::new(
                format!("{}_last_arm", p),
                "Last chosen arm id (-1 for host default)",
            ))
            .expect("metric creation should not fail"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.remote_selections.clone()))?;
        registry.register(Box::new(self.remote_fallbacks.clone()))?;
        registry.register(Box::new(self.greedy_selections.clone()))?;
        registry.register(Box::new(self.cold_start_selections.clone()))?;
        registry.register(Box::new(self.host_default_selections.clone()))?;
        registry.register(Box::new(self.candidate_failures.clone()))?;
        registry.register(Box::new(self.protocol_failures.clone()))?;
        registry.register(Box::new(self.rewards_sent.clone()))?;
        registry.register(Box::new(self.rewards_dropped.clone()))?;
        registry.register(Box::new(self.predictions_unavailable.clone()))?;
        registry.register(Box::new(self.contexts_evicted.clone()))?;
        registry.register(Box::new(self.last_arm.clone()))?;
        Ok(())
    }

    /// Record which path chose the arm for a query.
    #[inline]
    pub fn record_selection(&self, path: SelectionPath, choice: ArmChoice) {
        match path {
            SelectionPath::Remote => self.remote_selections.inc(),
            SelectionPath::RemoteFallback => self.remote_fallbacks.inc(),
            SelectionPath::GreedyBalanced => self.greedy_selections.inc(),
            SelectionPath::ColdStart => self.cold_start_selections.inc(),
            SelectionPath::HostDefault => self.host_default_selections.inc(),
        }
        self.last_arm.set(match choice {
            ArmChoice::HostDefault => -1,
            ArmChoice::Arm(arm) => arm.index() as i64,
        });
    }

    #[inline]
    pub fn record_candidate_failures(&self, count: usize) {
        self.candidate_failures.inc_by(count as u64);
    }

    #[inline]
    pub fn record_protocol_failure(&self) {
        self.protocol_failures.inc();
    }

    #[inline]
    pub fn record_reward(&self, sent: bool) {
        if sent {
            self.rewards_sent.inc();
        } else {
            self.rewards_dropped.inc();
        }
    }

    #[inline]
    pub fn record_prediction_unavailable(&self) {
        self.predictions_unavailable.inc();
    }
}

impl std::fmt::Debug for OntoMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntoMetrics")
            .field("remote_selections", &self.remote_selections.get())
            .field("greedy_selections", &self.greedy_selections.get())
            .field("protocol_failures", &self.protocol_failures.get())
            .field("rewards_sent", &self.rewards_sent.get())
            .field("last_arm", &self.last_arm.get())
            .finish()
    }
}
