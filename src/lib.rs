//! # onto-rs
//!
//! **Learned plan selection for a relational query optimizer**
//!
//! For each eligible query the host optimizer is run once per *arm* (a fixed
//! set of technique switches such as "no nested loops"). One of the resulting
//! plans is chosen by an external learning service, or locally by a
//! greedy-balanced heuristic, and the observed latency is reported back.
//!
//! ## Features
//!
//! - **Arm profiles**: 26 static technique profiles with hint rendering
//! - **Scoped switches**: the session's switches are restored on every exit
//!   path, including optimizer failure and panics
//! - **Shared scheduler**: lock-free round counter, schedule table and usage
//!   counters that can live in host shared memory
//! - **Wire protocol**: length-prefixed JSON frames over short-lived TCP
//!   connections, with timeouts and cancellation
//! - **Take-once contexts**: per-query artifacts bridge plan time and
//!   execution end without double consumption
//! - **Flexible Configuration**: files (TOML/YAML/JSON), environment
//!   variables, code, or CLI flags
//!
//! ## Quick Start
//!
//! ```ignore
//! use onto_rs::{OntoBuilder, SelectionMode};
//!
//! let advisor = OntoBuilder::new()
//!     .file("onto.toml")
//!     .env_prefix("ONTO")
//!     .enabled(true)
//!     .selection(SelectionMode::Remote)
//!     .build(optimizer, featurizer)?;
//!
//! // Planner hook
//! let planned = advisor.plan_query(&query).await?;
//! let id = planned.context.map(|h| h.into_raw()).unwrap_or(0);
//! execute(planned.plan, id);
//!
//! // Executor-end hook
//! if let Some(handle) = ContextHandle::from_raw(id) {
//!     let _ = advisor.report_reward(handle, elapsed_ms).await;
//! }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! enabled = true
//! selection = "local"          # remote | local | host_default
//! local_policy = "greedy_balanced"
//! host = "localhost"
//! port = 9381
//! num_arms = 6
//! queries_per_round = 500
//! io_timeout_ms = 5000
//! ```
//!
//! Environment variables use the configured prefix: `ONTO_NUM_ARMS=5`.

pub mod advisor;
pub mod arms;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod protocol;

pub use advisor::{ExplainReport, PlanAdvisor, Planned};
pub use arms::{
    ArmChoice, ArmConfig, ArmId, ArmProfile, ArmSelector, AtomicSwitchBoard, SchedulerState,
    SelectionPath, SwitchBoard, TechniqueSet,
};
pub use builder::{OntoArgs, OntoBuilder};
pub use config::{LocalPolicy, OntoConfig, SelectionMode};
pub use context::{ContextHandle, ContextRegistry, RequestContext};
pub use error::{OntoError, Result};
pub use metrics::OntoMetrics;
pub use plan::{CandidatePlan, Featurizer, NodeKind, Optimized, Optimizer, PlanNode};
pub use protocol::ProtocolClient;

/// Render the hint statements that reproduce an arm's switches.
///
/// Returns `None` for arms that disable nothing and for arms with no profile.
pub fn hint_for(arm: ArmId) -> Option<String> {
    ArmProfile::lookup(arm).and_then(|profile| profile.hint())
}
