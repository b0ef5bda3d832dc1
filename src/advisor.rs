//! The plan advisor: planner, execution-end and explain flows.
//!
//! [`PlanAdvisor`] ties the pieces together for one host session:
//!
//! 1. [`plan_query`](PlanAdvisor::plan_query) generates a candidate per arm,
//!    picks one (remotely, locally, or the host default) and registers a
//!    [`RequestContext`] whose handle the host stores in the plan.
//! 2. [`report_reward`](PlanAdvisor::report_reward) takes that context once
//!    after execution and sends the observed latency.
//! 3. [`explain`](PlanAdvisor::explain) plans, consumes the context itself and
//!    asks the service for a latency prediction.
//!
//! No failure in these flows is fatal to the query: the worst case is the
//! host default plan with no reward recorded.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arms::{ArmChoice, ArmSelector, SchedulerState, Selection, SelectionPath};
use crate::config::{OntoConfig, SelectionMode};
use crate::context::{ContextHandle, ContextRegistry, RequestContext};
use crate::error::{OntoError, Result};
use crate::metrics::OntoMetrics;
use crate::plan::{CandidateGenerator, CandidatePlan, CandidateSet, Featurizer, Optimizer};
use crate::protocol::{Message, ProtocolClient};

/// A plan ready for execution.
#[derive(Debug)]
pub struct Planned<P> {
    pub plan: P,
    pub arm: ArmChoice,
    pub path: SelectionPath,
    /// Handle to store in the plan's identity slot; `None` when no context
    /// was registered (feature disabled, or the learning service was
    /// unreachable).
    pub context: Option<ContextHandle>,
}

/// What the advisor adds to an EXPLAIN.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplainReport {
    pub arm: ArmChoice,
    /// `None` when the service could not be reached; NaN when it has no model.
    pub prediction_ms: Option<f64>,
    /// Hint that reproduces the chosen arm.
    pub hint: Option<String>,
    pub plan_json: Option<String>,
    pub buffer_json: Option<String>,
}

impl ExplainReport {
    /// Text lines in explain order.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(prediction) = self.prediction_ms {
            if prediction.is_nan() {
                lines.push("Onto prediction: NaN".to_string());
            } else {
                lines.push(format!("Onto prediction: {:.3} ms", prediction));
            }
        }
        if let Some(plan) = &self.plan_json {
            lines.push(format!("Onto plan JSON: {}", plan));
        }
        if let Some(buffer) = &self.buffer_json {
            lines.push(format!("Onto buffer JSON: {}", buffer));
        }
        lines.push(format!(
            "Onto recommended hint: {}",
            self.hint.as_deref().unwrap_or("(no hint)")
        ));
        lines
    }
}

impl fmt::Display for ExplainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().join("\n"))
    }
}

/// Insert `key` into a metadata object. Non-object blobs are left alone.
fn enrich(metadata: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = metadata {
        map.insert(key.to_string(), value);
    }
}

/// Learned plan selection for one host session.
pub struct PlanAdvisor<O, F>
where
    O: Optimizer,
    F: Featurizer<O::Query>,
{
    config: OntoConfig,
    optimizer: O,
    featurizer: F,
    selector: ArmSelector,
    client: ProtocolClient,
    contexts: ContextRegistry,
    metrics: OntoMetrics,
    cancel: Mutex<CancellationToken>,
}

impl<O, F> PlanAdvisor<O, F>
where
    O: Optimizer,
    F: Featurizer<O::Query>,
{
    /// Create an advisor from a validated configuration.
    ///
    /// `state` is shared by every advisor on the node; its schedule is built
    /// by whichever advisor gets there first.
    pub fn new(
        config: OntoConfig,
        optimizer: O,
        featurizer: F,
        state: Arc<SchedulerState>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = OntoMetrics::with_prefix(&config.metrics_prefix);
        if let Some(registry) = &config.prometheus_registry {
            if let Err(err) = metrics.register(registry) {
                warn!(error = %err, "failed to register metrics");
            }
        }

        state.init(config.num_arms, config.queries_per_round);

        info!(
            enabled = config.enabled,
            selection = ?config.selection,
            local_policy = ?config.local_policy,
            num_arms = config.num_arms,
            service = %format!("{}:{}", config.host, config.port),
            "plan advisor ready"
        );

        Ok(Self {
            selector: ArmSelector::new(state, config.num_arms, config.local_policy),
            client: ProtocolClient::from_config(&config),
            contexts: ContextRegistry::with_capacity(config.max_contexts)
                .with_eviction_counter(metrics.contexts_evicted.clone()),
            cancel: Mutex::new(CancellationToken::new()),
            metrics,
            optimizer,
            featurizer,
            config,
        })
    }

    pub fn config(&self) -> &OntoConfig {
        &self.config
    }

    pub fn metrics(&self) -> &OntoMetrics {
        &self.metrics
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    pub fn selector(&self) -> &ArmSelector {
        &self.selector
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Cancel every in-flight learning-service exchange.
    ///
    /// Cancelled exchanges fall back like an unreachable service. Later
    /// exchanges are unaffected.
    pub fn cancel_all(&self) {
        let mut root = self.cancel.lock();
        root.cancel();
        *root = CancellationToken::new();
        info!("cancelled in-flight learning service exchanges");
    }

    fn child_token(&self) -> CancellationToken {
        self.cancel.lock().child_token()
    }

    fn generator(&self) -> CandidateGenerator<'_, O> {
        CandidateGenerator::new(&self.optimizer)
    }

    fn host_default(&self, query: &O::Query) -> Result<CandidatePlan<O::Plan>> {
        self.generator().generate(query, ArmChoice::HostDefault)
    }

    fn generate_all(&self, query: &O::Query) -> CandidateSet<O::Plan> {
        let candidates = self.generator().generate_all(query, self.selector.num_arms());
        if candidates.failed() > 0 {
            self.metrics.record_candidate_failures(candidates.failed());
        }
        candidates
    }

    fn take_chosen(
        &self,
        query: &O::Query,
        candidates: CandidateSet<O::Plan>,
        selection: Selection,
    ) -> Result<CandidatePlan<O::Plan>> {
        match selection.choice {
            ArmChoice::Arm(arm) => match candidates.take(arm) {
                Some(candidate) => Ok(candidate),
                None => self.host_default(query),
            },
            ArmChoice::HostDefault => {
                drop(candidates);
                self.host_default(query)
            }
        }
    }

    /// Plan `query` and register its request context.
    ///
    /// Errors only when not even the host default plan can be produced.
    pub async fn plan_query(&self, query: &O::Query) -> Result<Planned<O::Plan>> {
        if !self.config.enabled {
            let candidate = self.host_default(query)?;
            return Ok(Planned {
                plan: candidate.into_plan(),
                arm: ArmChoice::HostDefault,
                path: SelectionPath::HostDefault,
                context: None,
            });
        }

        let round = self.selector.state().next_round_index();
        let buffer_state = self.featurizer.buffer_state(query).to_string();
        let mut metadata = self.featurizer.metadata(query);
        enrich(
            &mut metadata,
            "sequence_id",
            Value::String(self.config.sequence_id.clone()),
        );

        let host_default = Selection {
            choice: ArmChoice::HostDefault,
            path: SelectionPath::HostDefault,
        };

        let (selection, candidate) = match self.config.selection {
            SelectionMode::HostDefault => (host_default, self.host_default(query)?),
            SelectionMode::Local => {
                let candidates = self.generate_all(query);
                match self.selector.select_local(round, &candidates) {
                    Ok(selection) => (selection, self.take_chosen(query, candidates, selection)?),
                    Err(err) => {
                        warn!(round, error = %err, "local selection failed, using host default plan");
                        drop(candidates);
                        (host_default, self.host_default(query)?)
                    }
                }
            }
            SelectionMode::Remote => {
                let candidates = self.generate_all(query);
                let cancel = self.child_token();
                let remote = self
                    .selector
                    .select_remote(
                        &self.client,
                        &candidates,
                        &buffer_state,
                        &metadata.to_string(),
                        &cancel,
                    )
                    .await;
                match remote {
                    Ok(selection) => (selection, self.take_chosen(query, candidates, selection)?),
                    Err(err) => {
                        self.metrics.record_protocol_failure();
                        warn!(round, error = %err, "learning service unavailable, using host default plan");
                        drop(candidates);
                        let candidate = self.host_default(query)?;
                        self.metrics
                            .record_selection(SelectionPath::HostDefault, ArmChoice::HostDefault);
                        return Ok(Planned {
                            plan: candidate.into_plan(),
                            arm: ArmChoice::HostDefault,
                            path: SelectionPath::HostDefault,
                            context: None,
                        });
                    }
                }
            }
        };

        let arm_config = match candidate.arm {
            ArmChoice::Arm(_) => {
                let config = candidate.arm_config();
                enrich(&mut metadata, "arm_config_json", serde_json::to_value(config)?);
                Some(config.to_json()?)
            }
            ArmChoice::HostDefault => None,
        };

        let handle = self.contexts.create(RequestContext {
            arm: candidate.arm,
            plan_json: candidate.to_json()?,
            buffer_state,
            metadata: metadata.to_string(),
            arm_config,
        });

        self.metrics.record_selection(selection.path, candidate.arm);
        debug!(
            round,
            arm = %candidate.arm,
            path = ?selection.path,
            cost = candidate.cost,
            context = %handle,
            "planned query"
        );

        Ok(Planned {
            arm: candidate.arm,
            path: selection.path,
            plan: candidate.into_plan(),
            context: Some(handle),
        })
    }

    /// Report the execution latency of a planned query.
    ///
    /// The context is taken exactly once. A second report for the same
    /// handle returns [`OntoError::ContextConsumed`] and sends nothing. A
    /// context evicted from the full registry returns
    /// [`OntoError::ContextEvicted`]. Every error other than a double report
    /// is recoverable and means the reward was dropped.
    pub async fn report_reward(&self, handle: ContextHandle, latency_ms: f64) -> Result<()> {
        let context = match self.contexts.take_once(handle) {
            Ok(context) => context,
            Err(err) => {
                self.metrics.record_reward(false);
                return Err(err);
            }
        };

        if !self.config.rewards {
            debug!(context = %handle, "rewards disabled, discarding context");
            self.metrics.record_reward(false);
            return Ok(());
        }

        let message = Message::reward(
            &context.plan_json,
            &context.buffer_state,
            &context.metadata,
            &context.arm_config_or_default()?,
            latency_ms,
            std::process::id(),
        )?;

        match self.client.reward(message, &self.child_token()).await {
            Ok(()) => {
                self.metrics.record_reward(true);
                debug!(context = %handle, arm = %context.arm, latency_ms, "reward sent");
                Ok(())
            }
            Err(err) => {
                self.metrics.record_protocol_failure();
                self.metrics.record_reward(false);
                Err(err)
            }
        }
    }

    /// Plan `query` and ask the service how long the chosen plan will take.
    pub async fn explain(&self, query: &O::Query) -> Result<ExplainReport> {
        if !self.config.enabled {
            return Err(OntoError::Disabled);
        }

        let planned = self.plan_query(query).await?;
        let mut report = ExplainReport {
            arm: planned.arm,
            prediction_ms: None,
            hint: planned.arm.arm().and_then(crate::hint_for),
            plan_json: None,
            buffer_json: None,
        };

        let Some(handle) = planned.context else {
            self.metrics.record_prediction_unavailable();
            return Ok(report);
        };
        let context = self.contexts.take_once(handle)?;

        let message = Message::predict(
            &context.plan_json,
            &context.buffer_state,
            &context.metadata,
            &context.arm_config_or_default()?,
        );
        report.prediction_ms = match self.client.predict(message, &self.child_token()).await {
            Ok(prediction) => Some(prediction),
            Err(OntoError::ShortResponse { .. }) => Some(f64::NAN),
            Err(_) => {
                self.metrics.record_protocol_failure();
                None
            }
        };
        if report.prediction_ms.map_or(true, f64::is_nan) {
            self.metrics.record_prediction_unavailable();
        }

        if self.config.include_json_in_explain {
            report.plan_json = Some(context.plan_json);
            report.buffer_json = Some(context.buffer_state);
        }
        Ok(report)
    }
}

impl<O, F> fmt::Debug for PlanAdvisor<O, F>
where
    O: Optimizer,
    F: Featurizer<O::Query>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanAdvisor")
            .field("selection", &self.config.selection)
            .field("selector", &self.selector)
            .field("client", &self.client)
            .field("contexts", &self.contexts)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arms::ArmId;
    use serde_json::json;

    #[test]
    fn test_enrich_object() {
        let mut metadata = json!({ "tables": ["title"] });
        enrich(&mut metadata, "sequence_id", json!("q-7"));
        assert_eq!(metadata, json!({ "tables": ["title"], "sequence_id": "q-7" }));
    }

    #[test]
    fn test_enrich_non_object_passthrough() {
        let mut metadata = json!([1, 2, 3]);
        enrich(&mut metadata, "sequence_id", json!("q-7"));
        assert_eq!(metadata, json!([1, 2, 3]));

        let mut metadata = Value::Null;
        enrich(&mut metadata, "sequence_id", json!("q-7"));
        assert!(metadata.is_null());
    }

    #[test]
    fn test_render_full_report() {
        let report = ExplainReport {
            arm: ArmChoice::Arm(ArmId::new(1)),
            prediction_ms: Some(12.3456),
            hint: Some("SET enable_nestloop TO off; ".into()),
            plan_json: Some("{\"Plan\":{}}".into()),
            buffer_json: Some("{}".into()),
        };
        assert_eq!(
            report.render(),
            vec![
                "Onto prediction: 12.346 ms",
                "Onto plan JSON: {\"Plan\":{}}",
                "Onto buffer JSON: {}",
                "Onto recommended hint: SET enable_nestloop TO off; ",
            ]
        );
    }

    #[test]
    fn test_render_without_prediction() {
        let report = ExplainReport {
            arm: ArmChoice::HostDefault,
            prediction_ms: None,
            hint: None,
            plan_json: None,
            buffer_json: None,
        };
        assert_eq!(report.to_string(), "Onto recommended hint: (no hint)");
    }

    #[test]
    fn test_render_nan_prediction() {
        let report = ExplainReport {
            arm: ArmChoice::Arm(ArmId::DEFAULT),
            prediction_ms: Some(f64::NAN),
            hint: None,
            plan_json: None,
            buffer_json: None,
        };
        assert_eq!(report.render()[0], "Onto prediction: NaN");
    }
}
