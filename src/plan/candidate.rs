//! Candidate plan generation.
//!
//! [`CandidateGenerator`] calls the host optimizer once per arm under that
//! arm's technique switches. Each call gets its own copy of the query because
//! the optimizer may rewrite its input. The generated plans are owned by a
//! [`CandidateSet`] until exactly one is taken for execution; the rest are
//! released when the set is dropped.

use tracing::{debug, warn};

use super::node::{plan_json, PlanNode};
use crate::arms::{ArmChoice, ArmConfig, ArmId, ArmProfile, SwitchBoard, SwitchGuard};
use crate::error::{OntoError, Result};

/// Output of one optimizer call: the executable plan plus its summary tree.
#[derive(Clone, Debug)]
pub struct Optimized<P> {
    pub plan: P,
    pub tree: PlanNode,
}

/// The host's query optimizer.
///
/// The optimizer reads its technique switches from [`Optimizer::switchboard`]
/// implicitly; the generator changes them around each call.
pub trait Optimizer {
    /// A parsed query. Cloned once per optimizer call.
    type Query: Clone;

    /// The host's executable plan.
    type Plan;

    /// The session switches this optimizer honors.
    fn switchboard(&self) -> &dyn SwitchBoard;

    /// Produce a plan for `query` under the current switches.
    fn optimize(&self, query: Self::Query) -> Result<Optimized<Self::Plan>>;
}

/// Produces the opaque feature blobs sent alongside plans.
pub trait Featurizer<Q> {
    /// Buffer/resource state of the relations the query touches.
    fn buffer_state(&self, query: &Q) -> serde_json::Value;

    /// Query metadata (schema, statistics, clause features).
    fn metadata(&self, query: &Q) -> serde_json::Value;
}

/// Featurizer that reports empty objects.
impl<Q> Featurizer<Q> for () {
    fn buffer_state(&self, _query: &Q) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    fn metadata(&self, _query: &Q) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

/// One generated plan and the arm it was generated under.
#[derive(Debug)]
pub struct CandidatePlan<P> {
    pub arm: ArmChoice,
    pub cost: f64,
    pub rows: f64,
    pub tree: PlanNode,
    plan: P,
}

impl<P> CandidatePlan<P> {
    fn new(arm: ArmChoice, optimized: Optimized<P>) -> Self {
        Self {
            arm,
            cost: optimized.tree.total_cost,
            rows: optimized.tree.plan_rows,
            tree: optimized.tree,
            plan: optimized.plan,
        }
    }

    /// Borrow the executable plan.
    pub fn plan(&self) -> &P {
        &self.plan
    }

    /// Hand the executable plan over for execution.
    pub fn into_plan(self) -> P {
        self.plan
    }

    /// Release a plan that was not chosen.
    pub fn discard(self) {
        debug!(arm = %self.arm, cost = self.cost, "discarding candidate plan");
    }

    /// `{"Plan": ...}` JSON for this candidate.
    pub fn to_json(&self) -> Result<String> {
        plan_json(Some(&self.tree))
    }

    /// Wire configuration of the arm this plan was generated under.
    pub fn arm_config(&self) -> ArmConfig {
        match self.arm {
            ArmChoice::HostDefault => ArmConfig::host_default(),
            ArmChoice::Arm(arm) => ArmProfile::lookup(arm)
                .map(|profile| profile.config())
                .unwrap_or_else(ArmConfig::host_default),
        }
    }
}

/// Calls the host optimizer under a given arm's switches.
pub struct CandidateGenerator<'o, O: Optimizer + ?Sized> {
    optimizer: &'o O,
}

impl<'o, O: Optimizer + ?Sized> CandidateGenerator<'o, O> {
    pub fn new(optimizer: &'o O) -> Self {
        Self { optimizer }
    }

    /// Generate one candidate plan for `query` under `arm`.
    ///
    /// The session's switches are restored before this returns, whether the
    /// optimizer succeeded, failed or panicked.
    pub fn generate(&self, query: &O::Query, arm: ArmChoice) -> Result<CandidatePlan<O::Plan>> {
        let optimized = match arm {
            ArmChoice::HostDefault => self.optimizer.optimize(query.clone()),
            ArmChoice::Arm(id) => {
                let profile = ArmProfile::get(id)?;
                let _guard = SwitchGuard::apply(self.optimizer.switchboard(), profile.techniques);
                self.optimizer.optimize(query.clone())
            }
        };

        let optimized = optimized.map_err(|err| match err {
            OntoError::Optimizer { .. } => err,
            other => OntoError::Optimizer {
                arm: arm.to_string(),
                reason: other.to_string(),
            },
        })?;

        if let ArmChoice::Arm(_) = arm {
            // serde_json writes NaN and infinities as `null`, which does not
            // parse back as a number.
            if let Some(node) = optimized
                .tree
                .iter()
                .find(|node| !node.total_cost.is_finite() || !node.plan_rows.is_finite())
            {
                return Err(OntoError::Optimizer {
                    arm: arm.to_string(),
                    reason: format!(
                        "non-finite estimate on {:?} node (cost {}, rows {})",
                        node.kind, node.total_cost, node.plan_rows
                    ),
                });
            }
        }

        Ok(CandidatePlan::new(arm, optimized))
    }

    /// Generate a candidate for each of the first `num_arms` arms.
    ///
    /// Arms whose generation fails are logged and left empty in the set.
    pub fn generate_all(&self, query: &O::Query, num_arms: usize) -> CandidateSet<O::Plan> {
        let slots = ArmId::first(num_arms)
            .map(|arm| match self.generate(query, ArmChoice::Arm(arm)) {
                Ok(candidate) => {
                    debug!(%arm, cost = candidate.cost, rows = candidate.rows, "generated candidate");
                    Some(candidate)
                }
                Err(err) => {
                    warn!(%arm, error = %err, "candidate generation failed, excluding arm");
                    None
                }
            })
            .collect();
        CandidateSet { slots }
    }
}

/// Candidate plans indexed by arm id; failed arms are empty slots.
#[derive(Debug)]
pub struct CandidateSet<P> {
    slots: Vec<Option<CandidatePlan<P>>>,
}

impl<P> CandidateSet<P> {
    /// Number of arms that were attempted.
    pub fn num_arms(&self) -> usize {
        self.slots.len()
    }

    /// Number of arms that produced a plan.
    pub fn succeeded(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Number of arms that failed.
    pub fn failed(&self) -> usize {
        self.num_arms() - self.succeeded()
    }

    /// Candidate for `arm`, if it produced one.
    pub fn get(&self, arm: ArmId) -> Option<&CandidatePlan<P>> {
        self.slots.get(arm.index()).and_then(Option::as_ref)
    }

    /// Per-arm costs, `None` for failed arms.
    pub fn costs(&self) -> Vec<Option<f64>> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map(|c| c.cost))
            .collect()
    }

    /// Iterate all slots in arm order.
    pub fn iter(&self) -> impl Iterator<Item = (ArmId, Option<&CandidatePlan<P>>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (ArmId::new(i), slot.as_ref()))
    }

    /// Take the chosen candidate and release every other one.
    pub fn take(mut self, arm: ArmId) -> Option<CandidatePlan<P>> {
        let chosen = self.slots.get_mut(arm.index()).and_then(Option::take);
        self.discard_all();
        chosen
    }

    /// Release every remaining candidate.
    pub fn discard_all(&mut self) {
        for candidate in self.slots.iter_mut().filter_map(Option::take) {
            candidate.discard();
        }
    }
}

impl<P> Drop for CandidateSet<P> {
    fn drop(&mut self) {
        self.discard_all();
    }
}
