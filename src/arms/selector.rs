//! Arm selection over a set of generated candidates.
//!
//! Three paths pick the arm for a query:
//!
//! - **Remote**: every candidate goes to the learning service, which answers
//!   with an arm index. Out-of-range or failed picks fall back to arm 0.
//! - **Greedy-balanced**: among arms whose cost is within [`COST_EPSILON`] of
//!   the cheapest, take the least-used one (lowest id on ties) and count the
//!   use.
//! - **Cold start**: while the round counter is inside the schedule table,
//!   take the scheduled arm; afterwards behave like greedy-balanced.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::profile::{ArmConfig, ArmProfile};
use super::schedule::SchedulerState;
use super::types::{ArmChoice, ArmId, TechniqueSet};
use crate::config::LocalPolicy;
use crate::error::{OntoError, Result};
use crate::plan::{plan_json, CandidateSet};
use crate::protocol::{Message, ProtocolClient};

/// Cost window within which arms count as equally cheap.
pub const COST_EPSILON: f64 = 300.0;

/// Which path produced a selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SelectionPath {
    Remote,
    /// The service's pick was unusable; arm 0 (or the host plan) was used.
    RemoteFallback,
    GreedyBalanced,
    ColdStart,
    HostDefault,
}

/// The chosen arm and how it was chosen.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Selection {
    pub choice: ArmChoice,
    pub path: SelectionPath,
}

impl Selection {
    fn arm(arm: ArmId, path: SelectionPath) -> Self {
        Self {
            choice: ArmChoice::Arm(arm),
            path,
        }
    }
}

/// Greedy-balanced choice over per-arm costs (`None` for failed arms).
///
/// Returns `None` when no arm has a usable cost.
pub fn greedy_balanced(costs: &[Option<f64>], usage: impl Fn(ArmId) -> u32) -> Option<ArmId> {
    let usable = || {
        costs
            .iter()
            .enumerate()
            .filter_map(|(i, cost)| cost.filter(|c| !c.is_nan()).map(|c| (ArmId::new(i), c)))
    };

    let best = usable().map(|(_, cost)| cost).reduce(f64::min)?;

    let mut chosen: Option<(ArmId, u32)> = None;
    for (arm, cost) in usable() {
        if (cost - best).abs() >= COST_EPSILON {
            continue;
        }
        let used = usage(arm);
        match chosen {
            Some((_, least)) if used >= least => {}
            _ => chosen = Some((arm, used)),
        }
    }
    chosen.map(|(arm, _)| arm)
}

/// Picks an arm from a [`CandidateSet`] and maintains the usage counters.
#[derive(Debug, Clone)]
pub struct ArmSelector {
    state: Arc<SchedulerState>,
    num_arms: usize,
    policy: LocalPolicy,
}

impl ArmSelector {
    pub fn new(state: Arc<SchedulerState>, num_arms: usize, policy: LocalPolicy) -> Self {
        Self {
            state,
            num_arms,
            policy,
        }
    }

    /// Number of arms candidates are generated for.
    pub fn num_arms(&self) -> usize {
        self.num_arms
    }

    pub fn policy(&self) -> LocalPolicy {
        self.policy
    }

    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Choose locally for the query handled in `round`.
    pub fn select_local<P>(&self, round: u32, candidates: &CandidateSet<P>) -> Result<Selection> {
        if self.policy == LocalPolicy::ColdStart && (round as usize) < self.state.schedule_len() {
            if let Some(arm) = self.state.scheduled_arm(round) {
                if candidates.get(arm).is_some() {
                    debug!(round, %arm, "cold-start arm from schedule");
                    return Ok(Selection::arm(arm, SelectionPath::ColdStart));
                }
                debug!(round, %arm, "scheduled arm has no candidate, using greedy choice");
            }
        }

        let costs = candidates.costs();
        let arm = greedy_balanced(&costs, |arm| self.state.usage_count(arm))
            .ok_or(OntoError::NoCandidates)?;
        self.state.record_usage(arm);
        debug!(
            round,
            %arm,
            cost = costs[arm.index()].unwrap_or(f64::NAN),
            usage = self.state.usage_count(arm),
            "greedy-balanced arm"
        );
        Ok(Selection::arm(arm, SelectionPath::GreedyBalanced))
    }

    /// Turn the service's raw answer into a usable selection.
    pub fn resolve_remote<P>(&self, index: u32, candidates: &CandidateSet<P>) -> Selection {
        let num_arms = candidates.num_arms();
        if index as usize >= num_arms {
            let err = OntoError::ArmOutOfRange { index, num_arms };
            error!(error = %err, "falling back to arm 0");
            return Self::fallback(candidates);
        }

        let arm = ArmId::new(index as usize);
        if candidates.get(arm).is_none() {
            error!(%arm, "learning service chose an arm without a plan, falling back to arm 0");
            return Self::fallback(candidates);
        }

        debug!(%arm, "learning service chose arm");
        Selection::arm(arm, SelectionPath::Remote)
    }

    fn fallback<P>(candidates: &CandidateSet<P>) -> Selection {
        if candidates.get(ArmId::DEFAULT).is_some() {
            Selection::arm(ArmId::DEFAULT, SelectionPath::RemoteFallback)
        } else {
            Selection {
                choice: ArmChoice::HostDefault,
                path: SelectionPath::RemoteFallback,
            }
        }
    }

    /// Ask the learning service to choose among `candidates`.
    ///
    /// Failed arms are sent as `null` plans so the service's indices line up
    /// with arm ids. A short answer selects arm 0 like an out-of-range one;
    /// every other protocol error is returned to the caller.
    pub async fn select_remote<P>(
        &self,
        client: &ProtocolClient,
        candidates: &CandidateSet<P>,
        buffer_state: &str,
        metadata: &str,
        cancel: &CancellationToken,
    ) -> Result<Selection> {
        let arms = candidates
            .iter()
            .map(|(arm, candidate)| -> Result<(String, String)> {
                let plan = match candidate {
                    Some(candidate) => candidate.to_json()?,
                    None => plan_json(None)?,
                };
                let config = ArmProfile::lookup(arm)
                    .map(|profile| profile.config())
                    .unwrap_or_else(|| ArmConfig::new(arm, TechniqueSet::ALL));
                Ok((plan, config.to_json()?))
            })
            .collect::<Result<Vec<_>>>()?;

        let message = Message::query(arms, buffer_state, metadata);
        match client.select_arm(message, cancel).await {
            Ok(index) => Ok(self.resolve_remote(index, candidates)),
            Err(err @ OntoError::ShortResponse { .. }) => {
                warn!(error = %err, "unreadable arm choice, falling back to arm 0");
                Ok(Self::fallback(candidates))
            }
            Err(err) => Err(err),
        }
    }
}
