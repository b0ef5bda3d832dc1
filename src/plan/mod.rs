//! Candidate plans and their serialized summary trees.
//!
//! - [`PlanNode`]: summary tree of one plan, serialized as `{"Plan": ...}`
//! - [`Optimizer`] / [`Featurizer`]: host seams
//! - [`CandidateGenerator`]: one plan per arm, switches scoped per call
//! - [`CandidateSet`]: owns the generated plans until one is taken

mod candidate;
mod node;

pub use candidate::{
    CandidateGenerator, CandidatePlan, CandidateSet, Featurizer, Optimized, Optimizer,
};
pub use node::{parse_plan_json, plan_json, NodeKind, PlanIter, PlanNode, MAX_CHILDREN};
