//! Arms: technique profiles, the shared schedule, and arm selection.
//!
//! An arm is one fixed combination of optimizer technique switches. For each
//! eligible query a plan is generated per arm and one of them is chosen.
//!
//! # Components
//!
//! - [`ArmProfile`]: the static profile table (arm 0 is the host default)
//! - [`SwitchGuard`]: applies a profile for one optimizer call and restores
//!   the session's switches on every exit path
//! - [`SchedulerState`]: round counter, schedule table and usage counters
//!   shared by all query handlers on a node
//! - [`ArmSelector`]: remote, greedy-balanced and cold-start selection
//!
//! # Greedy-balanced selection
//!
//! ```ignore
//! use onto_rs::arms::{greedy_balanced, ArmId};
//!
//! let costs = [100.0, 50.0, 500.0, 700.0, 60.0, 900.0].map(Some);
//! // Arms 0, 1 and 4 are within 300 of the cheapest; all unused, so arm 0.
//! assert_eq!(greedy_balanced(&costs, |_| 0), Some(ArmId::new(0)));
//! ```

mod profile;
mod schedule;
mod selector;
mod switches;
mod types;

pub use profile::{ArmConfig, ArmProfile};
pub use schedule::{build_schedule, ScheduleRegion, SchedulerState, MAX_QUERIES, SCHEDULE_SEED};
pub use selector::{greedy_balanced, ArmSelector, Selection, SelectionPath, COST_EPSILON};
pub use switches::{AtomicSwitchBoard, SwitchBoard, SwitchGuard};
pub use types::{ArmChoice, ArmId, TechniqueSet, MAX_ARMS};
