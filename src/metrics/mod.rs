//! Metrics for plan-advisor observability.
//!
//! Metrics are always collected (atomic operations) and can optionally be
//! exposed via a Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges
//!
//! - `onto_last_arm` - Last chosen arm id (-1 for host default)
//!
//! ## Counters
//!
//! - `onto_remote_selections` - Arms chosen by the learning service
//! - `onto_remote_fallbacks` - Unusable remote picks replaced by a fallback
//! - `onto_greedy_selections` - Greedy-balanced choices
//! - `onto_cold_start_selections` - Cold-start schedule choices
//! - `onto_host_default_selections` - Host default plans used
//! - `onto_candidate_failures` - Arms whose plan generation failed
//! - `onto_protocol_failures` - Failed learning-service exchanges
//! - `onto_rewards_sent` / `onto_rewards_dropped`
//! - `onto_predictions_unavailable` - NaN or failed predictions

mod prometheus;

pub use self::prometheus::OntoMetrics;
