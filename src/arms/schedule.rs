//! Process-wide scheduler state shared by every concurrent query handler.
//!
//! [`ScheduleRegion`] is a fixed-size, `#[repr(C)]` block made only of
//! 32-bit atomics, so it is valid when zero-initialized and can live in
//! host-provided shared memory or a `static`. [`SchedulerState`] wraps a
//! region and exposes the round counter, the round-robin schedule table and
//! the per-arm usage counters.
//!
//! # Memory ordering
//!
//! Counters use `Relaxed` single-word operations; there are no multi-field
//! transactions. Usage-based balancing is therefore approximate: concurrent
//! handlers may read stale counts and make momentarily uneven choices. The
//! only acquire/release pair publishes the schedule table once it is built.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::types::{ArmId, MAX_ARMS};

/// Capacity of the schedule table (maximum queries per round).
pub const MAX_QUERIES: usize = 500;

/// Seed for schedule construction; the table is identical across restarts.
pub const SCHEDULE_SEED: u64 = 42;

const UNINIT: u32 = 0;
const BUILDING: u32 = 1;
const READY: u32 = 2;

/// Fixed-size shared block backing a [`SchedulerState`].
#[repr(C)]
pub struct ScheduleRegion {
    round: AtomicU32,
    state: AtomicU32,
    num_arms: AtomicU32,
    len: AtomicU32,
    schedule: [AtomicU32; MAX_QUERIES],
    usage: [AtomicU32; MAX_ARMS],
}

impl ScheduleRegion {
    /// An empty, unbuilt region.
    pub const fn new() -> Self {
        Self {
            round: AtomicU32::new(0),
            state: AtomicU32::new(UNINIT),
            num_arms: AtomicU32::new(0),
            len: AtomicU32::new(0),
            schedule: [const { AtomicU32::new(0) }; MAX_QUERIES],
            usage: [const { AtomicU32::new(0) }; MAX_ARMS],
        }
    }
}

impl Default for ScheduleRegion {
    fn default() -> Self {
        Self::new()
    }
}

enum Region {
    Owned(Box<ScheduleRegion>),
    Attached(&'static ScheduleRegion),
}

/// Round counter, schedule table and usage counters for one node.
pub struct SchedulerState {
    region: Region,
}

impl SchedulerState {
    /// Create state backed by a private heap region.
    ///
    /// Share it between handlers with `Arc<SchedulerState>`.
    pub fn new() -> Self {
        Self {
            region: Region::Owned(Box::new(ScheduleRegion::new())),
        }
    }

    /// Attach to a region that outlives the process's use of it, such as a
    /// `static` or a mapping of host shared memory.
    pub fn attach(region: &'static ScheduleRegion) -> Self {
        Self {
            region: Region::Attached(region),
        }
    }

    fn region(&self) -> &ScheduleRegion {
        match &self.region {
            Region::Owned(region) => region,
            Region::Attached(region) => region,
        }
    }

    /// Build the schedule table and zero the usage counters.
    ///
    /// Safe to call concurrently: only the first caller builds, every other
    /// caller waits for and observes the already-built table. Returns `true`
    /// for the caller that performed the build.
    pub fn init(&self, num_arms: usize, num_queries: usize) -> bool {
        let region = self.region();

        loop {
            match region.state.compare_exchange(
                UNINIT,
                BUILDING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(READY) => {
                    debug!("arm schedule already built");
                    return false;
                }
                // Another caller is building. If it unwinds, the state drops
                // back to UNINIT and this caller takes over.
                Err(_) => {
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
            }
        }
        let guard = BuildGuard::new(&region.state);

        let num_arms = clamp_arms(num_arms);
        let num_queries = clamp_queries(num_queries);
        info!(num_arms, num_queries, "building arm schedule");

        let schedule = build_schedule(num_arms, num_queries);
        for (slot, arm) in region.schedule.iter().zip(&schedule) {
            slot.store(arm.index() as u32, Ordering::Relaxed);
        }
        for counter in &region.usage {
            counter.store(0, Ordering::Relaxed);
        }
        region.round.store(0, Ordering::Relaxed);
        region.num_arms.store(num_arms as u32, Ordering::Relaxed);
        region.len.store(num_queries as u32, Ordering::Relaxed);
        guard.publish();

        debug!(schedule = ?schedule.iter().map(|a| a.index()).collect::<Vec<_>>(), "arm schedule");
        true
    }

    /// Whether the schedule table has been built.
    pub fn is_initialized(&self) -> bool {
        self.region().state.load(Ordering::Acquire) == READY
    }

    /// Advance the round counter, returning the previous value.
    #[inline]
    pub fn next_round_index(&self) -> u32 {
        self.region().round.fetch_add(1, Ordering::Relaxed)
    }

    /// Current round counter value without advancing it.
    #[inline]
    pub fn round_index(&self) -> u32 {
        self.region().round.load(Ordering::Relaxed)
    }

    /// Number of times the greedy-balanced selector has chosen `arm`.
    #[inline]
    pub fn usage_count(&self, arm: ArmId) -> u32 {
        self.region()
            .usage
            .get(arm.index())
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record one more use of `arm`.
    #[inline]
    pub fn record_usage(&self, arm: ArmId) {
        match self.region().usage.get(arm.index()) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => warn!(%arm, "usage recorded for arm outside the table"),
        }
    }

    /// Racy per-arm usage read for the first `num_arms` arms.
    pub fn usage_snapshot(&self, num_arms: usize) -> Vec<u32> {
        ArmId::first(num_arms.min(MAX_ARMS))
            .map(|arm| self.usage_count(arm))
            .collect()
    }

    /// Number of arms the schedule was built for (0 before `init`).
    pub fn num_arms(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.region().num_arms.load(Ordering::Relaxed) as usize
    }

    /// Length of the schedule table (0 before `init`).
    pub fn schedule_len(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.region().len.load(Ordering::Relaxed) as usize
    }

    /// Arm scheduled for `round`, or `None` past the end of the table.
    pub fn scheduled_arm(&self, round: u32) -> Option<ArmId> {
        let round = round as usize;
        if round >= self.schedule_len() {
            return None;
        }
        let arm = self.region().schedule[round].load(Ordering::Relaxed);
        Some(ArmId::new(arm as usize))
    }

    /// Copy of the full schedule table.
    pub fn schedule(&self) -> Vec<ArmId> {
        (0..self.schedule_len() as u32)
            .filter_map(|round| self.scheduled_arm(round))
            .collect()
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerState")
            .field("initialized", &self.is_initialized())
            .field("round", &self.round_index())
            .field("schedule_len", &self.schedule_len())
            .finish()
    }
}

fn clamp_arms(num_arms: usize) -> usize {
    let clamped = num_arms.clamp(1, MAX_ARMS);
    if clamped != num_arms {
        warn!(num_arms, clamped, "arm count out of range, clamping");
    }
    clamped
}

fn clamp_queries(num_queries: usize) -> usize {
    let clamped = num_queries.clamp(1, MAX_QUERIES);
    if clamped != num_queries {
        warn!(num_queries, clamped, "queries per round out of range, clamping");
    }
    clamped
}

/// Held by the caller that owns a schedule build.
///
/// Dropped without [`publish`](Self::publish) (the builder unwound), it
/// returns the region to `UNINIT` so a waiting caller can build instead.
struct BuildGuard<'a> {
    state: &'a AtomicU32,
    published: bool,
}

impl<'a> BuildGuard<'a> {
    fn new(state: &'a AtomicU32) -> Self {
        Self {
            state,
            published: false,
        }
    }

    fn publish(mut self) {
        self.state.store(READY, Ordering::Release);
        self.published = true;
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            warn!("arm schedule build abandoned, releasing the region");
            self.state.store(UNINIT, Ordering::Release);
        }
    }
}

/// Build a round-robin schedule of `num_queries` slots over `num_arms` arms.
///
/// Every arm gets `num_queries / num_arms` slots, the remainder is filled
/// with random arms, and the whole table is shuffled. The generator is
/// seeded with [`SCHEDULE_SEED`], so equal inputs give equal tables.
pub fn build_schedule(num_arms: usize, num_queries: usize) -> Vec<ArmId> {
    let num_arms = num_arms.max(1);
    let mut rng = StdRng::seed_from_u64(SCHEDULE_SEED);

    let per_arm = num_queries / num_arms;
    let mut schedule = Vec::with_capacity(num_queries);
    for arm in ArmId::first(num_arms) {
        schedule.extend(std::iter::repeat(arm).take(per_arm));
    }
    while schedule.len() < num_queries {
        schedule.push(ArmId::new(rng.gen_range(0..num_arms)));
    }
    schedule.shuffle(&mut rng);
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counts(schedule: &[ArmId], num_arms: usize) -> Vec<usize> {
        let mut counts = vec![0; num_arms];
        for arm in schedule {
            counts[arm.index()] += 1;
        }
        counts
    }

    #[test]
    fn test_schedule_length_and_minimum_share() {
        for (arms, queries) in [(6, 500), (6, 200), (26, 500), (7, 13), (3, 1), (1, 10)] {
            let schedule = build_schedule(arms, queries);
            assert_eq!(schedule.len(), queries);
            for (arm, count) in counts(&schedule, arms).into_iter().enumerate() {
                assert!(
                    count >= queries / arms,
                    "arm {} appears {} times with {} arms / {} queries",
                    arm,
                    count,
                    arms,
                    queries
                );
            }
        }
    }

    #[test]
    fn test_schedule_is_deterministic() {
        assert_eq!(build_schedule(6, 500), build_schedule(6, 500));
        assert_eq!(build_schedule(5, 37), build_schedule(5, 37));
    }

    #[test]
    fn test_schedule_is_shuffled() {
        let schedule = build_schedule(2, 100);
        let sorted = {
            let mut s = schedule.clone();
            s.sort();
            s
        };
        assert_ne!(schedule, sorted);
    }

    #[test]
    fn test_init_builds_once() {
        let state = SchedulerState::new();
        assert!(!state.is_initialized());
        assert_eq!(state.schedule_len(), 0);

        assert!(state.init(6, 100));
        let first = state.schedule();
        assert_eq!(first.len(), 100);

        // A second init with different parameters observes the existing table.
        assert!(!state.init(3, 50));
        assert_eq!(state.schedule(), first);
        assert_eq!(state.num_arms(), 6);
    }

    #[test]
    fn test_abandoned_build_releases_region() {
        let state = SchedulerState::new();
        let region = state.region();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            region.state.store(BUILDING, Ordering::Relaxed);
            let _guard = BuildGuard::new(&region.state);
            panic!("schedule build failed");
        }));
        assert!(result.is_err());
        assert_eq!(region.state.load(Ordering::Acquire), UNINIT);

        assert!(state.init(3, 30));
        assert_eq!(state.schedule_len(), 30);
    }

    #[test]
    fn test_waiter_takes_over_abandoned_build() {
        let state = SchedulerState::new();
        let region = state.region();
        region.state.store(BUILDING, Ordering::Relaxed);

        std::thread::scope(|s| {
            let waiter = s.spawn(|| state.init(4, 40));
            let builder = s.spawn(|| {
                let _guard = BuildGuard::new(&region.state);
                std::thread::sleep(std::time::Duration::from_millis(20));
                panic!("schedule build failed");
            });
            assert!(builder.join().is_err());
            assert!(waiter.join().unwrap());
        });
        assert_eq!(state.schedule(), build_schedule(4, 40));
    }

    #[test]
    fn test_state_matches_pure_builder() {
        let state = SchedulerState::new();
        state.init(4, 120);
        assert_eq!(state.schedule(), build_schedule(4, 120));
    }

    #[test]
    fn test_init_clamps_queries() {
        let state = SchedulerState::new();
        state.init(6, 10_000);
        assert_eq!(state.schedule_len(), MAX_QUERIES);
    }

    #[test]
    fn test_concurrent_init_single_builder() {
        let state = Arc::new(SchedulerState::new());
        let builders = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let state = Arc::clone(&state);
                let builders = Arc::clone(&builders);
                s.spawn(move || {
                    if state.init(6, 500) {
                        builders.fetch_add(1, Ordering::Relaxed);
                    }
                    assert!(state.is_initialized());
                    assert_eq!(state.schedule_len(), 500);
                });
            }
        });

        assert_eq!(builders.load(Ordering::Relaxed), 1);
        assert_eq!(state.schedule(), build_schedule(6, 500));
    }

    #[test]
    fn test_round_counter_returns_previous() {
        let state = SchedulerState::new();
        state.init(3, 10);
        assert_eq!(state.next_round_index(), 0);
        assert_eq!(state.next_round_index(), 1);
        assert_eq!(state.round_index(), 2);
    }

    #[test]
    fn test_scheduled_arm_bounds() {
        let state = SchedulerState::new();
        assert_eq!(state.scheduled_arm(0), None);
        state.init(3, 10);
        assert!(state.scheduled_arm(9).is_some());
        assert_eq!(state.scheduled_arm(10), None);
    }

    #[test]
    fn test_usage_counters() {
        let state = SchedulerState::new();
        state.init(3, 10);
        let arm = ArmId::new(2);
        state.record_usage(arm);
        state.record_usage(arm);
        assert_eq!(state.usage_count(arm), 2);
        assert_eq!(state.usage_snapshot(3), vec![0, 0, 2]);

        // Out-of-table arms are ignored rather than panicking.
        state.record_usage(ArmId::new(MAX_ARMS + 4));
        assert_eq!(state.usage_count(ArmId::new(MAX_ARMS + 4)), 0);
    }

    #[test]
    fn test_concurrent_usage_sum() {
        let state = SchedulerState::new();
        state.init(4, 40);

        std::thread::scope(|s| {
            for t in 0..4 {
                let state = &state;
                s.spawn(move || {
                    for _ in 0..250 {
                        state.record_usage(ArmId::new(t));
                    }
                });
            }
        });

        let total: u32 = state.usage_snapshot(4).iter().sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_attach_static_region() {
        static REGION: ScheduleRegion = ScheduleRegion::new();

        let a = SchedulerState::attach(&REGION);
        let b = SchedulerState::attach(&REGION);
        assert!(a.init(5, 25));
        assert!(!b.init(5, 25));

        a.record_usage(ArmId::new(1));
        assert_eq!(b.usage_count(ArmId::new(1)), 1);
        assert_eq!(a.schedule(), b.schedule());
    }
}
