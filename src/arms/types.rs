//! Core types for arm scheduling.
//!
//! - `ArmId`: Identifies one technique profile
//! - `ArmChoice`: An arm, or the host's currently active switches
//! - `TechniqueSet`: The six optimizer technique switches

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of arms any configuration may consider.
pub const MAX_ARMS: usize = 26;

/// Identifies an arm (one technique profile) by its position in the profile table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArmId(usize);

impl ArmId {
    /// The host default arm: every technique enabled.
    pub const DEFAULT: ArmId = ArmId(0);

    /// Create an arm id. Ids at or above [`MAX_ARMS`] are representable but
    /// never have a profile.
    pub const fn new(id: usize) -> Self {
        ArmId(id)
    }

    /// Position of this arm in per-arm tables.
    pub const fn index(self) -> usize {
        self.0
    }

    /// Iterate the first `num_arms` arm ids in increasing order.
    pub fn first(num_arms: usize) -> impl Iterator<Item = ArmId> {
        (0..num_arms).map(ArmId)
    }
}

impl fmt::Display for ArmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which switch configuration a candidate plan is generated under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArmChoice {
    /// Use whatever switches are currently active; no arm search.
    HostDefault,
    /// Apply the technique profile of the given arm.
    Arm(ArmId),
}

impl ArmChoice {
    /// The arm id, if this is not the host default.
    pub fn arm(self) -> Option<ArmId> {
        match self {
            ArmChoice::HostDefault => None,
            ArmChoice::Arm(arm) => Some(arm),
        }
    }
}

impl fmt::Display for ArmChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmChoice::HostDefault => f.write_str("host default"),
            ArmChoice::Arm(arm) => write!(f, "arm {}", arm),
        }
    }
}

/// The six optimizer technique switches an arm toggles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TechniqueSet {
    pub hash_join: bool,
    pub merge_join: bool,
    pub nested_loop: bool,
    pub seq_scan: bool,
    pub index_scan: bool,
    pub index_only_scan: bool,
}

const HASH_JOIN: u8 = 1 << 0;
const MERGE_JOIN: u8 = 1 << 1;
const NESTED_LOOP: u8 = 1 << 2;
const SEQ_SCAN: u8 = 1 << 3;
const INDEX_SCAN: u8 = 1 << 4;
const INDEX_ONLY_SCAN: u8 = 1 << 5;

impl TechniqueSet {
    /// Every technique enabled (the host's own default).
    pub const ALL: TechniqueSet = TechniqueSet::from_bits(0b11_1111);

    /// Every technique disabled.
    pub const NONE: TechniqueSet = TechniqueSet::from_bits(0);

    /// Decode a switch bitmask. Bits above the six known switches are ignored.
    pub const fn from_bits(bits: u8) -> Self {
        TechniqueSet {
            hash_join: bits & HASH_JOIN != 0,
            merge_join: bits & MERGE_JOIN != 0,
            nested_loop: bits & NESTED_LOOP != 0,
            seq_scan: bits & SEQ_SCAN != 0,
            index_scan: bits & INDEX_SCAN != 0,
            index_only_scan: bits & INDEX_ONLY_SCAN != 0,
        }
    }

    /// Encode as a switch bitmask.
    pub const fn bits(self) -> u8 {
        let mut bits = 0;
        if self.hash_join {
            bits |= HASH_JOIN;
        }
        if self.merge_join {
            bits |= MERGE_JOIN;
        }
        if self.nested_loop {
            bits |= NESTED_LOOP;
        }
        if self.seq_scan {
            bits |= SEQ_SCAN;
        }
        if self.index_scan {
            bits |= INDEX_SCAN;
        }
        if self.index_only_scan {
            bits |= INDEX_ONLY_SCAN;
        }
        bits
    }

    /// Switch names paired with their state, in hint order.
    pub fn switches(self) -> [(&'static str, bool); 6] {
        [
            ("enable_nestloop", self.nested_loop),
            ("enable_hashjoin", self.hash_join),
            ("enable_mergejoin", self.merge_join),
            ("enable_seqscan", self.seq_scan),
            ("enable_indexscan", self.index_scan),
            ("enable_indexonlyscan", self.index_only_scan),
        ]
    }
}

impl Default for TechniqueSet {
    fn default() -> Self {
        TechniqueSet::ALL
    }
}
