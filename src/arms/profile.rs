//! The static arm profile table.
//!
//! Each arm is a fixed combination of optimizer technique switches. The table
//! is configuration data: arm 0 is the host default (everything enabled),
//! arms 1-5 are the curated top-5 restricted sets, and arms 7-25 are further
//! curated combinations. Arm 6 has no profile; selecting it fails with
//! [`OntoError::UnknownArm`] and the selector excludes it from candidacy.

use serde::{Deserialize, Serialize};

use super::types::{ArmId, TechniqueSet, MAX_ARMS};
use crate::error::{OntoError, Result};

const fn t(
    hash_join: bool,
    merge_join: bool,
    nested_loop: bool,
    seq_scan: bool,
    index_scan: bool,
    index_only_scan: bool,
) -> Option<TechniqueSet> {
    Some(TechniqueSet {
        hash_join,
        merge_join,
        nested_loop,
        seq_scan,
        index_scan,
        index_only_scan,
    })
}

const X: bool = true;
const O: bool = false;

#[rustfmt::skip]
static PROFILES: [Option<TechniqueSet>; MAX_ARMS] = [
    //   hash merge nest  seq  index index-only
    t(X,   X,   X,   X,   X,   X), // 0: host default
    t(X,   X,   O,   X,   X,   X), // 1
    t(X,   O,   X,   X,   O,   X), // 2
    t(X,   O,   O,   X,   O,   X), // 3
    t(O,   X,   X,   X,   X,   X), // 4
    t(X,   O,   X,   X,   X,   X), // 5
    None,                            // 6
    t(O,   X,   X,   O,   O,   X), // 7
    t(X,   O,   O,   O,   O,   X), // 8
    t(X,   O,   X,   O,   X,   X), // 9
    t(X,   O,   O,   X,   X,   X), // 10
    t(X,   X,   X,   X,   O,   X), // 11
    t(X,   X,   O,   X,   O,   X), // 12
    t(X,   O,   X,   O,   X,   O), // 13
    t(O,   O,   X,   O,   X,   O), // 14
    t(O,   X,   X,   X,   X,   O), // 15
    t(O,   O,   X,   O,   X,   X), // 16
    t(X,   X,   X,   O,   X,   X), // 17
    t(O,   X,   X,   O,   X,   O), // 18
    t(O,   X,   X,   X,   O,   X), // 19
    t(O,   O,   X,   X,   X,   X), // 20
    t(X,   X,   O,   O,   X,   X), // 21
    t(X,   X,   O,   O,   O,   X), // 22
    t(X,   O,   X,   X,   X,   O), // 23
    t(X,   O,   O,   O,   X,   O), // 24
    t(X,   O,   X,   O,   O,   X), // 25
];

/// One arm: an id and the technique switches it applies.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArmProfile {
    pub id: ArmId,
    pub techniques: TechniqueSet,
}

impl ArmProfile {
    /// Look up the profile for an arm, if the table defines one.
    pub fn lookup(id: ArmId) -> Option<ArmProfile> {
        PROFILES
            .get(id.index())
            .copied()
            .flatten()
            .map(|techniques| ArmProfile { id, techniques })
    }

    /// Look up the profile for an arm, failing with `UnknownArm` if undefined.
    pub fn get(id: ArmId) -> Result<ArmProfile> {
        Self::lookup(id).ok_or(OntoError::UnknownArm(id))
    }

    /// The arm-config object sent to the learning service for this arm.
    pub fn config(&self) -> ArmConfig {
        ArmConfig::new(self.id, self.techniques)
    }

    /// SQL statements that make the host optimizer behave like this arm.
    ///
    /// Returns `None` when the arm disables nothing.
    pub fn hint(&self) -> Option<String> {
        let hint: String = self
            .techniques
            .switches()
            .iter()
            .filter(|(_, enabled)| !enabled)
            .map(|(name, _)| format!("SET {} TO off; ", name))
            .collect();
        if hint.is_empty() {
            None
        } else {
            Some(hint)
        }
    }
}

/// Arm configuration as it appears on the wire.
///
/// Field order is part of the wire format.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ArmConfig {
    pub enable_hashjoin: bool,
    pub enable_mergejoin: bool,
    pub enable_nestloop: bool,
    pub enable_indexscan: bool,
    pub enable_seqscan: bool,
    pub enable_indexonlyscan: bool,
    pub index: usize,
}

impl ArmConfig {
    /// Build the wire config for an arm id and switch set.
    pub fn new(id: ArmId, techniques: TechniqueSet) -> Self {
        Self {
            enable_hashjoin: techniques.hash_join,
            enable_mergejoin: techniques.merge_join,
            enable_nestloop: techniques.nested_loop,
            enable_indexscan: techniques.index_scan,
            enable_seqscan: techniques.seq_scan,
            enable_indexonlyscan: techniques.index_only_scan,
            index: id.index(),
        }
    }

    /// The configuration reported when no arm was recorded for a query.
    pub fn host_default() -> Self {
        Self::new(ArmId::DEFAULT, TechniqueSet::ALL)
    }

    /// Serialize to the JSON object sent in protocol frames.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
