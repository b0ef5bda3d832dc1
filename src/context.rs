//! Per-query request contexts.
//!
//! A [`RequestContext`] carries the serialized artifacts of a planned query
//! (plan, feature blobs, chosen arm) from plan time to whichever consumer
//! runs first: the explain formatter or the execution-end reward reporter.
//! The plan only carries an opaque [`ContextHandle`]; the context itself lives
//! in a [`ContextRegistry`] and can be taken exactly once.
//!
//! The registry is bounded. Queries that are planned but never finish
//! (errors, abandoned cursors, prepared statements never run) would
//! otherwise leave their contexts behind; once the registry is full the
//! oldest context is evicted and a later take reports
//! [`OntoError::ContextEvicted`].
//!
//! # Example
//!
//! ```ignore
//! let registry = ContextRegistry::new();
//! let handle = registry.create(context);
//!
//! let ctx = registry.take_once(handle)?;          // first consumer
//! assert!(registry.take_once(handle).is_err());    // ContextConsumed
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU64;

use parking_lot::Mutex;
use prometheus::IntCounter;
use tracing::{debug, error, warn};

use crate::arms::{ArmChoice, ArmConfig};
use crate::error::{OntoError, Result};

/// Opaque handle to a registered [`RequestContext`].
///
/// Fits in a plan's 64-bit identity slot via [`into_raw`](Self::into_raw).
/// Handles order by issue time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContextHandle(NonZeroU64);

impl ContextHandle {
    /// Rebuild a handle from its raw slot value. Zero is never a handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ContextHandle)
    }

    /// Raw value to store in the plan.
    pub fn into_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Serialized artifacts of one planned query.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestContext {
    /// Arm the executed plan was generated under.
    pub arm: ArmChoice,
    /// `{"Plan": ...}` JSON of the executed plan.
    pub plan_json: String,
    /// Opaque buffer-state blob.
    pub buffer_state: String,
    /// Metadata blob, already enriched with the sequence id and arm config.
    pub metadata: String,
    /// Arm-config JSON, `None` when no arm was recorded.
    pub arm_config: Option<String>,
}

impl RequestContext {
    /// Arm config to report, substituting the host default when none was
    /// recorded.
    pub fn arm_config_or_default(&self) -> Result<String> {
        match &self.arm_config {
            Some(config) => Ok(config.clone()),
            None => ArmConfig::host_default().to_json(),
        }
    }
}

/// Default number of live contexts a registry holds.
pub const DEFAULT_MAX_CONTEXTS: usize = 10_000;

struct RegistryInner {
    contexts: BTreeMap<ContextHandle, RequestContext>,
    /// Recently evicted handles, at most `capacity` of them.
    evicted: BTreeSet<ContextHandle>,
    next_id: u64,
}

/// Handle-to-context map with take-once semantics and a capacity bound.
pub struct ContextRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
    evictions: Option<IntCounter>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CONTEXTS)
    }

    /// Registry holding at most `capacity` live contexts (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                contexts: BTreeMap::new(),
                evicted: BTreeSet::new(),
                next_id: 1,
            }),
            capacity: capacity.max(1),
            evictions: None,
        }
    }

    /// Count evictions on `counter`.
    pub fn with_eviction_counter(mut self, counter: IntCounter) -> Self {
        self.evictions = Some(counter);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a context and return its handle.
    ///
    /// When the registry is full the oldest live context is evicted first.
    pub fn create(&self, context: RequestContext) -> ContextHandle {
        let mut inner = self.inner.lock();
        while inner.contexts.len() >= self.capacity {
            let Some((oldest, _)) = inner.contexts.pop_first() else {
                break;
            };
            warn!(handle = %oldest, capacity = self.capacity, "evicting unconsumed request context");
            if let Some(counter) = &self.evictions {
                counter.inc();
            }
            inner.evicted.insert(oldest);
            if inner.evicted.len() > self.capacity {
                inner.evicted.pop_first();
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        // next_id starts at 1 and only grows.
        let handle = ContextHandle(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN));
        inner.contexts.insert(handle, context);
        debug!(%handle, live = inner.contexts.len(), "request context created");
        handle
    }

    /// Remove and return the context for `handle`.
    ///
    /// A handle that was issued but already taken yields
    /// [`OntoError::ContextConsumed`]; one evicted before anyone took it
    /// yields [`OntoError::ContextEvicted`]; one never issued yields
    /// [`OntoError::UnknownContext`].
    pub fn take_once(&self, handle: ContextHandle) -> Result<RequestContext> {
        let mut inner = self.inner.lock();
        if let Some(context) = inner.contexts.remove(&handle) {
            debug!(%handle, "request context taken");
            return Ok(context);
        }
        if inner.evicted.remove(&handle) {
            warn!(%handle, "request context was evicted before it was taken");
            return Err(OntoError::ContextEvicted(handle));
        }
        if handle.into_raw() < inner.next_id {
            error!(%handle, "request context consumed twice");
            Err(OntoError::ContextConsumed(handle))
        } else {
            Err(OntoError::UnknownContext(handle))
        }
    }

    /// Drop a context without consuming it. Returns whether it was live.
    pub fn discard(&self, handle: ContextHandle) -> bool {
        self.inner.lock().contexts.remove(&handle).is_some()
    }

    /// Number of contexts not yet taken.
    pub fn len(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ContextRegistry")
            .field("live", &inner.contexts.len())
            .field("capacity", &self.capacity)
            .field("next_id", &inner.next_id)
            .finish()
    }
}
