//! Scoped access to the host optimizer's technique switches.
//!
//! The host keeps one set of technique switches per session and its optimizer
//! reads them implicitly. Candidate generation must change them for the
//! duration of one optimizer call and put them back afterwards, including
//! when the optimizer fails or panics. [`SwitchGuard`] owns that
//! save/apply/restore cycle.

use std::sync::atomic::{AtomicU8, Ordering};

use super::types::TechniqueSet;

/// Read and write access to a session's technique switches.
pub trait SwitchBoard {
    /// The switches currently in effect.
    fn current(&self) -> TechniqueSet;

    /// Replace the switches in effect.
    fn apply(&self, techniques: TechniqueSet);
}

impl<T: SwitchBoard + ?Sized> SwitchBoard for &T {
    fn current(&self) -> TechniqueSet {
        (**self).current()
    }

    fn apply(&self, techniques: TechniqueSet) {
        (**self).apply(techniques)
    }
}

impl<T: SwitchBoard + ?Sized> SwitchBoard for std::sync::Arc<T> {
    fn current(&self) -> TechniqueSet {
        (**self).current()
    }

    fn apply(&self, techniques: TechniqueSet) {
        (**self).apply(techniques)
    }
}

/// Lock-free switch board backed by a single atomic bitmask.
///
/// Suitable as the per-session board for hosts that do not keep their own.
#[derive(Debug)]
pub struct AtomicSwitchBoard {
    bits: AtomicU8,
}

impl AtomicSwitchBoard {
    /// Create a board with the given switches in effect.
    pub fn new(techniques: TechniqueSet) -> Self {
        Self {
            bits: AtomicU8::new(techniques.bits()),
        }
    }
}

impl Default for AtomicSwitchBoard {
    fn default() -> Self {
        Self::new(TechniqueSet::ALL)
    }
}

impl SwitchBoard for AtomicSwitchBoard {
    fn current(&self) -> TechniqueSet {
        TechniqueSet::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn apply(&self, techniques: TechniqueSet) {
        self.bits.store(techniques.bits(), Ordering::Relaxed);
    }
}

/// Applies a technique set for its lifetime and restores the previous
/// switches on drop.
///
/// Panic-safe: the snapshot is restored during unwinding too.
#[must_use = "switches are restored as soon as the guard is dropped"]
pub struct SwitchGuard<'a, S: SwitchBoard + ?Sized> {
    board: &'a S,
    saved: TechniqueSet,
}

impl<'a, S: SwitchBoard + ?Sized> SwitchGuard<'a, S> {
    /// Snapshot the current switches and apply `techniques`.
    pub fn apply(board: &'a S, techniques: TechniqueSet) -> Self {
        let saved = board.current();
        board.apply(techniques);
        Self { board, saved }
    }

    /// The switches that will be restored.
    pub fn saved(&self) -> TechniqueSet {
        self.saved
    }
}

impl<S: SwitchBoard + ?Sized> Drop for SwitchGuard<'_, S> {
    fn drop(&mut self) {
        self.board.apply(self.saved);
    }
}
