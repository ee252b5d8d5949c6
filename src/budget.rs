//! Iteration budget tracking.

use std::sync::atomic::{AtomicU32, Ordering};

/// Counts agent invocations against a hard maximum.
///
/// `try_consume` never lets the count exceed the configured maximum, even
/// under concurrent calls. A maximum of 0 means no invocations are permitted
/// at all, not "unlimited".
#[derive(Debug)]
pub struct IterationBudget {
    max: u32,
    used: AtomicU32,
}

impl IterationBudget {
    /// Creates a budget allowing up to `max` invocations.
    pub fn new(max: u32) -> Self {
        Self {
            max,
            used: AtomicU32::new(0),
        }
    }

    /// Consumes one budget unit if any remain.
    ///
    /// Returns true and increments the count when under budget, false
    /// otherwise.
    pub fn try_consume(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.max).then_some(used + 1)
            })
            .is_ok()
    }

    /// Returns the number of units consumed so far.
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    /// Returns the number of units still available.
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used())
    }

    /// Returns the configured maximum.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Resets the count for a phase transition.
    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }
}
