//! Instruction budget.

use crate::error::{Limit, VmError};

/// Counts dispatched instructions and calls against a ceiling.
///
/// Reset at the start of every top-level invocation. Re-entrant calls made
/// from natives share the counter of the invocation that made them.
#[derive(Clone, Copy, Debug)]
pub struct Governor {
    used: u64,
    max: u64,
}

impl Governor {
    pub fn new(max: u64) -> Self {
        Governor { used: 0, max }
    }

    /// Count one step; fails once the count passes the ceiling.
    #[inline]
    pub fn check_budget(&mut self) -> Result<(), VmError> {
        self.charge(1)
    }

    /// Count `steps` at once, for builtins whose work grows with their input.
    pub fn charge(&mut self, steps: u64) -> Result<(), VmError> {
        self.used = self.used.saturating_add(steps);
        if self.used > self.max {
            tracing::warn!(max = self.max, "instruction budget exhausted");
            return Err(VmError::LimitsExceeded(Limit::Instructions(self.max)));
        }
        Ok(())
    }

    pub fn reset(&mut self, max: u64) {
        self.used = 0;
        self.max = max;
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}
