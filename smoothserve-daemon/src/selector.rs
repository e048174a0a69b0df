//! Round-robin instance selection.
//!
//! The cursor advances past every slot it examines, including skipped
//! ones, so an instance that stays unhealthy does not keep steering
//! traffic onto its right-hand neighbour.

use crate::state::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no instances")]
    NoInstance,
    #[error("no eligible instance")]
    Unavailable,
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next slot index that should be tried
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Pick the slot of the next eligible instance, scanning at most one
    /// full lap from the cursor.
    pub fn select(&mut self, instances: &[Instance]) -> Result<usize, SelectError> {
        let count = instances.len();
        if count == 0 {
            return Err(SelectError::NoInstance);
        }

        self.cursor %= count;
        for _ in 0..count {
            let slot = self.cursor;
            self.cursor = (self.cursor + 1) % count;
            if instances[slot].is_eligible() {
                return Ok(slot);
            }
        }

        Err(SelectError::Unavailable)
    }
}
