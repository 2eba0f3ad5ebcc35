/// Increasing Clock for Awareness Conflict Resolution
///
/// Awareness uses a simple monotonically increasing clock per client rather
/// than vector clocks. A peer accepts an entry only when its clock is newer
/// than the one it already holds for that client.
use std::cell::Cell;

/// Single-threaded increasing clock
#[derive(Debug, Default, Clone)]
pub struct IncreasingClock {
    value: Cell<u64>,
}

impl IncreasingClock {
    /// Create a new clock starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value
    pub fn increment(&self) -> u64 {
        let next = self.value.get() + 1;
        self.value.set(next);
        next
    }

    /// Get current value without incrementing
    pub fn get(&self) -> u64 {
        self.value.get()
    }

    /// Update to max of current and provided value
    pub fn update_to_max(&self, other: u64) {
        if other > self.value.get() {
            self.value.set(other);
        }
    }
}
