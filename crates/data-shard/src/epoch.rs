//! Epoch tracking for the master
//!
//! Counts completed reductions and compares them against the configured
//! number of passes.

use runtime_core::Epoch;
use serde::{Deserialize, Serialize};

/// Monotonic counter of completed reductions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochCounter {
    /// Reductions completed so far
    current: Epoch,

    /// Reductions after which training is done
    total: Epoch,
}

impl EpochCounter {
    /// Create a counter at epoch 0
    pub fn new(total: Epoch) -> Self {
        Self { current: 0, total }
    }

    /// Completed epochs
    pub fn current(&self) -> Epoch {
        self.current
    }

    /// Configured number of passes
    pub fn total(&self) -> Epoch {
        self.total
    }

    /// Advance to the next epoch
    /// Returns the new epoch number
    pub fn advance(&mut self) -> Epoch {
        self.current += 1;
        tracing::info!(epoch = self.current, total = self.total, "Advanced epoch");
        self.current
    }

    /// Whether the configured number of passes has been reached
    pub fn is_complete(&self) -> bool {
        self.current == self.total
    }

    /// Epochs still to run
    pub fn remaining(&self) -> Epoch {
        self.total.saturating_sub(self.current)
    }
}

/// Serializable state for the epoch counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochCounterState {
    /// Completed epochs
    pub current: Epoch,

    /// Configured number of passes
    pub total: Epoch,
}

impl From<&EpochCounter> for EpochCounterState {
    fn from(counter: &EpochCounter) -> Self {
        Self {
            current: counter.current,
            total: counter.total,
        }
    }
}

impl From<EpochCounterState> for EpochCounter {
    fn from(state: EpochCounterState) -> Self {
        Self {
            current: state.current,
            total: state.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_progression() {
        let mut counter = EpochCounter::new(3);
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.total(), 3);
        assert!(!counter.is_complete());

        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.remaining(), 1);
        assert!(!counter.is_complete());

        assert_eq!(counter.advance(), 3);
        assert!(counter.is_complete());
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn test_state_serialization() {
        let mut counter = EpochCounter::new(10);
        counter.advance();
        counter.advance();

        let state = EpochCounterState::from(&counter);
        let json = serde_json::to_string(&state).unwrap();
        let restored_state: EpochCounterState = serde_json::from_str(&json).unwrap();
        let restored = EpochCounter::from(restored_state);

        assert_eq!(restored, counter);
        assert_eq!(restored.current(), 2);
    }
}
