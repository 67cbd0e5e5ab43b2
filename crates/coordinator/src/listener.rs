//! Epoch completion listeners

use checkpoint::SnapshotManagerHandle;
use runtime_core::GlobalState;
use tracing::warn;

/// Callback invoked synchronously once per reduction with the new state
pub trait EpochListener: Send {
    fn on_epoch_complete(&mut self, state: &GlobalState);
}

impl<F> EpochListener for F
where
    F: FnMut(&GlobalState) + Send,
{
    fn on_epoch_complete(&mut self, state: &GlobalState) {
        self(state)
    }
}

/// Listener that queues every new state for an on-disk snapshot
pub struct SnapshotListener {
    manager: SnapshotManagerHandle,
}

impl SnapshotListener {
    pub fn new(manager: SnapshotManagerHandle) -> Self {
        Self { manager }
    }
}

impl EpochListener for SnapshotListener {
    fn on_epoch_complete(&mut self, state: &GlobalState) {
        // The writer runs on its own task; a full queue only skips this epoch
        if let Err(e) = self.manager.submit(state.clone()) {
            warn!(epoch = state.epoch(), error = %e, "Epoch snapshot skipped");
        }
    }
}
