//! Snapshot manager for per-epoch global state files

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use runtime_core::{Epoch, Error, GlobalState, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::writer::write_state_file;

/// Snapshot manager configuration
#[derive(Debug, Clone)]
pub struct SnapshotManagerConfig {
    /// Directory snapshots are written to
    pub base_path: PathBuf,

    /// Number of snapshots to keep
    pub keep_count: usize,

    /// Maximum snapshots queued for writing
    pub queue_capacity: usize,
}

impl Default for SnapshotManagerConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./snapshots"),
            keep_count: 5,
            queue_capacity: 16,
        }
    }
}

/// A snapshot that has been written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    /// Epoch of the snapshot
    pub epoch: Epoch,

    /// File path
    pub path: PathBuf,

    /// File size in bytes
    pub size_bytes: u64,

    /// When the write completed
    pub created_at: DateTime<Utc>,
}

/// Writes epoch snapshots in the background and keeps the newest few
pub struct SnapshotManager {
    /// Configuration
    config: SnapshotManagerConfig,

    /// Written snapshots indexed by epoch
    snapshots: Arc<RwLock<BTreeMap<Epoch, SnapshotMetadata>>>,

    /// Channel to the writer task
    write_tx: mpsc::Sender<GlobalState>,

    /// Writer task handle
    _task: tokio::task::JoinHandle<()>,
}

impl SnapshotManager {
    /// Create a new snapshot manager and start its writer task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(config: SnapshotManagerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.base_path).await?;

        let snapshots = Arc::new(RwLock::new(BTreeMap::new()));
        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity.max(1));

        let task = tokio::spawn(Self::writer_loop(
            write_rx,
            snapshots.clone(),
            config.base_path.clone(),
            config.keep_count,
        ));

        Ok(Self {
            config,
            snapshots,
            write_tx,
            _task: task,
        })
    }

    /// Queue a snapshot for writing (non-blocking)
    pub fn submit(&self, state: GlobalState) -> Result<()> {
        let epoch = state.epoch();
        self.write_tx.try_send(state).map_err(|e| {
            warn!(epoch = epoch, error = %e, "Snapshot not queued");
            Error::ChannelClosed {
                channel: format!("snapshot write channel: {}", e),
            }
        })?;

        debug!(epoch = epoch, "Queued snapshot for async write");
        Ok(())
    }

    /// Path a snapshot for the given epoch is written to
    pub fn path_for(&self, epoch: Epoch) -> PathBuf {
        snapshot_path(&self.config.base_path, epoch)
    }

    /// Get the latest written snapshot
    pub fn latest(&self) -> Option<SnapshotMetadata> {
        self.snapshots.read().values().last().cloned()
    }

    /// Get all retained snapshots, oldest first
    pub fn all_snapshots(&self) -> Vec<SnapshotMetadata> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Wait until the snapshot for exactly `epoch` is retained
    ///
    /// A snapshot that was pruned before the call is never seen and the
    /// wait times out.
    pub async fn wait_for(&self, epoch: Epoch, timeout: Duration) -> Result<SnapshotMetadata> {
        let poll = async {
            loop {
                let written = self.snapshots.read().get(&epoch).cloned();

                if let Some(meta) = written {
                    return meta;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::ChannelClosed {
                channel: format!("snapshot for epoch {} not written in time", epoch),
            })
    }

    /// Main writer loop
    async fn writer_loop(
        mut rx: mpsc::Receiver<GlobalState>,
        snapshots: Arc<RwLock<BTreeMap<Epoch, SnapshotMetadata>>>,
        base_path: PathBuf,
        keep_count: usize,
    ) {
        info!(path = %base_path.display(), "Snapshot writer started");

        while let Some(state) = rx.recv().await {
            let epoch = state.epoch();
            let path = snapshot_path(&base_path, epoch);

            match write_state_file(&path, &state).await {
                Ok(size_bytes) => {
                    let metadata = SnapshotMetadata {
                        epoch,
                        path,
                        size_bytes,
                        created_at: Utc::now(),
                    };
                    let stale = {
                        let mut index = snapshots.write();
                        index.insert(epoch, metadata);
                        Self::prune(&mut index, keep_count)
                    };
                    info!(epoch = epoch, size_bytes = size_bytes, "Snapshot written");

                    for stale in stale {
                        match tokio::fs::remove_file(&stale.path).await {
                            Ok(()) => debug!(path = %stale.path.display(), "Deleted old snapshot"),
                            Err(e) => {
                                warn!(path = %stale.path.display(), error = %e, "Failed to delete old snapshot")
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(epoch = epoch, error = %e, "Failed to write snapshot");
                }
            }
        }

        info!("Snapshot writer stopped");
    }

    /// Drop index entries beyond keep_count, returning them for deletion
    fn prune(
        snapshots: &mut BTreeMap<Epoch, SnapshotMetadata>,
        keep_count: usize,
    ) -> Vec<SnapshotMetadata> {
        let mut stale = Vec::new();

        while snapshots.len() > keep_count {
            match snapshots.pop_first() {
                Some((_, meta)) => stale.push(meta),
                None => break,
            }
        }

        stale
    }
}

fn snapshot_path(base_path: &std::path::Path, epoch: Epoch) -> PathBuf {
    base_path.join(format!("epoch-{:06}.state", epoch))
}

/// Thread-safe handle to snapshot manager
pub type SnapshotManagerHandle = Arc<SnapshotManager>;
