//! Global state persistence for the parameter-server master
//!
//! Provides the byte format used by `Complete`, atomic state files, and a
//! background manager that keeps the newest per-epoch snapshots.

pub mod manager;
pub mod writer;

pub use manager::{
    SnapshotManager, SnapshotManagerConfig, SnapshotManagerHandle, SnapshotMetadata,
};
pub use writer::{
    encode_state, read_state, read_state_file, write_state, write_state_file, STATE_MAGIC,
    STATE_VERSION,
};
