//! Parameter-server master for iterative-reduce training
//!
//! This crate provides the master side of the training loop:
//! - **Coordination**: buffering worker results and reducing full partitions
//! - **Model registry**: deterministic initial state per model variant
//! - **Broadcast**: publish/subscribe fan-out of work and global updates
//! - **Actor runtime**: a single-consumer mailbox driving the coordinator
//!
//! # Example
//!
//! ```ignore
//! use coordinator::{ChannelDataSource, MasterActor, MasterCoordinator, TokioBroadcast};
//!
//! let (source, signals) = ChannelDataSource::new();
//! let mut master = MasterCoordinator::new(Arc::new(broadcast), Box::new(source), shutdown);
//! master.setup(config)?;
//! let (handle, task) = MasterActor::spawn(master, 1024);
//! ```

pub mod accumulator;
pub mod actor;
pub mod broadcast;
pub mod data_source;
pub mod listener;
pub mod master;
pub mod message;
pub mod model;

// Re-export main types
pub use accumulator::{reduce, Accumulator};
pub use actor::{MasterActor, MasterEvent, MasterHandle};
pub use broadcast::{BroadcastChannel, BroadcastReceiver, TokioBroadcast};
pub use data_source::{ChannelDataSource, DataSource};
pub use listener::{EpochListener, SnapshotListener};
pub use master::{MasterCoordinator, MasterState, Outcome};
pub use message::{
    BroadcastPayload, DataSourceSignal, GlobalUpdate, MasterMessage, NextBatchTrigger,
    SubscribeAck,
};
pub use model::{ModelFactory, ModelRegistry};
