//! Runtime Core - Foundation for the parameter-server master
//!
//! Provides the shared data model (global state, worker results, work units),
//! error handling, configuration and the process-wide shutdown capability
//! used by the coordinator crates.

pub mod config;
pub mod error;
pub mod runtime;
pub mod types;

pub use config::{ChannelConfig, MasterConfig};
pub use error::{Error, Result};
pub use runtime::{ShutdownHandle, ShutdownReceiver};
pub use types::*;
