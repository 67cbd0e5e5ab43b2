//! Data source collaborator seen from the master

use runtime_core::{Error, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{DataSourceSignal, NextBatchTrigger};

/// Where the master sends reset and next-batch requests
pub trait DataSource: Send {
    /// Rewind the dataset for the next pass
    fn reset(&mut self) -> Result<()>;

    /// Ask for the next batch
    fn next_batch(&mut self, trigger: NextBatchTrigger) -> Result<()>;
}

/// Data source proxy that forwards signals over an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelDataSource {
    tx: mpsc::UnboundedSender<DataSourceSignal>,
}

impl ChannelDataSource {
    /// Create the proxy and the receiving end the real data source drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DataSourceSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, signal: DataSourceSignal) -> Result<()> {
        debug!(signal = ?signal, "Signalling data source");
        self.tx.send(signal).map_err(|_| Error::ChannelClosed {
            channel: "data source".to_string(),
        })
    }
}

impl DataSource for ChannelDataSource {
    fn reset(&mut self) -> Result<()> {
        self.send(DataSourceSignal::Reset)
    }

    fn next_batch(&mut self, trigger: NextBatchTrigger) -> Result<()> {
        self.send(DataSourceSignal::NextBatch(trigger))
    }
}
