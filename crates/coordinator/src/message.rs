//! Messages understood by the master and its collaborators

use std::fmt;

use runtime_core::{Epoch, GlobalState, RawBatch, Topic, WorkUnit, WorkerId, WorkerResult};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::listener::EpochListener;

/// Acknowledgement that a subscriber joined a broadcast topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeAck {
    /// Who subscribed
    pub subscriber: String,

    /// Topic subscribed to
    pub topic: Topic,
}

/// Request to re-publish a global state to every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalUpdate {
    pub state: GlobalState,
}

/// Request for the next batch, sent once per reduction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextBatchTrigger {
    /// Epoch reached by the reduction that sent the trigger
    pub epoch: Epoch,

    /// Worker whose result completed the partition
    pub triggered_by: WorkerId,
}

/// Signals the master sends to the data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceSignal {
    /// Rewind the dataset
    Reset,

    /// Produce the next batch
    NextBatch(NextBatchTrigger),
}

/// Payloads carried on the broadcast topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BroadcastPayload {
    /// Units of work for the workers
    WorkUnits(Vec<WorkUnit>),

    /// A global state, re-published verbatim
    GlobalUpdate(GlobalUpdate),
}

impl BroadcastPayload {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastPayload::WorkUnits(_) => "work_units",
            BroadcastPayload::GlobalUpdate(_) => "global_update",
        }
    }
}

/// Everything the master mailbox accepts
pub enum MasterMessage {
    /// A subscription was acknowledged
    SubscribeAck(SubscribeAck),

    /// Replace the epoch completion listener
    RegisterListener(Box<dyn EpochListener>),

    /// A worker finished its unit of work
    WorkerResult(WorkerResult),

    /// Re-publish a global state to the workers
    GlobalUpdate(GlobalUpdate),

    /// New data from the data source
    RawBatch(RawBatch),

    /// A message from the transport the master does not understand
    Unrecognized(String),

    /// Reply with the current global state
    Snapshot(oneshot::Sender<Option<GlobalState>>),
}

impl MasterMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            MasterMessage::SubscribeAck(_) => "subscribe_ack",
            MasterMessage::RegisterListener(_) => "register_listener",
            MasterMessage::WorkerResult(_) => "worker_result",
            MasterMessage::GlobalUpdate(_) => "global_update",
            MasterMessage::RawBatch(_) => "raw_batch",
            MasterMessage::Unrecognized(_) => "unrecognized",
            MasterMessage::Snapshot(_) => "snapshot",
        }
    }
}

impl fmt::Debug for MasterMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterMessage::SubscribeAck(ack) => f.debug_tuple("SubscribeAck").field(ack).finish(),
            MasterMessage::RegisterListener(_) => f.write_str("RegisterListener(..)"),
            MasterMessage::WorkerResult(result) => f
                .debug_struct("WorkerResult")
                .field("worker_id", &result.worker_id())
                .field("dim", &result.payload().len())
                .finish(),
            MasterMessage::GlobalUpdate(update) => f
                .debug_struct("GlobalUpdate")
                .field("epoch", &update.state.epoch())
                .finish(),
            MasterMessage::RawBatch(batch) => f
                .debug_struct("RawBatch")
                .field("len", &batch.len())
                .finish(),
            MasterMessage::Unrecognized(description) => {
                f.debug_tuple("Unrecognized").field(description).finish()
            }
            MasterMessage::Snapshot(_) => f.write_str("Snapshot(..)"),
        }
    }
}

impl From<WorkerResult> for MasterMessage {
    fn from(result: WorkerResult) -> Self {
        MasterMessage::WorkerResult(result)
    }
}

impl From<RawBatch> for MasterMessage {
    fn from(batch: RawBatch) -> Self {
        MasterMessage::RawBatch(batch)
    }
}

impl From<SubscribeAck> for MasterMessage {
    fn from(ack: SubscribeAck) -> Self {
        MasterMessage::SubscribeAck(ack)
    }
}

impl From<GlobalUpdate> for MasterMessage {
    fn from(update: GlobalUpdate) -> Self {
        MasterMessage::GlobalUpdate(update)
    }
}
