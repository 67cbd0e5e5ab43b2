//! Master coordinator state machine
//!
//! Buffers worker results until a partition is full, reduces them into a new
//! global state and drives the data source and epoch accounting. Every
//! handler runs to completion; the coordinator is owned by a single task and
//! needs no internal locking.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use data_shard::EpochCounter;
use runtime_core::{
    Epoch, Error, GlobalState, MasterConfig, RawBatch, Result, ShutdownHandle, Topic,
    WorkerResult, BROADCAST_TOPIC,
};
use tracing::{debug, error, info, warn};

use crate::accumulator::reduce;
use crate::broadcast::BroadcastChannel;
use crate::data_source::DataSource;
use crate::listener::EpochListener;
use crate::message::{BroadcastPayload, GlobalUpdate, MasterMessage, NextBatchTrigger, SubscribeAck};
use crate::model::ModelRegistry;

/// Lifecycle of the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    /// Waiting for a successful setup
    Initializing,

    /// Accepting worker results
    Running,

    /// All passes complete; everything else is a no-op
    Done,
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterState::Initializing => f.write_str("initializing"),
            MasterState::Running => f.write_str("running"),
            MasterState::Done => f.write_str("done"),
        }
    }
}

/// What a handled message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Logged or recorded, nothing else
    Handled,

    /// Worker result buffered below the partition threshold
    Buffered { buffered: usize },

    /// A partition was reduced into a new global state
    Reduced { epoch: Epoch, done: bool },

    /// Payload published to the workers
    Published { subscribers: usize },

    /// Message arrived after completion and was dropped
    Ignored,
}

/// Central parameter-server state machine
pub struct MasterCoordinator {
    state: MasterState,
    config: Option<MasterConfig>,
    registry: ModelRegistry,

    /// Consensus state, present once set up
    global: Option<GlobalState>,

    /// Results received since the last reduction
    buffer: Vec<WorkerResult>,

    epochs: EpochCounter,
    listener: Option<Box<dyn EpochListener>>,

    broadcast: Arc<dyn BroadcastChannel>,
    data_source: Box<dyn DataSource>,
    shutdown: ShutdownHandle,
    topic: Topic,
}

impl MasterCoordinator {
    /// Create a coordinator in the initializing state
    pub fn new(
        broadcast: Arc<dyn BroadcastChannel>,
        data_source: Box<dyn DataSource>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            state: MasterState::Initializing,
            config: None,
            registry: ModelRegistry::new(),
            global: None,
            buffer: Vec::new(),
            epochs: EpochCounter::new(0),
            listener: None,
            broadcast,
            data_source,
            shutdown,
            topic: BROADCAST_TOPIC.to_string(),
        }
    }

    /// Use a custom model registry
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Publish to a topic other than the default broadcast topic
    pub fn with_topic(mut self, topic: impl Into<Topic>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Build the initial global state and start running
    ///
    /// On failure the coordinator stays in `Initializing`.
    pub fn setup(&mut self, config: MasterConfig) -> Result<()> {
        if self.state != MasterState::Initializing {
            return Err(Error::UnhandledMessage {
                description: format!("setup while {}", self.state),
            });
        }

        config.validate()?;
        let global = self.registry.build(&config)?;

        info!(
            partition_size = config.partition_size,
            num_passes = config.num_passes,
            params = global.dim(),
            "Master set up"
        );

        self.epochs = EpochCounter::new(config.num_passes);
        self.buffer = Vec::with_capacity(config.partition_size);
        self.global = Some(global);
        self.config = Some(config);
        self.state = MasterState::Running;
        Ok(())
    }

    /// Dispatch one message
    pub fn handle(&mut self, message: MasterMessage) -> Result<Outcome> {
        let message = match message {
            MasterMessage::Snapshot(reply) => {
                let _ = reply.send(self.global.clone());
                return Ok(Outcome::Handled);
            }
            other => other,
        };

        if self.state == MasterState::Done {
            warn!(msg_kind = message.kind(), "Ignoring message after completion");
            return Ok(Outcome::Ignored);
        }

        match message {
            MasterMessage::SubscribeAck(ack) => Ok(self.on_subscribe_ack(ack)),
            MasterMessage::RegisterListener(listener) => Ok(self.on_register_listener(listener)),
            MasterMessage::WorkerResult(result) => self.on_worker_result(result),
            MasterMessage::GlobalUpdate(update) => self.on_global_update(update),
            MasterMessage::RawBatch(batch) => self.on_raw_batch(batch),
            MasterMessage::Unrecognized(description) => self.on_unrecognized(description),
            MasterMessage::Snapshot(_) => Ok(Outcome::Handled),
        }
    }

    fn on_subscribe_ack(&mut self, ack: SubscribeAck) -> Outcome {
        info!(subscriber = %ack.subscriber, topic = %ack.topic, "Subscription acknowledged");
        Outcome::Handled
    }

    fn on_register_listener(&mut self, listener: Box<dyn EpochListener>) -> Outcome {
        let replaced = self.listener.replace(listener).is_some();
        info!(replaced = replaced, "Epoch listener registered");
        Outcome::Handled
    }

    fn on_worker_result(&mut self, result: WorkerResult) -> Result<Outcome> {
        let (partition_size, expected_dim) = match (&self.config, &self.global) {
            (Some(config), Some(global)) if self.state == MasterState::Running => {
                (config.partition_size, global.dim())
            }
            _ => {
                return Err(Error::NotRunning {
                    state: self.state.to_string(),
                })
            }
        };

        if result.payload().len() != expected_dim {
            return Err(Error::ShapeMismatch {
                worker_id: result.worker_id().to_string(),
                expected: expected_dim,
                actual: result.payload().len(),
            });
        }

        self.buffer.push(result);
        if self.buffer.len() < partition_size {
            debug!(
                buffered = self.buffer.len(),
                partition_size = partition_size,
                "Buffered worker result"
            );
            return Ok(Outcome::Buffered {
                buffered: self.buffer.len(),
            });
        }

        self.reduce_partition()
    }

    /// Reduce a full buffer into the next global state
    fn reduce_partition(&mut self) -> Result<Outcome> {
        let partition = std::mem::take(&mut self.buffer);
        let triggered_by = partition
            .last()
            .map(|r| r.worker_id().to_string())
            .unwrap_or_default();

        let mean = reduce(&partition)?;
        let next_epoch = self.epochs.current() + 1;
        let next = match &self.global {
            Some(global) => global.advance(mean, next_epoch),
            None => {
                return Err(Error::NotRunning {
                    state: self.state.to_string(),
                })
            }
        };
        self.global = Some(next);

        if let (Some(listener), Some(global)) = (self.listener.as_mut(), self.global.as_ref()) {
            listener.on_epoch_complete(global);
        }

        if let Err(e) = self.data_source.reset() {
            error!(error = %e, "Failed to reset data source");
        }

        let epoch = self.epochs.advance();
        let trigger = NextBatchTrigger {
            epoch,
            triggered_by,
        };
        if let Err(e) = self.data_source.next_batch(trigger) {
            error!(error = %e, "Failed to trigger next batch");
        }

        info!(epoch = epoch, results = partition.len(), "Reduced partition");

        let done = self.epochs.is_complete();
        if done {
            self.state = MasterState::Done;
            info!(epoch = epoch, "All passes complete; requesting shutdown");
            self.shutdown.shutdown();
        }

        Ok(Outcome::Reduced { epoch, done })
    }

    fn on_global_update(&mut self, update: GlobalUpdate) -> Result<Outcome> {
        let epoch = update.state.epoch();
        let subscribers = self
            .broadcast
            .publish(&self.topic, BroadcastPayload::GlobalUpdate(update))?;

        debug!(epoch = epoch, subscribers = subscribers, "Re-published global update");
        Ok(Outcome::Published { subscribers })
    }

    fn on_raw_batch(&mut self, batch: RawBatch) -> Result<Outcome> {
        let units = data_shard::split(batch).map_err(|e| {
            warn!(error = %e, "Dropping malformed batch");
            e
        })?;

        let count = units.len();
        let subscribers = self
            .broadcast
            .publish(&self.topic, BroadcastPayload::WorkUnits(units))?;

        debug!(units = count, subscribers = subscribers, "Sent work to workers");
        Ok(Outcome::Published { subscribers })
    }

    fn on_unrecognized(&mut self, description: String) -> Result<Outcome> {
        warn!(description = %description, "Unhandled message");
        Err(Error::UnhandledMessage { description })
    }

    /// Serialize the current global state to a byte sink
    pub fn complete<W: Write>(&self, sink: &mut W) -> Result<u64> {
        let global = self.global.as_ref().ok_or_else(|| Error::NotRunning {
            state: self.state.to_string(),
        })?;

        checkpoint::write_state(sink, global)
    }

    /// Current lifecycle state
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Whether all passes are complete
    pub fn is_done(&self) -> bool {
        self.state == MasterState::Done
    }

    /// Completed epochs
    pub fn epoch(&self) -> Epoch {
        self.epochs.current()
    }

    /// Number of results waiting for the next reduction
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Current consensus state
    pub fn global_state(&self) -> Option<&GlobalState> {
        self.global.as_ref()
    }

    /// Whether an epoch listener is registered
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Shutdown handle the coordinator signals on completion
    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }
}
