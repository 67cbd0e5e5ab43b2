//! Mailbox-driven runtime for the master coordinator

use std::path::Path;

use runtime_core::{Error, GlobalState, RawBatch, Result, WorkerResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::listener::EpochListener;
use crate::master::{MasterCoordinator, Outcome};
use crate::message::{GlobalUpdate, MasterMessage, SubscribeAck};

/// Diagnostics emitted by the actor loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    /// A handler rejected its message
    HandlerFailed {
        message: &'static str,
        kind: &'static str,
        error: String,
    },

    /// A partition was reduced
    EpochComplete { epoch: u64 },

    /// All passes are complete
    Done { epoch: u64 },
}

/// Runs a [`MasterCoordinator`] on its own task
pub struct MasterActor {
    coordinator: MasterCoordinator,
    mailbox: mpsc::Receiver<MasterMessage>,
    events: Option<mpsc::UnboundedSender<MasterEvent>>,
}

impl MasterActor {
    /// Spawn the actor loop
    ///
    /// The task returns the coordinator once the mailbox closes or shutdown
    /// is requested.
    pub fn spawn(
        coordinator: MasterCoordinator,
        mailbox_capacity: usize,
    ) -> (MasterHandle, JoinHandle<MasterCoordinator>) {
        Self::spawn_inner(coordinator, mailbox_capacity, None)
    }

    /// Spawn the actor loop with a diagnostics channel
    pub fn spawn_with_events(
        coordinator: MasterCoordinator,
        mailbox_capacity: usize,
    ) -> (
        MasterHandle,
        mpsc::UnboundedReceiver<MasterEvent>,
        JoinHandle<MasterCoordinator>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, task) = Self::spawn_inner(coordinator, mailbox_capacity, Some(events_tx));
        (handle, events_rx, task)
    }

    fn spawn_inner(
        coordinator: MasterCoordinator,
        mailbox_capacity: usize,
        events: Option<mpsc::UnboundedSender<MasterEvent>>,
    ) -> (MasterHandle, JoinHandle<MasterCoordinator>) {
        let (tx, mailbox) = mpsc::channel(mailbox_capacity.max(1));
        let actor = Self {
            coordinator,
            mailbox,
            events,
        };

        let task = tokio::spawn(actor.run());
        (MasterHandle { tx }, task)
    }

    async fn run(mut self) -> MasterCoordinator {
        let shutdown = self.coordinator.shutdown_handle().clone();
        let mut shutdown_rx = shutdown.subscribe();
        info!(state = %self.coordinator.state(), "Master actor started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                message = self.mailbox.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        info!("Mailbox closed");
                        break;
                    }
                },
            }
        }

        info!(epoch = self.coordinator.epoch(), "Master actor stopped");
        self.coordinator
    }

    fn dispatch(&mut self, message: MasterMessage) {
        let kind = message.kind();

        match self.coordinator.handle(message) {
            Ok(Outcome::Reduced { epoch, done }) => {
                self.emit(MasterEvent::EpochComplete { epoch });
                if done {
                    self.emit(MasterEvent::Done { epoch });
                }
            }
            Ok(outcome) => debug!(msg_kind = kind, outcome = ?outcome, "Message handled"),
            Err(e) => {
                if e.is_fatal() {
                    error!(msg_kind = kind, error = %e, "Message handling failed");
                } else {
                    warn!(msg_kind = kind, error_kind = e.kind(), error = %e, "Message rejected");
                }
                self.emit(MasterEvent::HandlerFailed {
                    message: kind,
                    kind: e.kind(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: MasterEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Cloneable sender side of the master mailbox
#[derive(Debug, Clone)]
pub struct MasterHandle {
    tx: mpsc::Sender<MasterMessage>,
}

impl MasterHandle {
    /// Send any message
    pub async fn send(&self, message: MasterMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| closed())
    }

    /// Send without waiting for mailbox capacity
    pub fn try_send(&self, message: MasterMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| Error::ChannelClosed {
            channel: format!("master mailbox: {}", e),
        })
    }

    pub async fn worker_result(&self, result: WorkerResult) -> Result<()> {
        self.send(MasterMessage::WorkerResult(result)).await
    }

    pub async fn raw_batch(&self, batch: RawBatch) -> Result<()> {
        self.send(MasterMessage::RawBatch(batch)).await
    }

    pub async fn subscribe_ack(&self, ack: SubscribeAck) -> Result<()> {
        self.send(MasterMessage::SubscribeAck(ack)).await
    }

    pub async fn global_update(&self, update: GlobalUpdate) -> Result<()> {
        self.send(MasterMessage::GlobalUpdate(update)).await
    }

    /// Replace the epoch listener
    pub async fn register_listener<L>(&self, listener: L) -> Result<()>
    where
        L: EpochListener + 'static,
    {
        self.send(MasterMessage::RegisterListener(Box::new(listener)))
            .await
    }

    /// Current global state, `None` before setup
    pub async fn snapshot(&self) -> Result<Option<GlobalState>> {
        let (reply, rx) = oneshot::channel();
        self.send(MasterMessage::Snapshot(reply)).await?;
        rx.await.map_err(|_| closed())
    }

    /// Persist the current global state to a file
    pub async fn complete_to_path(&self, path: &Path) -> Result<u64> {
        let state = self.snapshot().await?.ok_or_else(|| Error::NotRunning {
            state: "initializing".to_string(),
        })?;
        checkpoint::write_state_file(path, &state).await
    }

    /// Whether the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn closed() -> Error {
    Error::ChannelClosed {
        channel: "master mailbox".to_string(),
    }
}
