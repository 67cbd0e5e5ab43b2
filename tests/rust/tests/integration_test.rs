//! Cross-crate tests of the master through its actor runtime

use anyhow::Result;
use coordinator::{
    BroadcastPayload, BroadcastReceiver, ChannelDataSource, DataSourceSignal, MasterActor,
    MasterCoordinator, MasterEvent, MasterHandle, TokioBroadcast,
};
use ndarray::array;
use runtime_core::{
    GlobalState, MasterConfig, RawBatch, ShutdownHandle, Window, WorkUnit, WorkerResult,
    BROADCAST_TOPIC,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Running {
    handle: MasterHandle,
    task: JoinHandle<MasterCoordinator>,
    events: mpsc::UnboundedReceiver<MasterEvent>,
    signals: mpsc::UnboundedReceiver<DataSourceSignal>,
    workers: BroadcastReceiver,
    shutdown: ShutdownHandle,
}

// dense 1 -> 1: one weight plus one bias
fn properties(partition_size: usize, num_passes: u64) -> HashMap<String, String> {
    [
        ("seed", "11".to_string()),
        ("numInputs", "1".to_string()),
        ("numOutputs", "1".to_string()),
        ("hiddenLayerSizes", "".to_string()),
        ("implementationClass", "dense".to_string()),
        ("numPasses", num_passes.to_string()),
        ("partitionSize", partition_size.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Route master logs through the test harness output
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=debug,checkpoint=info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn start(config: MasterConfig) -> Result<Running> {
    init_tracing();
    let broadcast = TokioBroadcast::new(config.channels.broadcast_capacity);
    let (workers, _ack) = broadcast.subscribe(BROADCAST_TOPIC, "observer");
    let (source, signals) = ChannelDataSource::new();
    let shutdown = ShutdownHandle::new();

    let mut master = MasterCoordinator::new(Arc::new(broadcast), Box::new(source), shutdown.clone());
    master.setup(config.clone())?;
    let (handle, events, task) = MasterActor::spawn_with_events(master, config.channels.mailbox_capacity);

    Ok(Running {
        handle,
        task,
        events,
        signals,
        workers,
        shutdown,
    })
}

#[tokio::test]
async fn test_two_results_finish_single_pass() -> Result<()> {
    let config = MasterConfig::from_properties(&properties(2, 1))?;
    let mut run = start(config)?;

    let epochs = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = epochs.clone();
    run.handle
        .register_listener(move |state: &GlobalState| seen.lock().push(state.clone()))
        .await?;

    run.handle.worker_result(WorkerResult::new("w1", array![2.0, 2.0])).await?;
    run.handle.worker_result(WorkerResult::new("w2", array![4.0, 4.0])).await?;

    let master = timeout(Duration::from_secs(5), run.task).await??;
    assert!(master.is_done());
    assert_eq!(master.epoch(), 1);
    assert_eq!(master.global_state().map(|s| s.params().clone()), Some(array![3.0, 3.0]));
    assert_eq!(run.shutdown.request_count(), 1);

    let epochs = epochs.lock();
    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs[0].params(), &array![3.0, 3.0]);

    assert_eq!(run.signals.recv().await, Some(DataSourceSignal::Reset));
    assert!(matches!(
        run.signals.recv().await,
        Some(DataSourceSignal::NextBatch(trigger)) if trigger.epoch == 1 && trigger.triggered_by == "w2"
    ));
    assert_eq!(run.events.recv().await, Some(MasterEvent::EpochComplete { epoch: 1 }));
    assert_eq!(run.events.recv().await, Some(MasterEvent::Done { epoch: 1 }));

    Ok(())
}

#[tokio::test]
async fn test_raw_units_single_publish() -> Result<()> {
    let config = MasterConfig::from_properties(&properties(2, 1))?;
    let mut run = start(config)?;

    let units: Vec<WorkUnit> = ["a b c", "d e f", "g h i", "j k l", "m n o"]
        .iter()
        .map(|text| WorkUnit::Window(Window::centred(text.split(' ').map(String::from).collect())))
        .collect();
    run.handle.raw_batch(RawBatch::Units(units.clone())).await?;

    let published = timeout(Duration::from_secs(5), run.workers.recv()).await??;
    assert_eq!(*published, BroadcastPayload::WorkUnits(units));

    // round-trip through the mailbox so nothing else can still be in flight
    run.handle.snapshot().await?;
    assert!(run.workers.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_malformed_batch_keeps_running() -> Result<()> {
    let config = MasterConfig::from_properties(&properties(2, 1))?;
    let mut run = start(config)?;

    run.handle
        .raw_batch(RawBatch::Matrices {
            inputs: array![[1.0], [2.0], [3.0]],
            labels: array![[1.0], [2.0]],
        })
        .await?;

    match timeout(Duration::from_secs(5), run.events.recv()).await? {
        Some(MasterEvent::HandlerFailed { kind, .. }) => assert_eq!(kind, "batch_validation"),
        other => panic!("unexpected event: {:?}", other),
    }

    // still accepting work
    run.handle.worker_result(WorkerResult::new("w1", array![1.0, 1.0])).await?;
    assert_eq!(run.handle.snapshot().await?.map(|s| s.epoch()), Some(0));
    assert!(!run.handle.is_closed());

    Ok(())
}

#[tokio::test]
async fn test_final_state_persisted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("final_state.bin");

    let config = MasterConfig::from_properties(&properties(1, 2))?;
    let run = start(config)?;

    run.handle.worker_result(WorkerResult::new("w1", array![0.5, 1.5])).await?;
    let written = run.handle.complete_to_path(&path).await?;
    assert!(written > 0);

    let restored = checkpoint::read_state_file(&path).await?;
    assert_eq!(restored.epoch(), 1);
    assert_eq!(restored.params(), &array![0.5, 1.5]);

    run.handle.worker_result(WorkerResult::new("w1", array![1.0, 1.0])).await?;
    let master = timeout(Duration::from_secs(5), run.task).await??;

    let mut sink = Vec::new();
    master.complete(&mut sink)?;
    let last = checkpoint::read_state(&mut sink.as_slice())?;
    assert_eq!(last.epoch(), 2);
    assert_eq!(last.params(), &array![1.0, 1.0]);

    Ok(())
}
