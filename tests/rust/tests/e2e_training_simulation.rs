//! End-to-end training simulation test
//!
//! Runs the master with:
//! - Several simulated workers subscribed to the broadcast topic
//! - A dataset-backed data source driven by reset/next-batch signals
//! - Global updates re-published to the workers after every epoch
//! - Per-epoch snapshots written by the snapshot manager

use anyhow::Result;
use checkpoint::{SnapshotManager, SnapshotManagerConfig};
use coordinator::{
    BroadcastPayload, BroadcastReceiver, ChannelDataSource, DataSourceSignal, EpochListener,
    GlobalUpdate, MasterActor, MasterCoordinator, MasterHandle, MasterMessage, SnapshotListener,
    TokioBroadcast,
};
use data_shard::MatrixDataset;
use ndarray::{Array, Array1};
use runtime_core::{
    GlobalState, MasterConfig, ShutdownHandle, WorkUnit, WorkerResult, BROADCAST_TOPIC,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const NUM_WORKERS: usize = 3;
const NUM_PASSES: u64 = 4;

fn config() -> Result<MasterConfig> {
    Ok(MasterConfig::from_json_str(&format!(
        r#"{{
            "seed": 5,
            "numInputs": 3,
            "numOutputs": 1,
            "hiddenLayerSizes": [4],
            "implementationClass": "autoencoder",
            "numPasses": {},
            "partitionSize": {}
        }}"#,
        NUM_PASSES, NUM_WORKERS
    ))?)
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

/// Simulated worker: answers its unit of each batch with a shifted copy of
/// the latest global parameters
async fn worker(index: usize, mut rx: BroadcastReceiver, master: MasterHandle) -> usize {
    let mut params: Option<Array1<f64>> = master
        .snapshot()
        .await
        .ok()
        .flatten()
        .map(|s| s.params().clone());
    let mut updates_seen = 0;

    while let Ok(payload) = rx.recv().await {
        match payload.as_ref() {
            BroadcastPayload::GlobalUpdate(update) => {
                updates_seen += 1;
                tracing::debug!(
                    worker = index,
                    epoch = update.state.epoch(),
                    "Worker got global update"
                );
                params = Some(update.state.params().clone());
            }
            BroadcastPayload::WorkUnits(units) => {
                let (Some(current), Some(WorkUnit::Example { input, .. })) =
                    (params.as_ref(), units.get(index))
                else {
                    continue;
                };

                let update = current + input.sum();
                let result = WorkerResult::new(format!("worker-{}", index), update);
                if master.worker_result(result).await.is_err() {
                    break;
                }
            }
        }
    }

    updates_seen
}

/// Data source: first batch on start, then one per next-batch signal
async fn data_source(
    mut dataset: MatrixDataset,
    mut signals: mpsc::UnboundedReceiver<DataSourceSignal>,
    master: MasterHandle,
) -> usize {
    let mut resets = 0;
    if let Some(batch) = dataset.next_batch() {
        let _ = master.raw_batch(batch).await;
    }

    while let Some(signal) = signals.recv().await {
        match signal {
            DataSourceSignal::Reset => {
                resets += 1;
                dataset.reset();
            }
            DataSourceSignal::NextBatch(_) => {
                if let Some(batch) = dataset.next_batch() {
                    if master.raw_batch(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    resets
}

#[tokio::test]
async fn test_training_simulation() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = config()?;

    let broadcast = TokioBroadcast::new(64);
    let shutdown = ShutdownHandle::new();
    let (source, signals) = ChannelDataSource::new();

    let mut master = MasterCoordinator::new(
        Arc::new(broadcast.clone()),
        Box::new(source),
        shutdown.clone(),
    );
    master.setup(config.clone())?;
    let initial = master.global_state().cloned();
    let (handle, task) = MasterActor::spawn(master, 128);

    let snapshots = Arc::new(
        SnapshotManager::new(SnapshotManagerConfig {
            base_path: dir.path().to_path_buf(),
            keep_count: 2,
            queue_capacity: 16,
        })
        .await?,
    );

    // Snapshot every epoch and send the new state back out to the workers
    let republish = handle.clone();
    let mut snapshot_listener = SnapshotListener::new(snapshots.clone());
    handle
        .register_listener(move |state: &GlobalState| {
            snapshot_listener.on_epoch_complete(state);
            let update = GlobalUpdate {
                state: state.clone(),
            };
            let _ = republish.try_send(MasterMessage::GlobalUpdate(update));
        })
        .await?;

    let mut workers = Vec::new();
    for index in 0..NUM_WORKERS {
        let (rx, ack) = broadcast.subscribe(BROADCAST_TOPIC, format!("worker-{}", index));
        handle.subscribe_ack(ack).await?;
        workers.push(tokio::spawn(worker(index, rx, handle.clone())));
    }

    let inputs = Array::from_shape_fn((12, 3), |(r, c)| (r * 3 + c) as f64 * 0.01);
    let labels = Array::from_shape_fn((12, 1), |(r, _)| r as f64);
    let dataset = MatrixDataset::new(inputs, labels, NUM_WORKERS)?.with_shuffle(9);
    let data_task = tokio::spawn(data_source(dataset, signals, handle.clone()));

    timeout(Duration::from_secs(10), shutdown.wait()).await?;
    let master = timeout(Duration::from_secs(5), task).await??;

    assert!(master.is_done());
    assert_eq!(master.epoch(), NUM_PASSES);
    assert_eq!(shutdown.request_count(), 1);

    let final_state = master
        .global_state()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no final state"))?;
    assert_eq!(final_state.epoch(), NUM_PASSES);
    assert_eq!(Some(final_state.dim()), initial.as_ref().map(|s| s.dim()));
    assert_ne!(Some(final_state.params()), initial.as_ref().map(|s| s.params()));

    // Only the newest snapshots are retained
    let latest = snapshots.wait_for(NUM_PASSES, Duration::from_secs(5)).await?;
    assert_eq!(latest.epoch, NUM_PASSES);
    let kept: Vec<_> = snapshots.all_snapshots().iter().map(|s| s.epoch).collect();
    assert_eq!(kept, vec![NUM_PASSES - 1, NUM_PASSES]);
    let restored = checkpoint::read_state_file(&latest.path).await?;
    assert_eq!(restored, final_state);

    drop(master);
    drop(handle);
    let resets = timeout(Duration::from_secs(5), data_task).await??;
    tracing::info!(resets, epoch = final_state.epoch(), "Simulation finished");
    assert_eq!(resets, NUM_PASSES as usize);
    for worker in workers {
        worker.abort();
    }

    Ok(())
}
