//! Coordinator binary entry point
//!
//! Runs the master with in-process simulated workers and a synthetic data
//! source until all passes are complete, then writes the final state.
//!
//! Usage: `coordinator [config.json] [output path]`

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coordinator::{
    BroadcastPayload, ChannelDataSource, DataSourceSignal, GlobalUpdate, MasterActor,
    MasterCoordinator, MasterEvent, MasterHandle, MasterMessage, TokioBroadcast,
};
use data_shard::MatrixDataset;
use runtime_core::{MasterConfig, ShutdownHandle, WorkUnit, WorkerResult, BROADCAST_TOPIC};

/// Rows in the synthetic dataset
const DATASET_ROWS: usize = 256;

/// Step size of the simulated workers
const LEARNING_RATE: f64 = 0.01;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,runtime_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => MasterConfig::load(&path)?,
        None => default_config()?,
    };
    let output: PathBuf = args
        .next()
        .unwrap_or_else(|| "./final_state.bin".to_string())
        .into();

    tracing::info!(
        class = %config.implementation_class,
        partition_size = config.partition_size,
        num_passes = config.num_passes,
        "Starting master"
    );

    let broadcast = TokioBroadcast::new(config.channels.broadcast_capacity);
    let shutdown = ShutdownHandle::new();
    let (source, signals) = ChannelDataSource::new();

    let mut master = MasterCoordinator::new(
        Arc::new(broadcast.clone()),
        Box::new(source),
        shutdown.clone(),
    );
    master.setup(config.clone())?;

    let (handle, mut events, task) =
        MasterActor::spawn_with_events(master, config.channels.mailbox_capacity);

    // Every new state goes back out to the workers
    let republish = handle.clone();
    handle
        .register_listener(move |state: &runtime_core::GlobalState| {
            let update = MasterMessage::GlobalUpdate(GlobalUpdate {
                state: state.clone(),
            });
            if let Err(e) = republish.try_send(update) {
                tracing::warn!(error = %e, "Failed to queue global update");
            }
        })
        .await?;

    let mut workers = Vec::with_capacity(config.partition_size);
    for index in 0..config.partition_size {
        let (rx, ack) = broadcast.subscribe(BROADCAST_TOPIC, format!("worker-{}", index));
        handle.subscribe_ack(ack).await?;
        workers.push(tokio::spawn(run_worker(index, rx, handle.clone())));
    }

    let dataset = synthetic_dataset(&config)?;
    let data_task = tokio::spawn(run_data_source(dataset, signals, handle.clone()));

    let events_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MasterEvent::EpochComplete { epoch } => tracing::info!(epoch, "Epoch complete"),
                MasterEvent::Done { epoch } => tracing::info!(epoch, "Training done"),
                MasterEvent::HandlerFailed { message, error, .. } => {
                    tracing::warn!(msg_kind = message, error = %error, "Master rejected message")
                }
            }
        }
    });

    tokio::select! {
        _ = shutdown.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
            shutdown.shutdown();
        }
    }

    let master = task.await?;
    for worker in &workers {
        worker.abort();
    }
    data_task.abort();
    drop(handle);
    events_task.abort();

    let mut sink = BufWriter::new(File::create(&output)?);
    let written = master.complete(&mut sink)?;
    tracing::info!(
        path = %output.display(),
        epoch = master.epoch(),
        size_bytes = written,
        "Final state written"
    );

    Ok(())
}

fn default_config() -> runtime_core::Result<MasterConfig> {
    MasterConfig::from_json_str(
        r#"{
            "seed": 42,
            "numInputs": 8,
            "numOutputs": 2,
            "hiddenLayerSizes": "16,8",
            "implementationClass": "dense",
            "numPasses": 5,
            "partitionSize": 4
        }"#,
    )
}

/// Inputs drawn uniformly, labels the sum of each input row
fn synthetic_dataset(config: &MasterConfig) -> runtime_core::Result<MatrixDataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed as u64);
    let dist = Uniform::new(-1.0f64, 1.0);

    let inputs = Array2::from_shape_fn((DATASET_ROWS, config.num_inputs), |_| {
        dist.sample(&mut rng)
    });
    let sums = inputs.sum_axis(ndarray::Axis(1));
    let labels = Array2::from_shape_fn((DATASET_ROWS, config.num_outputs), |(row, _)| sums[row]);

    Ok(MatrixDataset::new(inputs, labels, config.partition_size)?.with_shuffle(config.seed as u64))
}

/// Feed batches to the master on every signal it sends
async fn run_data_source(
    mut dataset: MatrixDataset,
    mut signals: mpsc::UnboundedReceiver<DataSourceSignal>,
    master: MasterHandle,
) {
    if let Some(batch) = dataset.next_batch() {
        if master.raw_batch(batch).await.is_err() {
            return;
        }
    }

    while let Some(signal) = signals.recv().await {
        match signal {
            DataSourceSignal::Reset => dataset.reset(),
            DataSourceSignal::NextBatch(trigger) => {
                tracing::debug!(epoch = trigger.epoch, "Next batch requested");
                let Some(batch) = dataset.next_batch() else {
                    continue;
                };
                if master.raw_batch(batch).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Simulated worker: takes its share of each batch and returns a local update
async fn run_worker(
    index: usize,
    mut rx: coordinator::BroadcastReceiver,
    master: MasterHandle,
) {
    let worker_id = format!("worker-{}", index);
    let mut params: Option<Array1<f64>> = match master.snapshot().await {
        Ok(state) => state.map(|s| s.params().clone()),
        Err(_) => return,
    };

    loop {
        let payload = match rx.recv().await {
            Ok(payload) => payload,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(worker = %worker_id, skipped, "Worker lagged");
                continue;
            }
            Err(_) => break,
        };

        match payload.as_ref() {
            BroadcastPayload::GlobalUpdate(update) => {
                params = Some(update.state.params().clone());
            }
            BroadcastPayload::WorkUnits(units) => {
                let (Some(current), Some(unit)) = (params.as_ref(), units.get(index)) else {
                    continue;
                };

                let update = current - LEARNING_RATE * residual(unit);
                let result = WorkerResult::new(worker_id.clone(), update);
                if master.worker_result(result).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn residual(unit: &WorkUnit) -> f64 {
    match unit {
        WorkUnit::Example { input, label } => input.sum() - label.sum(),
        WorkUnit::Window(window) => window.tokens.len() as f64,
    }
}
