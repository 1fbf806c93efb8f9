//! Per-node capture pipeline.
//!
//! Queue-drain mode: scan facility → [`producer`] → [`queue`] → [`flusher`]
//! → batch file → relay worker. Poll-append mode: one discrete scan per tick
//! appended to the [`append`] store.

pub mod append;
pub mod flusher;
pub mod producer;
pub mod queue;

use std::future::Future;
use std::io;
use std::sync::Arc;

use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

use crate::bluetooth::{AdvertisementSource, ScanError};
use crate::config::NodeConfig;
use crate::models::AdvertisementEvent;
use crate::relay::{RelayWorker, Transport};

use append::AppendStore;
use flusher::{BatchFlusher, FlushOutcome};
use producer::EventProducer;
use queue::IngestionQueue;

/// Local persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that end a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Capture failed: {0}")]
    Capture(#[from] ScanError),
    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// Run queue-drain mode until the scan facility fails or `shutdown` completes
///
/// Either way the queue is closed, drained one last time, and everything
/// written is handed to the relay, each step bounded by the shutdown timeout.
pub async fn run_queue_mode<F>(
    config: &NodeConfig,
    source: &dyn AdvertisementSource,
    transport: Arc<dyn Transport>,
    shutdown: F,
) -> Result<(), PipelineError>
where
    F: Future<Output = ()>,
{
    let advertisements = source.subscribe().await?;

    let queue = IngestionQueue::new(config.queue.clone());
    let mut producer_task = tokio::spawn(
        EventProducer::new(config, queue.clone()).run(advertisements),
    );

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let mut relay_task =
        tokio::spawn(RelayWorker::new(transport, config.relay_timeout).run(relay_rx));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut flusher_task =
        tokio::spawn(BatchFlusher::new(config, queue.clone(), relay_tx).run(stop_rx));

    info!(
        "Capturing for sensor {}, flushing every {:?}",
        config.sensor_id, config.flush_interval
    );

    tokio::pin!(shutdown);
    let capture: Result<(), PipelineError> = tokio::select! {
        _ = &mut shutdown => {
            info!("Shutdown requested");
            Ok(())
        }
        joined = &mut producer_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Event producer stopped: {}", e);
                Err(PipelineError::Capture(e))
            }
            Err(e) => Err(PipelineError::Task(e.to_string())),
        },
    };

    // Stop new enqueues
    queue.close();
    producer_task.abort();

    // Final drain and flush
    let _ = stop_tx.send(true);
    match timeout(config.shutdown_timeout, &mut flusher_task).await {
        Ok(joined) => {
            let mut flusher = joined.map_err(|e| PipelineError::Task(e.to_string()))?;
            match timeout(config.shutdown_timeout, flusher.flush_once()).await {
                Ok(FlushOutcome::Written { path, events }) => {
                    info!("Final flush wrote {} events to {}", events, path.display())
                }
                Ok(_) => {}
                Err(_) => warn!(
                    "Final flush did not finish within {:?}",
                    config.shutdown_timeout
                ),
            }
            // Dropping the flusher closes the relay channel
            drop(flusher);
        }
        Err(_) => {
            warn!(
                "Flusher did not stop within {:?}, skipping final flush",
                config.shutdown_timeout
            );
            flusher_task.abort();
            // The aborted task drops its relay sender
            let _ = flusher_task.await;
        }
    }

    // Final relay of everything handed over
    match timeout(config.shutdown_timeout, &mut relay_task).await {
        Ok(Ok(stats)) => info!(
            "Relay finished: {} delivered, {} failed transfers, {} failed deletes",
            stats.delivered, stats.transfer_failed, stats.delete_failed
        ),
        Ok(Err(e)) => error!("Relay worker failed: {}", e),
        Err(_) => {
            warn!(
                "Relay backlog not finished within {:?}, remaining files stay in {}",
                config.shutdown_timeout,
                config.save_dir.display()
            );
            relay_task.abort();
        }
    }

    capture
}

/// Run poll-append mode until `shutdown` completes
///
/// Clears the append store once, then repeats scan → append → sleep. A failed
/// scan counts as an empty one.
pub async fn run_poll_mode<F>(
    config: &NodeConfig,
    source: &dyn AdvertisementSource,
    shutdown: F,
) -> Result<(), PipelineError>
where
    F: Future<Output = ()>,
{
    let store = AppendStore::new(&config.save_dir, &config.poll_file_tag);
    if let Err(e) = store.clear().await {
        error!("Error clearing files: {}", e);
    }

    tokio::pin!(shutdown);
    loop {
        let scanned = tokio::select! {
            _ = &mut shutdown => break,
            scanned = source.scan_once(config.poll_scan_duration) => scanned,
        };

        let batch: Vec<AdvertisementEvent> = match scanned {
            Ok(advertisements) => advertisements
                .into_iter()
                .map(|raw| {
                    let event = AdvertisementEvent::capture(
                        raw,
                        &config.sensor_id,
                        &config.calibration,
                        config.clock.now(),
                    );
                    info!("Device found: {:?}", event);
                    event
                })
                .collect(),
            Err(e) => {
                error!("Error scanning devices: {}", e);
                Vec::new()
            }
        };

        // Appends run to completion so the document is never cut short
        if batch.is_empty() {
            info!("No devices found to save.");
        } else {
            info!("Saving device data...");
            if let Err(e) = store.append(&batch).await {
                error!("Error saving to files: {}", e);
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = sleep(config.flush_interval) => {}
        }
    }

    info!("Poll loop stopped");
    Ok(())
}
