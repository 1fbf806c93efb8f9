//! Event producer: turns scan facility deliveries into queued events

use log::{info, warn};
use tokio::sync::mpsc;

use super::queue::{Enqueued, IngestionQueue};
use crate::bluetooth::{ScanError, ScanResult};
use crate::config::NodeConfig;
use crate::distance::Calibration;
use crate::models::{AdvertisementEvent, RawAdvertisement};
use crate::utils::Clock;

pub struct EventProducer {
    sensor_id: String,
    calibration: Calibration,
    clock: Clock,
    queue: IngestionQueue,
}

impl EventProducer {
    pub fn new(config: &NodeConfig, queue: IngestionQueue) -> Self {
        EventProducer {
            sensor_id: config.sensor_id.clone(),
            calibration: config.calibration,
            clock: config.clock,
            queue,
        }
    }

    /// Build, log and enqueue one event
    pub async fn submit(&self, raw: RawAdvertisement) -> Enqueued {
        let event =
            AdvertisementEvent::capture(raw, &self.sensor_id, &self.calibration, self.clock.now());
        info!("Detected: {:?}", event);

        // Only waits when the queue is full under the block policy
        let outcome = self.queue.enqueue_wait(event).await;

        match &outcome {
            Enqueued::DroppedOldest => warn!(
                "Ingestion queue full, dropped oldest event ({} dropped so far)",
                self.queue.dropped()
            ),
            Enqueued::DroppedNewest => warn!(
                "Ingestion queue full, dropped new event ({} dropped so far)",
                self.queue.dropped()
            ),
            _ => {}
        }
        outcome
    }

    /// Consume a subscription until it fails or the queue is closed
    ///
    /// Returns `Ok` only when the queue was closed for shutdown. Any scan
    /// error, including the subscription ending, is returned as fatal.
    pub async fn run(self, mut advertisements: mpsc::Receiver<ScanResult>) -> Result<(), ScanError> {
        info!("Starting event producer for sensor {}", self.sensor_id);

        while let Some(result) = advertisements.recv().await {
            let raw = result?;
            if let Enqueued::Closed(_) = self.submit(raw).await {
                info!("Ingestion queue closed, stopping event producer");
                return Ok(());
            }
        }

        Err(ScanError::StreamEnded)
    }
}
