//! Interval driven batch flushing for queue-drain mode.
//!
//! Every tick drains the ingestion queue; a non-empty batch becomes a new
//! batch file which is handed to the relay worker. Files are never appended
//! to or overwritten once created.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::queue::IngestionQueue;
use super::StorageError;
use crate::config::NodeConfig;
use crate::models::AdvertisementEvent;
use crate::utils::{file_stamp, Clock};

/// Serialize events as a JSON array with four-space indentation
pub fn encode_batch(batch: &[AdvertisementEvent]) -> Result<Vec<u8>, StorageError> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    batch.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Read a batch file back into its ordered events
pub async fn read_batch(path: &Path) -> Result<Vec<AdvertisementEvent>, StorageError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Creates uniquely named batch files in one directory
///
/// Names follow `<prefix><tag>_<YYYYMMDD_HHMMSS>.json`. Later flushes within
/// the same second get a `_<n>` suffix.
#[derive(Debug)]
pub struct BatchWriter {
    dir: PathBuf,
    prefix: String,
    tag: String,
    last_stamp: Option<String>,
    sequence: u32,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, tag: impl Into<String>) -> Self {
        BatchWriter {
            dir: dir.into(),
            prefix: prefix.into(),
            tag: tag.into(),
            last_stamp: None,
            sequence: 0,
        }
    }

    fn file_name(&self, stamp: &str, sequence: u32) -> String {
        if sequence == 0 {
            format!("{}{}_{}.json", self.prefix, self.tag, stamp)
        } else {
            format!("{}{}_{}_{}.json", self.prefix, self.tag, stamp, sequence)
        }
    }

    /// Where a batch is written before it gets its final name
    pub fn staging_path(&self) -> PathBuf {
        self.dir.join(format!(".{}{}.partial", self.prefix, self.tag))
    }

    /// Write `batch` to a new file named after `created`
    ///
    /// The file only appears under its batch name once fully written; a failed
    /// or interrupted write leaves at most the staging file behind, which the
    /// next write replaces.
    pub async fn write(
        &mut self,
        batch: &[AdvertisementEvent],
        created: OffsetDateTime,
    ) -> Result<PathBuf, StorageError> {
        let body = encode_batch(batch)?;
        let staging = self.staging_path();
        if let Err(e) = write_durably(&staging, &body).await {
            discard(&staging).await;
            return Err(e.into());
        }

        let stamp = file_stamp(&created);
        let mut sequence = match &self.last_stamp {
            Some(last) if *last == stamp => self.sequence + 1,
            _ => 0,
        };

        let path = loop {
            let path = self.dir.join(self.file_name(&stamp, sequence));
            match tokio::fs::try_exists(&path).await {
                Ok(false) => break path,
                Ok(true) => sequence += 1,
                Err(e) => {
                    discard(&staging).await;
                    return Err(e.into());
                }
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            discard(&staging).await;
            return Err(e.into());
        }

        self.last_stamp = Some(stamp);
        self.sequence = sequence;
        Ok(path)
    }
}

/// Write errors surface on `flush`, not on `write_all`
async fn write_durably(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_file(staging).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", staging.display(), e);
        }
    }
}

/// Fixed-period ticker; ticks missed during a slow flush fire right after it
fn flush_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    ticker
}

/// Result of one flush tick
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Queue was empty, nothing written
    Empty,
    Written { path: PathBuf, events: usize },
    /// Writing failed; the drained events are lost
    Failed { events: usize },
}

pub struct BatchFlusher {
    queue: IngestionQueue,
    writer: BatchWriter,
    clock: Clock,
    interval: Duration,
    relay: mpsc::UnboundedSender<PathBuf>,
}

impl BatchFlusher {
    pub fn new(
        config: &NodeConfig,
        queue: IngestionQueue,
        relay: mpsc::UnboundedSender<PathBuf>,
    ) -> Self {
        BatchFlusher {
            queue,
            writer: BatchWriter::new(
                config.save_dir.clone(),
                config.file_prefix.clone(),
                config.file_tag.clone(),
            ),
            clock: config.clock,
            interval: config.flush_interval,
            relay,
        }
    }

    /// Drain the queue once and persist whatever was there
    pub async fn flush_once(&mut self) -> FlushOutcome {
        let batch = self.queue.drain_all();
        if batch.is_empty() {
            info!("No new data to save.");
            return FlushOutcome::Empty;
        }

        let events = batch.len();
        match self.writer.write(&batch, self.clock.now()).await {
            Ok(path) => {
                info!("Saved {} devices to {}.", events, path.display());
                if self.relay.send(path.clone()).is_err() {
                    warn!(
                        "Relay worker stopped, {} stays on disk",
                        path.display()
                    );
                }
                FlushOutcome::Written { path, events }
            }
            Err(e) => {
                error!("Error saving {} devices to file: {}", events, e);
                FlushOutcome::Failed { events }
            }
        }
    }

    /// Flush on every tick until `stop` changes or its sender is dropped
    ///
    /// Ticks keep a fixed period; a slow flush does not push later ticks back.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        let mut ticker = flush_ticker(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
                _ = stop.changed() => break,
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{event, TEST_TIME};
    use std::time::Duration;
    use tempfile::TempDir;
    use time::UtcOffset;

    fn config(dir: &Path) -> NodeConfig {
        let dir = dir.display().to_string();
        NodeConfig::from_lookup(
            |key| match key {
                "SENSOR_ID" => Some("sensor1".to_string()),
                "CAPTURE_MODE" => Some("poll".to_string()),
                "SAVE_DIR" => Some(dir.clone()),
                "FLUSH_INTERVAL_MS" => Some("250".to_string()),
                _ => None,
            },
            Clock::new(UtcOffset::UTC),
        )
        .unwrap()
    }

    fn json_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_write_and_read_back_batch() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "BTbluetooth_scan_data_", "sensor1");
        let batch = vec![event("AA:00:00:00:00:01", -60), event("AA:00:00:00:00:02", -73)];

        let path = writer.write(&batch, TEST_TIME).await.unwrap();
        assert_eq!(
            path.file_name().unwrap(),
            "BTbluetooth_scan_data_sensor1_20241014_120400.json"
        );
        assert_eq!(read_batch(&path).await.unwrap(), batch);
    }

    #[tokio::test]
    async fn test_write_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "p_", "t");
        let path = writer.write(&[event("a", -60)], TEST_TIME).await.unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("[\n    {\n        \"timestamp\""));
    }

    #[tokio::test]
    async fn test_same_second_flushes_do_not_clobber() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "p_", "s1");

        let first = writer.write(&[event("a", -60)], TEST_TIME).await.unwrap();
        let second = writer
            .write(&[event("b", -60)], TEST_TIME + time::Duration::milliseconds(250))
            .await
            .unwrap();
        let third = writer
            .write(&[event("c", -60)], TEST_TIME + time::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(first.file_name().unwrap(), "p_s1_20241014_120400.json");
        assert_eq!(second.file_name().unwrap(), "p_s1_20241014_120400_1.json");
        assert_eq!(third.file_name().unwrap(), "p_s1_20241014_120401.json");
        assert_eq!(read_batch(&first).await.unwrap()[0].device_address, "a");
        assert_eq!(read_batch(&second).await.unwrap()[0].device_address, "b");
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let taken = dir.path().join("p_s1_20241014_120400.json");
        std::fs::write(&taken, b"keep me").unwrap();

        let mut writer = BatchWriter::new(dir.path(), "p_", "s1");
        let path = writer.write(&[event("a", -60)], TEST_TIME).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "p_s1_20241014_120400_1.json");
        assert_eq!(std::fs::read(&taken).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_batch_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "p_", "s1");
        // A directory in the staging spot makes every write fail
        std::fs::create_dir(writer.staging_path()).unwrap();

        let result = writer.write(&[event("a", -60)], TEST_TIME).await;

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(json_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_write_leaves_only_the_batch_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "p_", "s1");
        let path = writer.write(&[event("a", -60)], TEST_TIME).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![path.file_name().unwrap().to_os_string()]);
        assert!(!writer.staging_path().exists());
    }

    #[tokio::test]
    async fn test_stale_staging_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let mut writer = BatchWriter::new(dir.path(), "p_", "s1");
        std::fs::write(writer.staging_path(), b"[{\"truncat").unwrap();

        let path = writer.write(&[event("a", -60)], TEST_TIME).await.unwrap();

        let batch = read_batch(&path).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].device_address, "a");
    }

    #[tokio::test]
    async fn test_flush_write_failure_is_not_handed_to_relay() {
        let dir = TempDir::new().unwrap();
        let queue = IngestionQueue::unbounded();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut flusher = BatchFlusher::new(&config(dir.path()), queue.clone(), tx);
        std::fs::create_dir(flusher.writer.staging_path()).unwrap();

        queue.enqueue(event("a", -60));
        queue.enqueue(event("b", -60));

        assert_eq!(flusher.flush_once().await, FlushOutcome::Failed { events: 2 });
        assert!(rx.try_recv().is_err());
        assert!(json_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_flush_empty_queue_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut flusher = BatchFlusher::new(&config(dir.path()), IngestionQueue::unbounded(), tx);

        assert_eq!(flusher.flush_once().await, FlushOutcome::Empty);
        assert_eq!(flusher.flush_once().await, FlushOutcome::Empty);
        assert!(json_files(dir.path()).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flush_writes_batch_and_hands_it_to_relay() {
        let dir = TempDir::new().unwrap();
        let queue = IngestionQueue::unbounded();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut flusher = BatchFlusher::new(&config(dir.path()), queue.clone(), tx);

        queue.enqueue(event("a", -60));
        queue.enqueue(event("b", -70));

        let FlushOutcome::Written { path, events } = flusher.flush_once().await else {
            panic!("expected a written batch");
        };
        assert_eq!(events, 2);
        assert!(path.exists());
        assert_eq!(rx.try_recv().unwrap(), path);
        assert!(queue.is_empty());

        let batch = read_batch(&path).await.unwrap();
        let addresses: Vec<_> = batch.iter().map(|e| e.device_address.as_str()).collect();
        assert_eq!(addresses, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_flush_write_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.save_dir = dir.path().join("missing");
        let queue = IngestionQueue::unbounded();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut flusher = BatchFlusher::new(&config, queue.clone(), tx);

        queue.enqueue(event("a", -60));
        assert_eq!(flusher.flush_once().await, FlushOutcome::Failed { events: 1 });
        assert!(rx.try_recv().is_err());

        // The next tick carries on normally
        assert_eq!(flusher.flush_once().await, FlushOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_every_tick_until_stopped() {
        let dir = TempDir::new().unwrap();
        let queue = IngestionQueue::unbounded();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let flusher = BatchFlusher::new(&config(dir.path()), queue.clone(), tx);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(flusher.run(stop_rx));

        queue.enqueue(event("a", -60));
        let first = rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.enqueue(event("b", -60));
        let second = rx.recv().await.unwrap();

        stop_tx.send(true).unwrap();
        let mut flusher = task.await.unwrap();

        assert_ne!(first, second);
        assert_eq!(read_batch(&first).await.unwrap()[0].device_address, "a");
        assert_eq!(read_batch(&second).await.unwrap()[0].device_address, "b");
        assert_eq!(flusher.flush_once().await, FlushOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_flush_does_not_shift_later_ticks() {
        let start = tokio::time::Instant::now();
        let period = Duration::from_millis(250);
        let mut ticker = flush_ticker(period);

        assert_eq!(ticker.tick().await, start);
        // A flush taking longer than two periods
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(ticker.tick().await, start + period);
        assert_eq!(ticker.tick().await, start + period * 2);
        assert_eq!(ticker.tick().await, start + period * 3);
        assert_eq!(tokio::time::Instant::now(), start + period * 3);
        assert_eq!(ticker.tick().await, start + period * 4);
    }
}
