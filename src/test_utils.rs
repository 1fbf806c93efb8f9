use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::bluetooth::{AdvertisementSource, ScanError, ScanResult};
use crate::distance::Calibration;
use crate::models::{AdvertisementEvent, RawAdvertisement};
use crate::relay::{RelayError, Transport, TransportSession};

/// A stable capture time for unit tests.
pub const TEST_TIME: OffsetDateTime = datetime!(2024-10-14 12:04:00.125 UTC);

/// Build a raw advertisement with a fixed name.
pub fn raw(address: &str, rssi: i16) -> RawAdvertisement {
    RawAdvertisement {
        name: Some("Beacon".to_string()),
        address: address.to_string(),
        rssi,
    }
}

/// Build an event from `sensor1` at [`TEST_TIME`].
pub fn event(address: &str, rssi: i16) -> AdvertisementEvent {
    AdvertisementEvent::capture(raw(address, rssi), "sensor1", &Calibration::DEFAULT, TEST_TIME)
}

/// Scan facility double.
///
/// `subscribe` replays `stream` and then either ends with `stream_end` or
/// keeps the subscription open. `scan_once` pops one prepared scan per call.
#[derive(Debug, Default)]
pub struct FakeSource {
    pub stream: Vec<ScanResult>,
    pub stream_end: Option<ScanError>,
    pub scans: Mutex<VecDeque<Result<Vec<RawAdvertisement>, ScanError>>>,
    senders: Mutex<Vec<mpsc::Sender<ScanResult>>>,
}

impl FakeSource {
    pub fn streaming(stream: Vec<ScanResult>) -> Self {
        FakeSource {
            stream,
            ..Default::default()
        }
    }

    pub fn scanning(scans: Vec<Result<Vec<RawAdvertisement>, ScanError>>) -> Self {
        FakeSource {
            scans: Mutex::new(scans.into()),
            ..Default::default()
        }
    }
}

impl AdvertisementSource for FakeSource {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<ScanResult>, ScanError>> {
        Box::pin(async move {
            let mut results = self.stream.clone();
            results.extend(self.stream_end.clone().map(Err));
            let (tx, rx) = mpsc::channel(results.len().max(1));
            for result in results {
                let _ = tx.send(result).await;
            }
            if self.stream_end.is_none() {
                // Keep the subscription open like a live scanner
                self.senders.lock().unwrap().push(tx);
            }
            Ok(rx)
        })
    }

    fn scan_once(
        &self,
        _duration: Duration,
    ) -> BoxFuture<'_, Result<Vec<RawAdvertisement>, ScanError>> {
        let next = self.scans.lock().unwrap().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(Vec::new())) })
    }
}

/// Pipeline stage a [`FakeTransport`] fails at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Connect,
    Copy,
}

/// One upload captured by [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct Upload {
    pub local: PathBuf,
    pub remote: String,
    pub contents: Vec<u8>,
}

/// Remote-copy double recording every upload in memory.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    pub remote_dir: String,
    pub fail_at: Option<FailAt>,
    pub delay: Duration,
    pub uploads: Arc<Mutex<Vec<Upload>>>,
    pub closed_sessions: Arc<Mutex<usize>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            remote_dir: "/collector/bt".to_string(),
            fail_at: None,
            delay: Duration::ZERO,
            uploads: Arc::new(Mutex::new(Vec::new())),
            closed_sessions: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(stage: FailAt) -> Self {
        FakeTransport {
            fail_at: Some(stage),
            ..FakeTransport::new()
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn remote_dir(&self) -> &str {
        &self.remote_dir
    }

    fn connect(&self) -> Result<Box<dyn TransportSession>, RelayError> {
        if self.fail_at == Some(FailAt::Connect) {
            return Err(RelayError::Connect("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            transport: self.clone(),
        }))
    }
}

struct FakeSession {
    transport: FakeTransport,
}

impl TransportSession for FakeSession {
    fn copy(&mut self, local: &Path, remote: &str) -> Result<u64, RelayError> {
        std::thread::sleep(self.transport.delay);
        if self.transport.fail_at == Some(FailAt::Copy) {
            return Err(RelayError::Sftp("permission denied".into()));
        }
        let contents = std::fs::read(local)?;
        let bytes = contents.len() as u64;
        self.transport.uploads.lock().unwrap().push(Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            contents,
        });
        Ok(bytes)
    }

    fn close(self: Box<Self>) -> Result<(), RelayError> {
        *self.transport.closed_sessions.lock().unwrap() += 1;
        Ok(())
    }
}
