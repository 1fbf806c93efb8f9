//! Advertisement scanning.
//!
//! The pipeline only sees [`AdvertisementSource`], so it can be driven by the
//! BlueZ backend in [`scanner`] or by a fake in tests.

pub mod scanner;

use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::RawAdvertisement;

pub use scanner::BluerScanner;

/// Channel buffer size between the scan facility and the event producer.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Error type for scanner operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Service UUID filter could not be parsed
    #[error("Invalid service UUID '{0}'")]
    InvalidFilter(String),
    /// The scan facility stopped delivering advertisements
    #[error("Advertisement stream ended")]
    StreamEnded,
}

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// One delivery from a live subscription. An `Err` ends the subscription.
pub type ScanResult = Result<RawAdvertisement, ScanError>;

/// Scan facility abstraction to enable deterministic tests without Bluetooth hardware.
pub trait AdvertisementSource: Send + Sync {
    /// Subscribe to every advertisement observed from now on.
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<ScanResult>, ScanError>>;

    /// Run one discrete scan for `duration` and return what was seen.
    fn scan_once(&self, duration: Duration)
        -> BoxFuture<'_, Result<Vec<RawAdvertisement>, ScanError>>;
}
