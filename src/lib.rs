//! `ble-proximity-relay` library.
//!
//! Per-node capture pipeline for BLE proximity telemetry: advertisements are
//! captured, buffered, flushed into batch files and relayed to a central
//! collector. The binaries (`src/main.rs`, `src/bin/orchestrator.rs`) only
//! load configuration and wire the real scanner and transport in.

pub mod align;
pub mod bluetooth;
pub mod config;
pub mod distance;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod relay;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bluetooth::{AdvertisementSource, BluerScanner, ScanError};
pub use config::{CaptureMode, CollectorConfig, ConfigError, NodeConfig};
pub use distance::Calibration;
pub use models::{AdvertisementEvent, RawAdvertisement};
pub use pipeline::{run_poll_mode, run_queue_mode, PipelineError};
pub use relay::{SftpTransport, Transport};
