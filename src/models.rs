use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::distance::Calibration;

/// Name recorded when a device does not advertise one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// One advertisement as reported by the scan facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub name: Option<String>,
    pub address: String,
    pub rssi: i16,
}

/// One observed advertisement, stamped and enriched by the capturing node
///
/// Field names on the wire match the batch file format consumed by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "id")]
    pub sensor_id: String,
    #[serde(rename = "name")]
    pub device_name: String,
    #[serde(rename = "address")]
    pub device_address: String,
    #[serde(rename = "rssi")]
    pub signal_strength: i16,
    #[serde(rename = "distance")]
    pub estimated_distance: f64,
}

impl AdvertisementEvent {
    /// Build an event from a raw advertisement, deriving the distance estimate now
    pub fn capture(
        raw: RawAdvertisement,
        sensor_id: &str,
        calibration: &Calibration,
        timestamp: OffsetDateTime,
    ) -> Self {
        let device_name = raw
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());

        AdvertisementEvent {
            timestamp,
            sensor_id: sensor_id.to_string(),
            device_name,
            device_address: raw.address,
            signal_strength: raw.rssi,
            estimated_distance: calibration.distance(raw.rssi),
        }
    }

    /// Render the comma separated line used by the human-readable `.txt` sibling
    pub fn to_text_line(&self) -> String {
        let timestamp = self
            .timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| self.timestamp.to_string());
        format!(
            "{}, {}, {}, {}, {}, {:?}",
            timestamp,
            self.sensor_id,
            self.device_name,
            self.device_address,
            self.signal_strength,
            self.estimated_distance
        )
    }
}
