//! Bluetooth Low Energy scanning over BlueZ

use std::collections::HashSet;
use std::time::Duration;

use bluer::{Adapter, AdapterEvent, Address, Session, Uuid};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{AdvertisementSource, ScanError, ScanResult, ADVERTISEMENT_CHANNEL_BUFFER_SIZE};
use crate::models::RawAdvertisement;

/// BlueZ backed advertisement source (requires the bluetoothd daemon)
#[derive(Debug, Clone, Default)]
pub struct BluerScanner {
    service_uuids: HashSet<Uuid>,
}

impl BluerScanner {
    /// Create a scanner, optionally restricted to devices advertising the given services
    pub fn new(service_uuids: &[String]) -> Result<Self, ScanError> {
        let service_uuids = service_uuids
            .iter()
            .map(|raw| Uuid::parse_str(raw).map_err(|_| ScanError::InvalidFilter(raw.clone())))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(BluerScanner { service_uuids })
    }

    /// Open a session on the default adapter with an LE discovery filter applied
    ///
    /// `duplicate_data` asks BlueZ to report every advertisement instead of
    /// only the first one per device.
    async fn open_adapter(&self, duplicate_data: bool) -> Result<(Session, Adapter), ScanError> {
        // Initialize Bluetooth session
        let session = match Session::new().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Bluetooth session: {}", e);
                return Err(e.into());
            }
        };

        // Get the default Bluetooth adapter
        let adapter = match session.default_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to get default Bluetooth adapter: {}", e);
                return Err(e.into());
            }
        };

        // Ensure Bluetooth adapter is powered on
        if let Err(e) = adapter.set_powered(true).await {
            error!("Failed to power on adapter: {}", e);
            return Err(e.into());
        }

        let filter = bluer::DiscoveryFilter {
            transport: bluer::DiscoveryTransport::Le,
            duplicate_data,
            uuids: self.service_uuids.clone(),
            ..Default::default()
        };

        // Apply the discovery filter (warn if it fails, but continue)
        if let Err(e) = adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        debug!("Using Bluetooth adapter {}", adapter.name());
        Ok((session, adapter))
    }

    async fn start_subscription(&self) -> Result<mpsc::Receiver<ScanResult>, ScanError> {
        let (session, adapter) = self.open_adapter(true).await?;

        let events = match adapter.discover_devices_with_changes().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to start device discovery: {}", e);
                return Err(e.into());
            }
        };

        let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

        // The task owns all Bluetooth state; the receiver observes its end
        tokio::spawn(async move {
            let _session = session;
            let mut events = Box::pin(events);

            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                match read_advertisement(&adapter, address).await {
                    Ok(Some(advertisement)) => {
                        if tx.send(Ok(advertisement)).await.is_err() {
                            debug!("Advertisement receiver dropped, stopping discovery");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Failed to read advertisement from {}: {}", address, e),
                }
            }

            let _ = tx.send(Err(ScanError::StreamEnded)).await;
        });

        Ok(rx)
    }

    async fn discover(&self, duration: Duration) -> Result<Vec<RawAdvertisement>, ScanError> {
        let (_session, adapter) = self.open_adapter(false).await?;

        // Start device discovery in background
        let discovery_handle = match adapter.discover_devices().await {
            Ok(discovery_stream) => tokio::spawn(async move {
                let mut stream = Box::pin(discovery_stream);
                while let Some(event) = stream.next().await {
                    debug!("Discovery event: {:?}", event);
                }
            }),
            Err(e) => {
                error!("Failed to start device discovery: {}", e);
                return Err(e.into());
            }
        };

        // Let discovery run for the configured duration
        sleep(duration).await;

        // Stop discovery
        discovery_handle.abort();

        let addresses = match adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                error!("Failed to get device addresses: {}", e);
                return Err(e.into());
            }
        };

        let mut advertisements = Vec::with_capacity(addresses.len());
        for address in addresses {
            match read_advertisement(&adapter, address).await {
                Ok(Some(advertisement)) => advertisements.push(advertisement),
                Ok(None) => debug!("No current RSSI for {}", address),
                Err(e) => debug!("Failed to read advertisement from {}: {}", address, e),
            }
        }

        info!("Discovered {} devices.", advertisements.len());
        Ok(advertisements)
    }
}

impl AdvertisementSource for BluerScanner {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<ScanResult>, ScanError>> {
        Box::pin(self.start_subscription())
    }

    fn scan_once(
        &self,
        duration: Duration,
    ) -> BoxFuture<'_, Result<Vec<RawAdvertisement>, ScanError>> {
        Box::pin(self.discover(duration))
    }
}

/// Read name and signal strength of a reported device
///
/// Devices BlueZ still caches but has not heard recently carry no RSSI and are skipped.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<RawAdvertisement>, bluer::Error> {
    let device = adapter.device(address)?;

    let rssi = match device.rssi().await? {
        Some(rssi) => rssi,
        None => return Ok(None),
    };
    let name = device.name().await?;

    Ok(Some(RawAdvertisement {
        name,
        address: address.to_string().to_uppercase(),
        rssi,
    }))
}
