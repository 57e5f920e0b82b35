//! Simulated radio
//!
//! An in-process stand-in for the real adapter, used by the CLI. It
//! advertises a few peers and serves a UART stream and a JSON sensor
//! service with deterministic values.

use crate::domain::error::RadioError;
use crate::domain::models::{PeerDescriptor, Sighting};
use crate::domain::service_kind::{JSON_SERVICE_UUID, UART_SERVICE_UUID};
use crate::infrastructure::bluetooth::radio::{Connector, RemoteService, Scanner, Transport};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

struct SimulatedPeer {
    address: &'static str,
    name: Option<&'static str>,
    connectable: bool,
    base_rssi: i16,
    uart: bool,
    json: bool,
}

const PEERS: &[SimulatedPeer] = &[
    SimulatedPeer {
        address: "C4:4F:33:12:7A:01",
        name: Some("Inclinometer"),
        connectable: true,
        base_rssi: -48,
        uart: true,
        json: true,
    },
    SimulatedPeer {
        address: "D8:3A:DD:45:10:02",
        name: Some("EnvSensor"),
        connectable: true,
        base_rssi: -67,
        uart: false,
        json: true,
    },
    SimulatedPeer {
        address: "5E:21:9B:00:AF:03",
        name: None,
        connectable: false,
        base_rssi: -82,
        uart: false,
        json: false,
    },
];

pub struct SimulatedRadio {
    scans: AtomicU64,
    /// The first connect answers "busy" once, like a real adapter that is
    /// still winding down a scan.
    busy_once: AtomicBool,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            scans: AtomicU64::new(0),
            busy_once: AtomicBool::new(true),
        }
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for SimulatedRadio {
    async fn scan(&self, window: Duration) -> Result<Vec<Sighting>, RadioError> {
        let round = self.scans.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(window).await;

        Ok(PEERS
            .iter()
            .map(|peer| Sighting {
                address: peer.address.to_string(),
                name: peer.name.map(str::to_string),
                connectable: peer.connectable,
                rssi: peer.base_rssi - (round % 5) as i16,
                tx_power: peer.connectable.then_some(4),
            })
            .collect())
    }

    async fn stop(&self) -> Result<(), RadioError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for SimulatedRadio {
    async fn connect(
        &self,
        peer: &PeerDescriptor,
        _timeout: Duration,
    ) -> Result<Arc<dyn Transport>, RadioError> {
        let Some(known) = PEERS.iter().find(|p| p.address == peer.address) else {
            return Err(RadioError::Failed(format!("{} out of range", peer.address)));
        };
        if !known.connectable {
            return Err(RadioError::Failed("connection refused".to_string()));
        }
        if self.busy_once.swap(false, Ordering::SeqCst) {
            debug!("Simulated adapter busy");
            return Err(RadioError::Busy);
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        let connected = Arc::new(AtomicBool::new(true));
        let mut services: Vec<Arc<dyn RemoteService>> = Vec::new();
        if known.uart {
            services.push(Arc::new(SimulatedUart {
                connected: connected.clone(),
                tick: AtomicU64::new(0),
            }));
        }
        if known.json {
            services.push(Arc::new(SimulatedJson {
                connected: connected.clone(),
                tick: AtomicU64::new(0),
            }));
        }
        // Vendor service the toolkit does not know about.
        services.push(Arc::new(SimulatedBattery {
            connected: connected.clone(),
        }));

        Ok(Arc::new(SimulatedTransport {
            address: peer.address.clone(),
            connected,
            services,
        }))
    }
}

struct SimulatedTransport {
    address: String,
    connected: Arc<AtomicBool>,
    services: Vec<Arc<dyn RemoteService>>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn services(&self) -> Result<Vec<Arc<dyn RemoteService>>, RadioError> {
        ensure_connected(&self.connected)?;
        Ok(self.services.clone())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(RadioError::Failed("not connected".to_string()));
        }
        info!(address = %self.address, "Simulated link closed");
        Ok(())
    }
}

fn ensure_connected(connected: &AtomicBool) -> Result<(), RadioError> {
    if connected.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(RadioError::Failed("not connected".to_string()))
    }
}

/// Streams inclination readings as newline separated text.
struct SimulatedUart {
    connected: Arc<AtomicBool>,
    tick: AtomicU64,
}

#[async_trait]
impl RemoteService for SimulatedUart {
    fn uuid(&self) -> Uuid {
        UART_SERVICE_UUID
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        ensure_connected(&self.connected)?;
        let t = self.tick.fetch_add(1, Ordering::Relaxed) as f64;
        let inc_z = 45.0 + 30.0 * (t / 5.0).sin();
        Ok(format!("{:.2}\n", inc_z).into_bytes())
    }

    async fn write(&self, data: &[u8]) -> Result<(), RadioError> {
        ensure_connected(&self.connected)?;
        debug!("UART write of {} bytes", data.len());
        Ok(())
    }
}

/// Serves a JSON sensor document.
struct SimulatedJson {
    connected: Arc<AtomicBool>,
    tick: AtomicU64,
}

#[async_trait]
impl RemoteService for SimulatedJson {
    fn uuid(&self) -> Uuid {
        JSON_SERVICE_UUID
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        ensure_connected(&self.connected)?;
        let t = self.tick.fetch_add(1, Ordering::Relaxed) as f64;
        let doc = json!({
            "Sensors": {
                "Temperature": format!("{:.2} C", 21.0 + (t / 7.0).sin()),
                "Humidity": format!("{:.2} %", 40.0 + 5.0 * (t / 11.0).cos()),
                "Barometric_pressure": format!("{:.2}", 1013.25 + (t / 13.0).sin()),
                "Acceleration": {
                    "x": format!("{:.2}", (t / 3.0).sin()),
                    "y": format!("{:.2}", (t / 3.0).cos()),
                    "z": "9.81"
                }
            }
        });
        Ok(doc.to_string().into_bytes())
    }

    async fn write(&self, _data: &[u8]) -> Result<(), RadioError> {
        Err(RadioError::Failed("characteristic is read only".to_string()))
    }
}

struct SimulatedBattery {
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteService for SimulatedBattery {
    fn uuid(&self) -> Uuid {
        uuid::uuid!("0000180f-0000-1000-8000-00805f9b34fb")
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        ensure_connected(&self.connected)?;
        Ok(vec![87])
    }

    async fn write(&self, _data: &[u8]) -> Result<(), RadioError> {
        Err(RadioError::Failed("characteristic is read only".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::radio::ServiceCatalog;
    use std::time::Instant;

    fn descriptor(sighting: Sighting) -> PeerDescriptor {
        PeerDescriptor::from_sighting(sighting, Instant::now())
    }

    #[tokio::test]
    async fn test_scan_reports_all_peers() {
        let radio = SimulatedRadio::new();
        let sightings = radio.scan(Duration::from_millis(1)).await.unwrap();
        assert_eq!(sightings.len(), PEERS.len());
        assert!(sightings.iter().any(|s| !s.connectable));
    }

    #[tokio::test]
    async fn test_first_connect_is_busy_then_services_are_classified() {
        let radio = SimulatedRadio::new();
        let sightings = radio.scan(Duration::from_millis(1)).await.unwrap();
        let peer = descriptor(sightings[0].clone());

        assert_eq!(
            radio.connect(&peer, Duration::from_secs(1)).await.err(),
            Some(RadioError::Busy)
        );
        let transport = radio.connect(&peer, Duration::from_secs(1)).await.unwrap();

        let services = ServiceCatalog::discover(transport.as_ref()).await.unwrap();
        assert_eq!(services.len(), 2);

        transport.disconnect().await.unwrap();
        assert!(services[0].read().await.is_err());
        assert!(transport.disconnect().await.is_err());
    }
}
