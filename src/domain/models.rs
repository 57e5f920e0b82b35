use crate::domain::service_kind::ServiceKind;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use uuid::Uuid;

/// One observation of a peer during a scan window.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub address: String,
    pub name: Option<String>,
    pub connectable: bool,
    pub rssi: i16,
    pub tx_power: Option<i8>,
}

/// Latest known state of a discovered peer.
///
/// Replaced wholesale on every sighting; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerDescriptor {
    pub address: String,
    pub name: Option<String>,
    pub connectable: bool,
    pub rssi: i16,
    pub tx_power: Option<i8>,
    pub last_seen: Instant,
}

impl PeerDescriptor {
    pub fn from_sighting(sighting: Sighting, seen_at: Instant) -> Self {
        Self {
            address: sighting.address,
            name: sighting.name,
            connectable: sighting.connectable,
            rssi: sighting.rssi,
            tx_power: sighting.tx_power,
            last_seen: seen_at,
        }
    }

    /// Label used by list views: `"<address> (<name>)"` or just the address.
    pub fn label(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} ({})", self.address, name),
            _ => self.address.clone(),
        }
    }
}

/// Result of evicting stale peers and diffing against what the UI shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDiff {
    pub to_add: BTreeMap<String, PeerDescriptor>,
    pub to_remove: BTreeSet<String>,
}

impl DeviceDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// A service offered to the user after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub id: Uuid,
    pub kind: ServiceKind,
}

/// Events marshalled from background tasks to the display thread.
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceListChanged(DeviceDiff),
    ConnectionStatus {
        state: ConnectionState,
        message: String,
    },
    ServicesDiscovered {
        peer: String,
        services: Vec<ServiceEntry>,
    },
    ServiceValue {
        kind: ServiceKind,
        value: Vec<u8>,
    },
    LogMessage(StatusMessage),
}

/// Commands sent from the display thread to the bluetooth thread.
#[derive(Debug, Clone)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    SelectPeer(String),
    Connect,
    Disconnect,
    SelectService(Uuid),
    WriteService(Uuid, Vec<u8>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
