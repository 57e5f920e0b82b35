//! Console presentation
//!
//! A line oriented [`Display`] used by the CLI. It mirrors the state a list
//! based UI would keep (visible peers, connection state, offered services)
//! and prints every change.

use crate::domain::display::Display;
use crate::domain::models::{
    ConnectionState, DeviceDiff, MessageSeverity, ServiceEntry, StatusMessage,
};
use crate::domain::service_kind::ServiceKind;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{trace, warn};

/// A visible row of the device list.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub label: String,
    pub connectable: bool,
    pub rssi: i16,
}

/// A service payload turned into something printable.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedValue {
    Lines(Vec<String>),
    Hex(String),
    Json(serde_json::Value),
    InvalidJson(String),
}

/// Render a raw payload according to the service that produced it.
pub fn render_value(kind: ServiceKind, raw: &[u8]) -> RenderedValue {
    match kind {
        ServiceKind::Uart => match std::str::from_utf8(raw) {
            Ok(text) => RenderedValue::Lines(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Err(_) => RenderedValue::Hex(to_hex(raw)),
        },
        ServiceKind::Json => match serde_json::from_slice(raw) {
            Ok(value) => RenderedValue::Json(value),
            Err(e) => RenderedValue::InvalidJson(e.to_string()),
        },
    }
}

fn to_hex(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ConsoleDisplay<W: Write> {
    out: W,
    devices: BTreeMap<String, DeviceRow>,
    state: ConnectionState,
    peer: Option<String>,
    services: Vec<ServiceEntry>,
}

impl ConsoleDisplay<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            devices: BTreeMap::new(),
            state: ConnectionState::Idle,
            peer: None,
            services: Vec::new(),
        }
    }

    pub fn devices(&self) -> &BTreeMap<String, DeviceRow> {
        &self.devices
    }

    /// First visible peer that accepts connections.
    pub fn first_connectable(&self) -> Option<&str> {
        self.devices
            .iter()
            .find(|(_, row)| row.connectable)
            .map(|(address, _)| address.as_str())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    /// Label of the peer whose services are on offer.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            warn!("Console write failed: {}", e);
        }
    }
}

impl<W: Write> Display for ConsoleDisplay<W> {
    fn device_list_changed(&mut self, diff: &DeviceDiff) {
        for address in &diff.to_remove {
            if let Some(row) = self.devices.remove(address) {
                self.print(&format!("- {}", row.label));
            }
        }
        for (address, peer) in &diff.to_add {
            let row = DeviceRow {
                label: peer.label(),
                connectable: peer.connectable,
                rssi: peer.rssi,
            };
            let marker = if row.connectable { "" } else { " [not connectable]" };
            let tx = peer
                .tx_power
                .map(|p| format!(", tx {} dBm", p))
                .unwrap_or_default();
            self.print(&format!("+ {} rssi {} dBm{}{}", row.label, row.rssi, tx, marker));
            self.devices.insert(address.clone(), row);
        }
    }

    fn connection_status_changed(&mut self, state: ConnectionState, message: &str) {
        self.state = state;
        if state == ConnectionState::Idle {
            self.services.clear();
            self.peer = None;
        }
        if message.is_empty() {
            self.print(&format!("[{:?}]", state));
        } else {
            self.print(&format!("[{:?}] {}", state, message));
        }
    }

    fn services_discovered(&mut self, peer: &str, services: &[ServiceEntry]) {
        self.peer = Some(peer.to_string());
        self.services = services.to_vec();
        if services.is_empty() {
            self.print(&format!("{} offers no known services", peer));
            return;
        }
        self.print(&format!("Services on {}:", peer));
        for entry in services {
            self.print(&format!("  {} {}", entry.kind, entry.id));
        }
    }

    fn service_value_updated(&mut self, kind: ServiceKind, raw_value: &[u8]) {
        // Values queued before a teardown can still arrive after it.
        if self.state != ConnectionState::Connected {
            trace!(service = %kind, "Dropping value received while not connected");
            return;
        }
        match render_value(kind, raw_value) {
            RenderedValue::Lines(lines) => {
                for line in &lines {
                    self.print(&format!("{} > {}", kind, line));
                }
            }
            RenderedValue::Hex(hex) => self.print(&format!("{} > [{}]", kind, hex)),
            RenderedValue::Json(value) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
                self.print(&format!("{} >\n{}", kind, pretty));
            }
            RenderedValue::InvalidJson(e) => {
                warn!(service = %kind, "Invalid JSON payload: {}", e);
                self.print(&format!("{} > invalid JSON: {}", kind, e));
            }
        }
    }

    fn status_message(&mut self, message: &StatusMessage) {
        let tag = match message.severity {
            MessageSeverity::Info => "info",
            MessageSeverity::Success => "ok",
            MessageSeverity::Warning => "warn",
            MessageSeverity::Error => "error",
        };
        self.print(&format!("({}) {}", tag, message.message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::display::apply_event;
    use crate::domain::models::{AppEvent, PeerDescriptor};
    use crate::domain::service_kind::UART_SERVICE_UUID;
    use std::time::Instant;

    fn peer(address: &str, name: Option<&str>, connectable: bool) -> PeerDescriptor {
        PeerDescriptor {
            address: address.to_string(),
            name: name.map(str::to_string),
            connectable,
            rssi: -50,
            tx_power: None,
            last_seen: Instant::now(),
        }
    }

    fn output(display: ConsoleDisplay<Vec<u8>>) -> String {
        String::from_utf8(display.into_inner()).unwrap()
    }

    #[test]
    fn test_uart_text_is_split_into_lines() {
        assert_eq!(
            render_value(ServiceKind::Uart, b"12.5\r\n13.0\n\n"),
            RenderedValue::Lines(vec!["12.5".to_string(), "13.0".to_string()])
        );
    }

    #[test]
    fn test_uart_binary_falls_back_to_hex() {
        assert_eq!(
            render_value(ServiceKind::Uart, &[0xff, 0x00, 0x1a]),
            RenderedValue::Hex("ff 00 1a".to_string())
        );
    }

    #[test]
    fn test_json_is_parsed_or_reported() {
        match render_value(ServiceKind::Json, br#"{"Sensors":{"Temperature":"21.00 C"}}"#) {
            RenderedValue::Json(value) => {
                assert_eq!(value["Sensors"]["Temperature"], "21.00 C");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            render_value(ServiceKind::Json, b"{not json"),
            RenderedValue::InvalidJson(_)
        ));
    }

    #[test]
    fn test_device_list_follows_diffs() {
        let mut display = ConsoleDisplay::new(Vec::new());

        let mut diff = DeviceDiff::default();
        diff.to_add
            .insert("AA".to_string(), peer("AA", Some("Sensor"), false));
        diff.to_add.insert("BB".to_string(), peer("BB", None, true));
        display.device_list_changed(&diff);
        assert_eq!(display.devices().len(), 2);
        assert_eq!(display.first_connectable(), Some("BB"));

        let mut diff = DeviceDiff::default();
        diff.to_remove.insert("BB".to_string());
        display.device_list_changed(&diff);
        assert_eq!(display.first_connectable(), None);

        let text = output(display);
        assert!(text.contains("+ AA (Sensor)"));
        assert!(text.contains("[not connectable]"));
        assert!(text.contains("- BB"));
    }

    #[test]
    fn test_idle_clears_offered_services() {
        let mut display = ConsoleDisplay::new(Vec::new());
        apply_event(
            &mut display,
            AppEvent::ServicesDiscovered {
                peer: "AA (Sensor)".to_string(),
                services: vec![ServiceEntry {
                    id: UART_SERVICE_UUID,
                    kind: ServiceKind::Uart,
                }],
            },
        );
        assert_eq!(display.services().len(), 1);
        assert_eq!(display.peer(), Some("AA (Sensor)"));

        apply_event(
            &mut display,
            AppEvent::ConnectionStatus {
                state: ConnectionState::Idle,
                message: "Disconnected".to_string(),
            },
        );
        assert_eq!(display.state(), ConnectionState::Idle);
        assert!(display.services().is_empty());
        assert_eq!(display.peer(), None);
    }

    fn connected() -> ConsoleDisplay<Vec<u8>> {
        let mut display = ConsoleDisplay::new(Vec::new());
        display.connection_status_changed(ConnectionState::Connected, "Connected");
        display
    }

    #[test]
    fn test_value_updates_are_rendered_by_kind() {
        let mut display = connected();
        display.service_value_updated(ServiceKind::Uart, b"45.00\n");
        display.service_value_updated(ServiceKind::Json, b"oops");

        let text = output(display);
        assert!(text.contains("UARTService > 45.00"));
        assert!(text.contains("JSONService > invalid JSON"));
    }

    #[test]
    fn test_late_value_after_teardown_is_dropped() {
        let mut display = connected();
        apply_event(
            &mut display,
            AppEvent::ConnectionStatus {
                state: ConnectionState::Idle,
                message: "Disconnected from device".to_string(),
            },
        );
        apply_event(
            &mut display,
            AppEvent::ServiceValue {
                kind: ServiceKind::Uart,
                value: b"99.00\n".to_vec(),
            },
        );

        let text = output(display);
        assert!(text.contains("[Idle] Disconnected from device"));
        assert!(!text.contains("99.00"));
    }
}
