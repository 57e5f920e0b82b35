//! Display contract
//!
//! The session core never touches the UI directly. Background tasks push
//! [`AppEvent`]s into an unbounded channel and the thread that owns the UI
//! drains it, applying each event to a [`Display`] in arrival order.

use crate::domain::models::{
    AppEvent, ConnectionState, DeviceDiff, ServiceEntry, StatusMessage,
};
use crate::domain::service_kind::ServiceKind;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<AppEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AppEvent>;

/// Implemented by the UI layer. Every call happens on the draining thread.
pub trait Display {
    fn device_list_changed(&mut self, diff: &DeviceDiff);

    fn connection_status_changed(&mut self, state: ConnectionState, message: &str);

    fn service_value_updated(&mut self, kind: ServiceKind, raw_value: &[u8]);

    fn services_discovered(&mut self, _peer: &str, _services: &[ServiceEntry]) {}

    fn status_message(&mut self, _message: &StatusMessage) {}
}

/// Apply one event. Must stay non-blocking.
pub fn apply_event(display: &mut dyn Display, event: AppEvent) {
    match event {
        AppEvent::DeviceListChanged(diff) => display.device_list_changed(&diff),
        AppEvent::ConnectionStatus { state, message } => {
            display.connection_status_changed(state, &message)
        }
        AppEvent::ServicesDiscovered { peer, services } => {
            display.services_discovered(&peer, &services)
        }
        AppEvent::ServiceValue { kind, value } => display.service_value_updated(kind, &value),
        AppEvent::LogMessage(message) => display.status_message(&message),
    }
}

/// Drain everything currently queued, returning how many events were applied.
pub fn drain_events(rx: &mut EventReceiver, display: &mut dyn Display) -> usize {
    let mut applied = 0;
    while let Ok(event) = rx.try_recv() {
        apply_event(display, event);
        applied += 1;
    }
    applied
}
