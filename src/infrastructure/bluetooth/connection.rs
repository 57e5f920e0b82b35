//! Connection Session Module
//!
//! Owns the single live transport. Connect and disconnect requests are
//! serialized through one async lock; the observable state moves through
//! `Idle -> Connecting -> Connected -> Disconnecting -> Idle`.

use crate::domain::display::EventSender;
use crate::domain::error::{RadioError, SessionError, SessionResult};
use crate::domain::models::{AppEvent, ConnectionState, PeerDescriptor};
use crate::infrastructure::bluetooth::radio::{Connector, Transport};
use crate::infrastructure::bluetooth::scheduler::PollScheduler;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
    /// Pause before retrying after a "busy" answer
    pub busy_retry_delay: Duration,
    /// How many times a "busy" answer is retried
    pub max_busy_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            busy_retry_delay: Duration::from_millis(500),
            max_busy_retries: 1,
        }
    }
}

struct ActiveConnection {
    peer: PeerDescriptor,
    transport: Arc<dyn Transport>,
}

pub struct ConnectionSession {
    connector: Arc<dyn Connector>,
    scheduler: Arc<PollScheduler>,
    event_sender: EventSender,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    /// Token of the connect attempt in flight, so `disconnect` can abort it.
    pending: Mutex<Option<CancellationToken>>,
    active: tokio::sync::Mutex<Option<ActiveConnection>>,
}

impl ConnectionSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        scheduler: Arc<PollScheduler>,
        event_sender: EventSender,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            connector,
            scheduler,
            event_sender,
            config,
            state: Mutex::new(ConnectionState::Idle),
            pending: Mutex::new(None),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    #[cfg(test)]
    pub async fn connected_peer(&self) -> Option<PeerDescriptor> {
        self.active.lock().await.as_ref().map(|a| a.peer.clone())
    }

    /// Connect to `peer`, tearing down any existing connection first.
    pub async fn connect(&self, peer: &PeerDescriptor) -> SessionResult<Arc<dyn Transport>> {
        if !peer.connectable {
            info!("{} not connectable.", peer.address);
            self.notify(
                self.state(),
                format!("{} not connectable.", peer.address),
            );
            return Err(SessionError::NotConnectable(peer.address.clone()));
        }

        let mut active = self.active.lock().await;
        if active.is_some() {
            info!("Already connected, disconnecting before connecting to {}", peer.address);
            if let Err(e) = self.teardown(&mut active).await {
                warn!("Disconnect before reconnect reported: {}", e);
            }
        }

        info!("Connecting to {}...", peer.address);
        self.set_state(ConnectionState::Connecting);
        self.notify(
            ConnectionState::Connecting,
            format!("Connecting to {}...", peer.address),
        );

        let cancel = CancellationToken::new();
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(cancel.clone());
        let result = self.connect_with_retry(peer, &cancel).await;
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = None;

        match result {
            Ok(transport) => {
                self.scheduler.arm().await;
                *active = Some(ActiveConnection {
                    peer: peer.clone(),
                    transport: transport.clone(),
                });
                self.set_state(ConnectionState::Connected);
                info!("Connected to {}", transport.address());
                self.notify(ConnectionState::Connected, "Connected".to_string());
                Ok(transport)
            }
            Err(e) => {
                error!("{}", e);
                self.set_state(ConnectionState::Idle);
                self.notify(ConnectionState::Idle, format!("{} not Connected !!!", peer.address));
                Err(e)
            }
        }
    }

    /// Disconnect, stopping every poll worker before the transport goes.
    ///
    /// Aborts a connect in flight. A no-op when already idle.
    pub async fn disconnect(&self) -> SessionResult<()> {
        self.abort_pending();

        let mut active = self.active.lock().await;
        self.teardown(&mut active).await
    }

    /// Cancel the connect attempt in flight, if any. Returns whether there
    /// was one.
    pub fn abort_pending(&self) -> bool {
        match self.pending.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(cancel) => {
                info!("Aborting connection attempt in progress");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn teardown(&self, active: &mut Option<ActiveConnection>) -> SessionResult<()> {
        let Some(connection) = active.take() else {
            return Ok(());
        };

        let address = connection.peer.address.clone();
        self.set_state(ConnectionState::Disconnecting);
        self.notify(
            ConnectionState::Disconnecting,
            format!("Disconnecting from {}...", address),
        );

        self.scheduler.shutdown().await;
        let result = connection.transport.disconnect().await;

        // Forced to idle even when the transport complains.
        self.set_state(ConnectionState::Idle);
        match result {
            Ok(()) => {
                info!("Disconnected from {}", address);
                self.notify(ConnectionState::Idle, "Disconnected from device".to_string());
                Ok(())
            }
            Err(reason) => {
                let e = SessionError::DisconnectFailure { address, reason };
                warn!("{}", e);
                self.notify(ConnectionState::Idle, e.to_string());
                Err(e)
            }
        }
    }

    async fn connect_with_retry(
        &self,
        peer: &PeerDescriptor,
        cancel: &CancellationToken,
    ) -> SessionResult<Arc<dyn Transport>> {
        let mut attempt = 0;
        loop {
            match self.connect_once(peer, cancel).await {
                Err(SessionError::ConnectTransientBusy(address)) => {
                    if attempt >= self.config.max_busy_retries {
                        return Err(SessionError::ConnectFailure {
                            address,
                            reason: RadioError::Busy,
                        });
                    }
                    attempt += 1;
                    warn!(
                        "{} busy, retrying in {:?} (retry {}/{})",
                        address, self.config.busy_retry_delay, attempt, self.config.max_busy_retries
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(SessionError::ConnectAborted(address));
                        }
                        _ = tokio::time::sleep(self.config.busy_retry_delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn connect_once(
        &self,
        peer: &PeerDescriptor,
        cancel: &CancellationToken,
    ) -> SessionResult<Arc<dyn Transport>> {
        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.connector.connect(peer, timeout));

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SessionError::ConnectAborted(peer.address.clone()));
            }
            result = attempt => result,
        };

        match result {
            Err(_elapsed) => Err(SessionError::ConnectTimeout(peer.address.clone())),
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(RadioError::Busy)) => {
                Err(SessionError::ConnectTransientBusy(peer.address.clone()))
            }
            Ok(Err(reason)) => Err(SessionError::ConnectFailure {
                address: peer.address.clone(),
                reason,
            }),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn notify(&self, state: ConnectionState, message: String) {
        let _ = self
            .event_sender
            .send(AppEvent::ConnectionStatus { state, message });
    }
}
