//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, the connection session and
//! service polling. This is the surface the UI drives.

use crate::domain::display::EventSender;
use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionState, MessageSeverity, PeerDescriptor, ServiceEntry,
    StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::{
    connection::{ConnectionConfig, ConnectionSession},
    poller::PollConfig,
    radio::{Connector, Scanner, ServiceCatalog, ServiceHandle},
    registry::DeviceRegistry,
    scanner::{ScanConfig, ScanLoop},
    scheduler::PollScheduler,
};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    registry: Arc<DeviceRegistry>,
    scan: ScanLoop,
    session: Arc<ConnectionSession>,
    scheduler: Arc<PollScheduler>,
    /// Known-kind services of the current connection.
    services: Vec<ServiceHandle>,
    selected_peer: Option<PeerDescriptor>,
    event_sender: EventSender,
    settings: Arc<Mutex<SettingsService>>,
}

impl BluetoothService {
    /// Create a new Bluetooth service
    pub fn new(
        event_sender: EventSender,
        settings: Arc<Mutex<SettingsService>>,
        scanner: Arc<dyn Scanner>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let (scan_config, connection_config, poll_config, device_timeout, policy) = {
            let settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            let s = settings.get();
            (
                ScanConfig {
                    window: s.scan_window(),
                },
                ConnectionConfig {
                    connect_timeout: s.connect_timeout(),
                    busy_retry_delay: s.busy_retry_delay(),
                    max_busy_retries: s.max_busy_retries,
                },
                PollConfig {
                    interval: s.poll_interval(),
                },
                s.device_timeout(),
                s.switch_policy,
            )
        };

        let registry = Arc::new(DeviceRegistry::new(device_timeout));
        let scheduler = Arc::new(PollScheduler::new(
            event_sender.clone(),
            poll_config,
            policy,
        ));

        Ok(Self {
            scan: ScanLoop::new(scanner, registry.clone(), event_sender.clone(), scan_config),
            session: Arc::new(ConnectionSession::new(
                connector,
                scheduler.clone(),
                event_sender.clone(),
                connection_config,
            )),
            registry,
            scheduler,
            services: Vec::new(),
            selected_peer: None,
            event_sender,
            settings,
        })
    }

    pub fn start_scanning(&mut self) {
        self.scan.start();
    }

    /// Stop scanning; returns once the scan loop has exited.
    pub async fn stop_scanning(&mut self) {
        self.scan.stop().await;
    }

    /// Remember which discovered peer `connect` should use.
    pub fn select_peer(&mut self, address: &str) -> SessionResult<()> {
        let peer = self
            .registry
            .get(address)
            .ok_or_else(|| SessionError::UnknownPeer(address.to_string()))?;
        info!(address = %peer.address, "Peer selected");
        self.selected_peer = Some(peer);
        Ok(())
    }

    /// Connect to the selected peer and publish its services.
    pub async fn connect(&mut self) -> SessionResult<()> {
        let peer = self
            .selected_peer
            .clone()
            .ok_or(SessionError::NoPeerSelected)?;

        let transport = match self.session.connect(&peer).await {
            Ok(transport) => transport,
            Err(e) => {
                // A refused peer leaves the previous link, and its services, in place.
                if self.session.state() != ConnectionState::Connected {
                    self.services.clear();
                }
                return Err(e);
            }
        };

        self.services = match ServiceCatalog::discover(transport.as_ref()).await {
            Ok(services) => services,
            Err(e) => {
                warn!(address = %peer.address, "Service discovery failed: {}", e);
                self.send_log(
                    &format!("Service discovery failed: {}", e),
                    MessageSeverity::Warning,
                );
                Vec::new()
            }
        };

        if let Err(e) = self.remember_peer(&peer.address) {
            warn!("Failed to save connected peer: {}", e);
        }

        let _ = self.event_sender.send(AppEvent::ServicesDiscovered {
            peer: peer.label(),
            services: self
                .services
                .iter()
                .map(|h| ServiceEntry {
                    id: h.id(),
                    kind: h.kind(),
                })
                .collect(),
        });
        Ok(())
    }

    pub async fn disconnect(&mut self) -> SessionResult<()> {
        self.services.clear();
        self.session.disconnect().await
    }

    /// Show the service with `id`, starting its poll worker if needed.
    pub async fn select_service(&mut self, id: Uuid) -> SessionResult<()> {
        let handle = self.find_service(id)?;
        self.scheduler.select_service(handle).await
    }

    pub async fn write_service(&self, id: Uuid, data: &[u8]) -> SessionResult<()> {
        let handle = self.find_service(id)?;
        handle
            .write(data)
            .await
            .map_err(|reason| SessionError::ServiceWrite { id, reason })?;
        info!(service = %id, "Wrote {} bytes", data.len());
        self.send_log(
            &format!("Sent {} bytes to {}", data.len(), handle.kind()),
            MessageSeverity::Success,
        );
        Ok(())
    }

    /// Stop scanning, stop all workers and release the transport.
    pub async fn shutdown(&mut self) {
        info!("Shutting down bluetooth service");
        self.stop_scanning().await;
        if let Err(e) = self.disconnect().await {
            warn!("Disconnect during shutdown: {}", e);
        }
        // Covers workers left behind by a failed disconnect.
        self.scheduler.shutdown().await;
    }

    #[cfg(test)]
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Session handle that outlives a `&mut self` borrow, used to abort a
    /// connect in flight.
    fn session(&self) -> Arc<ConnectionSession> {
        self.session.clone()
    }

    fn find_service(&self, id: Uuid) -> SessionResult<ServiceHandle> {
        if self.session.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.services
            .iter()
            .find(|h| h.id() == id)
            .cloned()
            .ok_or(SessionError::UnknownService(id))
    }

    fn remember_peer(&self, address: &str) -> Result<()> {
        let mut settings = self
            .settings
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?;
        settings.remember_peer(address)
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    /// Execute one UI command. Failures become status messages.
    pub async fn handle_command(&mut self, cmd: BluetoothCommand) {
        let result = match cmd {
            BluetoothCommand::StartScan => {
                self.start_scanning();
                Ok(())
            }
            BluetoothCommand::StopScan => {
                self.stop_scanning().await;
                Ok(())
            }
            BluetoothCommand::SelectPeer(address) => self.select_peer(&address),
            BluetoothCommand::Connect => self.connect().await,
            BluetoothCommand::Disconnect => self.disconnect().await,
            BluetoothCommand::SelectService(id) => self.select_service(id).await,
            BluetoothCommand::WriteService(id, data) => self.write_service(id, &data).await,
            BluetoothCommand::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Command failed: {}", e);
            self.send_log(&e.to_string(), MessageSeverity::Error);
        }
    }
}

const ABORT_RETRY: Duration = Duration::from_millis(10);

/// Drive the service from a command channel until `Shutdown` or until the
/// sender is dropped.
///
/// Commands run one at a time, except that `Disconnect` and `Shutdown`
/// arriving while a connect is in flight abort that attempt. Other commands
/// received meanwhile are queued behind it.
pub async fn run_command_loop(
    mut service: BluetoothService,
    mut commands: mpsc::UnboundedReceiver<BluetoothCommand>,
) {
    let mut queued: VecDeque<BluetoothCommand> = VecDeque::new();
    loop {
        let cmd = match queued.pop_front() {
            Some(cmd) => cmd,
            None => match commands.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            BluetoothCommand::Shutdown => {
                service.handle_command(BluetoothCommand::Shutdown).await;
                return;
            }
            BluetoothCommand::Connect => {
                let session = service.session();
                let connect = service.handle_command(BluetoothCommand::Connect);
                tokio::pin!(connect);
                let mut channel_open = true;
                // Set until the attempt has registered its token and been cancelled.
                let mut abort_wanted = false;
                loop {
                    tokio::select! {
                        _ = &mut connect => break,
                        next = commands.recv(), if channel_open => match next {
                            Some(cmd @ (BluetoothCommand::Disconnect | BluetoothCommand::Shutdown)) => {
                                abort_wanted = !session.abort_pending();
                                queued.push_back(cmd);
                            }
                            Some(cmd) => queued.push_back(cmd),
                            None => {
                                channel_open = false;
                                abort_wanted = !session.abort_pending();
                                queued.push_back(BluetoothCommand::Shutdown);
                            }
                        },
                        _ = tokio::time::sleep(ABORT_RETRY), if abort_wanted => {
                            abort_wanted = !session.abort_pending();
                        }
                    }
                }
            }
            cmd => service.handle_command(cmd).await,
        }
    }
    service.shutdown().await;
}
