//! Scan Loop Module
//!
//! Runs discovery in a background task, feeds the device registry and
//! publishes add/remove diffs of the device list.

use crate::domain::display::EventSender;
use crate::domain::error::SessionError;
use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::radio::Scanner;
use crate::infrastructure::bluetooth::registry::DeviceRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long each scanner call listens for advertisements.
    pub window: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
        }
    }
}

struct RunningScan {
    cancel: CancellationToken,
    task: JoinHandle<HashSet<String>>,
}

/// Cancellable background discovery loop.
pub struct ScanLoop {
    scanner: Arc<dyn Scanner>,
    registry: Arc<DeviceRegistry>,
    event_sender: EventSender,
    config: ScanConfig,
    /// Addresses the display currently lists. Owned by the task while it runs.
    displayed: HashSet<String>,
    running: Option<RunningScan>,
}

impl ScanLoop {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        registry: Arc<DeviceRegistry>,
        event_sender: EventSender,
        config: ScanConfig,
    ) -> Self {
        Self {
            scanner,
            registry,
            event_sender,
            config,
            displayed: HashSet::new(),
            running: None,
        }
    }

    /// Start scanning. Does nothing if the loop is already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            debug!("Scan loop already running");
            return;
        }

        info!("Starting scan loop (window {:?})", self.config.window);
        self.send_log("Scanning for devices...", MessageSeverity::Info);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_scan_loop(
            self.scanner.clone(),
            self.registry.clone(),
            self.event_sender.clone(),
            self.config.window,
            cancel.clone(),
            std::mem::take(&mut self.displayed),
        ));
        self.running = Some(RunningScan { cancel, task });
    }

    /// Stop scanning and wait for the loop to exit.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        info!("Stopping scan loop...");
        running.cancel.cancel();
        match running.task.await {
            Ok(displayed) => self.displayed = displayed,
            Err(e) => {
                error!("Scan loop ended abnormally: {}", e);
                self.displayed.clear();
            }
        }

        if let Err(e) = self.scanner.stop().await {
            warn!("Scanner stop failed: {}", e);
        }
        self.send_log("Stopped scanning", MessageSeverity::Info);
    }

    #[cfg(test)]
    pub fn is_scanning(&self) -> bool {
        self.running.is_some()
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl Drop for ScanLoop {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn run_scan_loop(
    scanner: Arc<dyn Scanner>,
    registry: Arc<DeviceRegistry>,
    event_sender: EventSender,
    window: Duration,
    cancel: CancellationToken,
    mut displayed: HashSet<String>,
) -> HashSet<String> {
    while !cancel.is_cancelled() {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = scanner.scan(window) => result,
        };

        match result {
            Ok(sightings) => {
                debug!("Scan window returned {} sightings", sightings.len());
                for sighting in sightings {
                    registry.record_sighting(sighting);
                }

                let diff = registry.compute_diff(&displayed);
                if !diff.is_empty() {
                    for address in &diff.to_remove {
                        displayed.remove(address);
                    }
                    displayed.extend(diff.to_add.keys().cloned());
                    let _ = event_sender.send(AppEvent::DeviceListChanged(diff));
                }
            }
            Err(e) => {
                let e = SessionError::ScanFailure(e);
                warn!("Error during continuous scan: {}", e);
                let _ = event_sender.send(AppEvent::LogMessage(StatusMessage {
                    message: "Error during scan".to_string(),
                    severity: MessageSeverity::Error,
                }));
                if let Err(e) = scanner.stop().await {
                    debug!("Scanner stop after failure: {}", e);
                }
                // Back off for one window so a failing adapter does not spin.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }
            }
        }
    }

    debug!("Scan loop exited");
    displayed
}
