//! Per-service polling worker
//!
//! Each worker reads its service once per interval and forwards non-empty
//! values to its output sink. Only the attached sink reaches the display.

use crate::domain::display::EventSender;
use crate::domain::error::SessionError;
use crate::domain::models::AppEvent;
use crate::infrastructure::bluetooth::radio::ServiceHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Where a worker's values go. Detached sinks drop values silently.
pub struct OutputSink {
    attached: AtomicBool,
    event_sender: EventSender,
}

impl OutputSink {
    pub fn new(event_sender: EventSender) -> Arc<Self> {
        Arc::new(Self {
            attached: AtomicBool::new(false),
            event_sender,
        })
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn deliver(&self, handle: &ServiceHandle, value: Vec<u8>) {
        if !self.is_attached() {
            trace!(service = %handle.id(), "Dropping value from hidden service");
            return;
        }
        let _ = self.event_sender.send(AppEvent::ServiceValue {
            kind: handle.kind(),
            value,
        });
    }
}

pub struct ServicePollWorker {
    handle: ServiceHandle,
    sink: Arc<OutputSink>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServicePollWorker {
    /// Spawn the polling task. `cancel` is usually a child of the
    /// scheduler's running token.
    pub fn spawn(
        handle: ServiceHandle,
        sink: Arc<OutputSink>,
        cancel: CancellationToken,
        config: &PollConfig,
    ) -> Self {
        debug!(service = %handle.id(), kind = %handle.kind(), "Starting poll worker");
        let task = tokio::spawn(poll_loop(
            handle.clone(),
            sink.clone(),
            cancel.clone(),
            config.interval,
        ));
        Self {
            handle,
            sink,
            cancel,
            task,
        }
    }

    pub fn sink(&self) -> &Arc<OutputSink> {
        &self.sink
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.sink.detach();
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the loop to exit without signalling it.
    pub async fn join(self) {
        let id = self.handle.id();
        if let Err(e) = self.task.await {
            error!(service = %id, "Poll worker ended abnormally: {}", e);
        }
        debug!(service = %id, "Poll worker stopped");
    }
}

async fn poll_loop(
    handle: ServiceHandle,
    sink: Arc<OutputSink>,
    cancel: CancellationToken,
    interval: Duration,
) {
    while !cancel.is_cancelled() {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = handle.read() => result,
        };

        match result {
            Ok(value) if !value.is_empty() => sink.deliver(&handle, value),
            Ok(_) => trace!(service = %handle.id(), "Empty read"),
            Err(reason) => {
                let e = SessionError::PollRead {
                    id: handle.id(),
                    reason,
                };
                warn!("Error during updating data: {}", e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
