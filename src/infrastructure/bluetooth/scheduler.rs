//! Poll scheduler
//!
//! Owns at most one [`ServicePollWorker`] per service and decides whose
//! output is visible. All bookkeeping happens under one async lock so the
//! "is it running" check and the spawn are a single step.

use crate::domain::display::EventSender;
use crate::domain::error::{SessionError, SessionResult};
use crate::domain::settings::SwitchPolicy;
use crate::infrastructure::bluetooth::poller::{OutputSink, PollConfig, ServicePollWorker};
use crate::infrastructure::bluetooth::radio::ServiceHandle;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Default)]
struct SchedulerState {
    /// Present while a transport is connected. Workers get child tokens.
    running: Option<CancellationToken>,
    workers: HashMap<ServiceHandle, ServicePollWorker>,
    /// Always a key of `workers` when set.
    displayed: Option<ServiceHandle>,
}

pub struct PollScheduler {
    state: Mutex<SchedulerState>,
    event_sender: EventSender,
    config: PollConfig,
    policy: SwitchPolicy,
}

impl PollScheduler {
    pub fn new(event_sender: EventSender, config: PollConfig, policy: SwitchPolicy) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            event_sender,
            config,
            policy,
        }
    }

    /// Allow workers to be spawned. Called once a transport is live.
    pub async fn arm(&self) {
        let mut state = self.state.lock().await;
        if state.running.is_none() {
            state.running = Some(CancellationToken::new());
        }
    }

    #[cfg(test)]
    pub async fn is_armed(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// Make `handle` the visible service, spawning its worker if needed.
    ///
    /// Re-selecting the visible service is a no-op.
    pub async fn select_service(&self, handle: ServiceHandle) -> SessionResult<()> {
        let mut state = self.state.lock().await;

        let Some(running) = state.running.clone() else {
            return Err(SessionError::NotConnected);
        };

        if state.displayed.as_ref() == Some(&handle)
            && state.workers.get(&handle).is_some_and(|w| !w.is_finished())
        {
            debug!(service = %handle.id(), "Service already displayed");
            return Ok(());
        }

        if state.workers.get(&handle).is_some_and(|w| w.is_finished()) {
            if let Some(dead) = state.workers.remove(&handle) {
                debug!(service = %handle.id(), "Replacing exited poll worker");
                dead.join().await;
            }
        }

        if let Some(previous) = state.displayed.take() {
            if previous != handle {
                match self.policy {
                    SwitchPolicy::KeepAlive => {
                        if let Some(worker) = state.workers.get(&previous) {
                            worker.sink().detach();
                        }
                    }
                    SwitchPolicy::StopOnSwitch => {
                        if let Some(worker) = state.workers.remove(&previous) {
                            info!(service = %previous.id(), "Stopping hidden service");
                            worker.stop().await;
                        }
                    }
                }
            }
        }

        match state.workers.get(&handle) {
            Some(worker) => worker.sink().attach(),
            None => {
                // Attached before the task starts so its first read is shown.
                let sink = OutputSink::new(self.event_sender.clone());
                sink.attach();
                let worker = ServicePollWorker::spawn(
                    handle.clone(),
                    sink,
                    running.child_token(),
                    &self.config,
                );
                state.workers.insert(handle.clone(), worker);
                info!(service = %handle.id(), kind = %handle.kind(), "Started polling service");
            }
        }
        state.displayed = Some(handle);
        Ok(())
    }

    /// Stop every worker and wait for all of them to exit.
    ///
    /// Safe to call repeatedly; later calls find nothing to do.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;

        if let Some(running) = state.running.take() {
            running.cancel();
        }
        state.displayed = None;

        let workers: Vec<_> = state.workers.drain().map(|(_, w)| w).collect();
        if workers.is_empty() {
            return;
        }

        info!("Stopping {} poll worker(s)", workers.len());
        for worker in workers {
            worker.sink().detach();
            worker.join().await;
        }
    }

    #[cfg(test)]
    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    #[cfg(test)]
    pub async fn displayed(&self) -> Option<ServiceHandle> {
        self.state.lock().await.displayed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::service_kind::{ServiceKind, JSON_SERVICE_UUID, UART_SERVICE_UUID};
    use crate::infrastructure::bluetooth::testing::MockService;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn scheduler(policy: SwitchPolicy) -> (Arc<PollScheduler>, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PollScheduler::new(tx, PollConfig { interval: INTERVAL }, policy);
        (Arc::new(scheduler), rx)
    }

    fn handle(service: &Arc<MockService>) -> ServiceHandle {
        ServiceHandle::classify(service.clone()).unwrap()
    }

    fn kinds(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<ServiceKind> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::ServiceValue { kind, .. } = event {
                out.push(kind);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_select_requires_connection() {
        let (scheduler, _rx) = scheduler(SwitchPolicy::KeepAlive);
        let uart = MockService::new(UART_SERVICE_UUID, b"1");

        let result = scheduler.select_service(handle(&uart)).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert_eq!(scheduler.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_reselect_spawns_one_worker() {
        let (scheduler, _rx) = scheduler(SwitchPolicy::KeepAlive);
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"1");

        scheduler.select_service(handle(&uart)).await.unwrap();
        scheduler.select_service(handle(&uart)).await.unwrap();
        assert_eq!(scheduler.worker_count().await, 1);

        tokio::time::sleep(Duration::from_millis(45)).await;
        scheduler.shutdown().await;
        // One worker polling once per interval, not two.
        assert!(uart.read_count() <= 6);
    }

    #[tokio::test]
    async fn test_concurrent_selects_spawn_one_worker() {
        let (scheduler, _rx) = scheduler(SwitchPolicy::KeepAlive);
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"1");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                let handle = handle(&uart);
                tokio::spawn(async move { scheduler.select_service(handle).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(scheduler.worker_count().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_keep_alive_switch_hides_previous_output() {
        let (scheduler, mut rx) = scheduler(SwitchPolicy::KeepAlive);
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"1");
        let json = MockService::new(JSON_SERVICE_UUID, b"{}");

        scheduler.select_service(handle(&uart)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        scheduler.select_service(handle(&json)).await.unwrap();
        let _ = kinds(&mut rx);

        let uart_reads = uart.read_count();
        tokio::time::sleep(Duration::from_millis(45)).await;

        assert_eq!(scheduler.worker_count().await, 2);
        assert_eq!(scheduler.displayed().await, Some(handle(&json)));
        assert!(uart.read_count() > uart_reads);
        let seen = kinds(&mut rx);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|k| *k == ServiceKind::Json));

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_on_switch_joins_previous_worker() {
        let (scheduler, _rx) = scheduler(SwitchPolicy::StopOnSwitch);
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"1");
        let json = MockService::new(JSON_SERVICE_UUID, b"{}");

        scheduler.select_service(handle(&uart)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        scheduler.select_service(handle(&json)).await.unwrap();
        assert_eq!(scheduler.worker_count().await, 1);

        let uart_reads = uart.read_count();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(uart.read_count(), uart_reads);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_right_after_select_leaves_nothing_running() {
        let (scheduler, mut rx) = scheduler(SwitchPolicy::KeepAlive);
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"1");

        scheduler.select_service(handle(&uart)).await.unwrap();
        scheduler.shutdown().await;
        scheduler.shutdown().await;

        assert_eq!(scheduler.worker_count().await, 0);
        assert_eq!(scheduler.displayed().await, None);
        assert!(!scheduler.is_armed().await);

        let reads = uart.read_count();
        let _ = kinds(&mut rx);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(uart.read_count(), reads);
        assert!(kinds(&mut rx).is_empty());

        let result = scheduler.select_service(handle(&uart)).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert_eq!(scheduler.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_rearm_after_shutdown() {
        let (scheduler, _rx) = scheduler(SwitchPolicy::KeepAlive);
        let uart = MockService::new(UART_SERVICE_UUID, b"1");

        scheduler.arm().await;
        scheduler.select_service(handle(&uart)).await.unwrap();
        scheduler.shutdown().await;

        scheduler.arm().await;
        scheduler.select_service(handle(&uart)).await.unwrap();
        assert_eq!(scheduler.worker_count().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_read_reaches_display() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = PollScheduler::new(
            tx,
            PollConfig {
                interval: Duration::from_secs(3600),
            },
            SwitchPolicy::KeepAlive,
        );
        scheduler.arm().await;
        let uart = MockService::new(UART_SERVICE_UUID, b"first");

        scheduler.select_service(handle(&uart)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            AppEvent::ServiceValue { kind, value } => {
                assert_eq!(kind, ServiceKind::Uart);
                assert_eq!(value, b"first".to_vec());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(uart.read_count(), 1);
        scheduler.shutdown().await;
    }
}
