//! Hand-written radio fakes shared by the unit tests.

use crate::domain::error::RadioError;
use crate::domain::models::{PeerDescriptor, Sighting};
use crate::infrastructure::bluetooth::radio::{Connector, RemoteService, Scanner, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub fn sighting(address: &str, connectable: bool) -> Sighting {
    Sighting {
        address: address.to_string(),
        name: Some(format!("peer-{}", address)),
        connectable,
        rssi: -50,
        tx_power: None,
    }
}

pub fn peer(address: &str, connectable: bool) -> PeerDescriptor {
    PeerDescriptor::from_sighting(sighting(address, connectable), Instant::now())
}

/// Scanner returning scripted results, then empty windows.
#[derive(Default)]
pub struct MockScanner {
    script: Mutex<VecDeque<Result<Vec<Sighting>, RadioError>>>,
    pub scans: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<Vec<Sighting>, RadioError>) {
        self.script.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn scan(&self, window: Duration) -> Result<Vec<Sighting>, RadioError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(window).await;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn stop(&self) -> Result<(), RadioError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockService {
    uuid: Uuid,
    value: Mutex<Vec<u8>>,
    fail_reads: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: Mutex<Vec<Vec<u8>>>,
}

impl MockService {
    pub fn new(uuid: Uuid, value: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            value: Mutex::new(value.to_vec()),
            fail_reads: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn set_value(&self, value: &[u8]) {
        *self.value.lock().unwrap() = value.to_vec();
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteService for MockService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RadioError::Failed("read failed".to_string()));
        }
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write(&self, data: &[u8]) -> Result<(), RadioError> {
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

pub struct MockTransport {
    address: String,
    services: Vec<Arc<MockService>>,
    fail_disconnect: bool,
    pub disconnected: AtomicBool,
}

impl MockTransport {
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn services(&self) -> Result<Vec<Arc<dyn RemoteService>>, RadioError> {
        Ok(self
            .services
            .iter()
            .map(|s| s.clone() as Arc<dyn RemoteService>)
            .collect())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.disconnected.store(true, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(RadioError::Failed("link already gone".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConnectStep {
    Busy,
    Fail(String),
    /// Never answers; the caller's timeout must fire.
    Hang,
    Succeed,
}

/// Connector replaying scripted steps (defaults to success).
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectStep>>,
    services: Mutex<Vec<Arc<MockService>>>,
    fail_disconnect: AtomicBool,
    pub attempts: AtomicUsize,
    pub transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: Vec<Arc<MockService>>) -> Self {
        let connector = Self::default();
        *connector.services.lock().unwrap() = services;
        connector
    }

    pub fn push(&self, step: ConnectStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn fail_disconnects(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.transports.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        peer: &PeerDescriptor,
        _timeout: Duration,
    ) -> Result<Arc<dyn Transport>, RadioError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectStep::Succeed);
        match step {
            ConnectStep::Busy => Err(RadioError::Busy),
            ConnectStep::Fail(reason) => Err(RadioError::Failed(reason)),
            ConnectStep::Hang => std::future::pending().await,
            ConnectStep::Succeed => {
                let transport = Arc::new(MockTransport {
                    address: peer.address.clone(),
                    services: self.services.lock().unwrap().clone(),
                    fail_disconnect: self.fail_disconnect.load(Ordering::SeqCst),
                    disconnected: AtomicBool::new(false),
                });
                self.transports.lock().unwrap().push(transport.clone());
                Ok(transport)
            }
        }
    }
}
