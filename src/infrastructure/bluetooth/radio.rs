//! Radio collaborator seams
//!
//! The on-air protocol lives behind these traits. The session core only
//! scans, connects, enumerates services and reads/writes them.

use crate::domain::error::RadioError;
use crate::domain::models::{PeerDescriptor, Sighting};
use crate::domain::service_kind::ServiceKind;
use async_trait::async_trait;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Peer discovery.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan for `window` and return every sighting collected.
    async fn scan(&self, window: Duration) -> Result<Vec<Sighting>, RadioError>;

    /// Stop any scan still running on the adapter.
    async fn stop(&self) -> Result<(), RadioError>;
}

/// Connection establishment.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        peer: &PeerDescriptor,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, RadioError>;
}

/// A live connection returned by [`Connector::connect`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn address(&self) -> &str;

    async fn services(&self) -> Result<Vec<Arc<dyn RemoteService>>, RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;
}

/// A data endpoint on a connected peer.
#[async_trait]
pub trait RemoteService: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, RadioError>;

    async fn write(&self, data: &[u8]) -> Result<(), RadioError>;
}

/// A classified remote service.
///
/// Equality and hashing use the service identity only, so two handles to the
/// same physical service compare equal.
#[derive(Clone)]
pub struct ServiceHandle {
    id: Uuid,
    kind: ServiceKind,
    remote: Arc<dyn RemoteService>,
}

impl ServiceHandle {
    /// Returns `None` for services of an unknown kind.
    pub fn classify(remote: Arc<dyn RemoteService>) -> Option<Self> {
        let id = remote.uuid();
        let kind = ServiceKind::from_uuid(id)?;
        Some(Self { id, kind, remote })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub async fn read(&self) -> Result<Vec<u8>, RadioError> {
        self.remote.read().await
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), RadioError> {
        self.remote.write(data).await
    }
}

impl PartialEq for ServiceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceHandle {}

impl Hash for ServiceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Enumerates the services of a live transport, keeping only known kinds.
pub struct ServiceCatalog;

impl ServiceCatalog {
    pub async fn discover(transport: &dyn Transport) -> Result<Vec<ServiceHandle>, RadioError> {
        let mut handles = Vec::new();
        for remote in transport.services().await? {
            let id = remote.uuid();
            match ServiceHandle::classify(remote) {
                Some(handle) => {
                    tracing::info!(service = %id, kind = %handle.kind(), "Service found");
                    if !handles.contains(&handle) {
                        handles.push(handle);
                    }
                }
                None => tracing::debug!(service = %id, "Skipping unknown service"),
            }
        }
        Ok(handles)
    }
}
