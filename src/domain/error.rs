//! Error taxonomy for the session core.

use thiserror::Error;
use uuid::Uuid;

/// Errors reported by radio collaborators (scanner, connector, transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    /// The local adapter reports "operation already in progress".
    #[error("operation already in progress")]
    Busy,
    #[error("{0}")]
    Failed(String),
}

/// Errors surfaced by the discovery/connection session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("scan failed: {0}")]
    ScanFailure(RadioError),
    #[error("{0} is not connectable")]
    NotConnectable(String),
    #[error("{0} is busy (operation already in progress)")]
    ConnectTransientBusy(String),
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailure { address: String, reason: RadioError },
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("connection attempt to {0} was aborted")]
    ConnectAborted(String),
    #[error("failed to disconnect from {address}: {reason}")]
    DisconnectFailure { address: String, reason: RadioError },
    #[error("read from service {id} failed: {reason}")]
    PollRead { id: Uuid, reason: RadioError },
    #[error("write to service {id} failed: {reason}")]
    ServiceWrite { id: Uuid, reason: RadioError },
    #[error("not connected")]
    NotConnected,
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("no peer selected")]
    NoPeerSelected,
    #[error("unknown service {0}")]
    UnknownService(Uuid),
}

pub type SessionResult<T> = Result<T, SessionError>;
