//! Known remote service kinds
//!
//! The set of services the toolkit knows how to poll and render is closed:
//! anything else a peer exposes is skipped at discovery time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::{uuid, Uuid};

/// Nordic UART service (text stream over notify/read).
pub const UART_SERVICE_UUID: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Example JSON sensor service (single JSON characteristic, read only).
pub const JSON_SERVICE_UUID: Uuid = uuid!("51ad213f-e568-4e35-84e4-67af89c79ef0");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Uart,
    Json,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Uart, ServiceKind::Json];

    /// Classify a remote service by its UUID.
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Uart => UART_SERVICE_UUID,
            Self::Json => JSON_SERVICE_UUID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uart => "UARTService",
            Self::Json => "JSONService",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uart" | "uartservice" => Ok(Self::Uart),
            "json" | "jsonservice" => Ok(Self::Json),
            other => Err(format!("unknown service kind: {}", other)),
        }
    }
}
