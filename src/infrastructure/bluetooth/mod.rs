//! Bluetooth Module
//!
//! Discovery, connection and service polling for BLE peripherals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - driven by BluetoothCommand)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐ ┌───────────────┐ ┌───────────────┐
//! │  ScanLoop  │ │ Connection    │ │ PollScheduler │
//! │            │ │ Session       │ │               │
//! │ - windows  │ │ - busy retry  │ │ - one worker  │
//! │ - registry │ │ - timeout     │ │   per service │
//! │   diffs    │ │ - teardown    │ │ - output sink │
//! └─────┬──────┘ └───────┬───────┘ └───────┬───────┘
//!       │                │                 │
//!       ▼                ▼                 ▼
//!   Scanner          Connector        RemoteService
//!            (radio traits, see [`radio`])
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Collaborator traits and service classification
//! - [`registry`] - Sighting table with staleness eviction
//! - [`scanner`] - Repeating scan windows and display diffs
//! - [`connection`] - Connection state machine
//! - [`poller`] - Per-service poll workers
//! - [`scheduler`] - Worker ownership and switching
//! - [`service`] - Main service coordinator
//! - [`simulated`] - In-process radio for the CLI

pub mod connection;
pub mod poller;
pub mod radio;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod simulated;

#[cfg(test)]
pub mod testing;

// Re-export main service for convenience
pub use service::{run_command_loop, BluetoothService};
