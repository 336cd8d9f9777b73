//! Feedlink Client Library
//!
//! Client-side connectivity for Feedlink:
//! - Resilient bus client with per-device subscriptions and reconnect replay
//! - BLE provisioning channel (scan, secure session, credential transfer)
//! - Command dispatcher for feed-now and schedule pushes

pub mod bus;
pub mod dispatch;
pub mod provision;

pub use bus::{BusClient, BusConnectError, ConnectionState, EventEnvelope};
pub use dispatch::{CommandDispatcher, CommandPublisher, DispatchError, ScheduleStore};
pub use provision::{Candidate, ProvisionError, ProvisionState, Provisioner, ProvisioningTransport};
