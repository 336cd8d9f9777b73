//! Feedlink Core Library
//!
//! Shared functionality for Feedlink components:
//! - Bus wire format (device events and commands)
//! - Topic naming and parsing
//! - Appliance identity derivation
//! - Configuration types
//! - Shared database and tracing helpers

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod topic;
pub mod tracing_init;
pub mod wire;

pub use config::{BusConfig, ProvisionConfig};
pub use error::{DecodeError, Error, Result};
pub use identity::DeviceId;
pub use topic::{Channel, Topic};
pub use wire::{Command, DeviceEvent, FeedSchedule, UNKNOWN_CAT};
