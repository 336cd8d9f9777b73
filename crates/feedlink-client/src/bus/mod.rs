//! Bus client: one resilient MQTT connection per process, multiplexing many
//! device subscriptions.

mod client;
mod subscriptions;

pub use client::{BusClient, BusConnectError};
pub use subscriptions::SubscriptionTable;

use feedlink_core::{DeviceId, DeviceEvent};

/// Connection lifecycle of a [`BusClient`].
///
/// Only `Connected` is externally significant; the rest exist so callers can
/// render a passive connected/disconnected indicator. Reconnection is never
/// surfaced as an error past the initial `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// A decoded event delivered to a subscription listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub device_id: DeviceId,
    pub event: DeviceEvent,
}
