//! Provisioning channel: short-range secure session with one appliance.
//!
//! Discovers candidates advertising the known name prefix, establishes a
//! secured link, transfers WiFi credentials, and yields the appliance's
//! durable identity. Strictly sequential; one session per
//! [`Provisioner`] instance at a time.

mod machine;
mod transport;

#[cfg(feature = "ble")]
mod ble;

pub use machine::{ProvisionState, Provisioner};
pub use transport::{Candidate, ProvisionError, ProvisioningTransport};

#[cfg(feature = "ble")]
pub use ble::BleTransport;
