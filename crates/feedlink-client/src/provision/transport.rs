//! Transport seam for the provisioning channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A nearby unprovisioned appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Advertised display name, e.g. `PROV_PETFEEDER_A1B2C3`. The durable
    /// identity is derived from this at provisioning completion.
    pub name: String,
    /// Transport-specific connection handle (BLE peripheral id).
    pub handle: String,
}

/// Provisioning failures, surfaced synchronously to the initiating flow.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Discovery could not run (no transport, missing permissions).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// The secure session could not be established or was rejected.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Credential transfer was rejected by the appliance.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Connection attempt timed out")]
    ConnectionTimeout,

    #[error("Credential transfer timed out")]
    ProvisioningTimeout,

    /// A secure session is already open on this provisioner.
    #[error("A provisioning session is already active")]
    SessionActive,

    /// The operation requires an open secure session.
    #[error("No provisioning session is open")]
    NoSession,

    /// The operation is not valid in the machine's current state.
    #[error("Operation not valid while {0}")]
    InvalidState(&'static str),
}

/// Short-range transport used to provision one appliance.
///
/// The secured session uses an empty proof-of-possession: the appliance
/// firmware accepts a NULL proof, so the entire trust boundary is physical
/// proximity. This is NOT equivalent to authenticated pairing and
/// implementations must not pretend otherwise.
#[async_trait]
pub trait ProvisioningTransport: Send {
    type Session: Send;

    /// Begin scanning for appliances whose advertised name starts with
    /// `prefix`. Candidates arrive lazily on the returned channel; the
    /// transport may report the same handle repeatedly (the state machine
    /// suppresses duplicates).
    async fn start_scan(
        &mut self,
        prefix: &str,
    ) -> Result<mpsc::Receiver<Candidate>, ProvisionError>;

    /// Stop an in-progress scan. Safe to call when not scanning.
    async fn stop_scan(&mut self);

    /// Establish the secured point-to-point session with a candidate.
    async fn connect(&mut self, candidate: &Candidate) -> Result<Self::Session, ProvisionError>;

    /// Transfer WiFi credentials over the secured session; resolves once
    /// the appliance acknowledges.
    async fn provision(
        &mut self,
        session: &mut Self::Session,
        ssid: &str,
        password: &str,
    ) -> Result<(), ProvisionError>;

    /// Release the secure session. Best effort; failures are swallowed.
    async fn disconnect(&mut self, session: Self::Session);
}
