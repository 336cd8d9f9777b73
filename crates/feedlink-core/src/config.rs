//! Configuration types shared by the client and relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::SCAN_PREFIX;
use crate::topic::DEFAULT_NAMESPACE;

/// Bus (MQTT) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client-id prefix; a random suffix is appended per connection.
    pub client_id_prefix: String,
    /// Topic namespace all device topics live under.
    pub namespace: String,
    /// Delay between reconnect attempts after a transport failure.
    #[serde(with = "secs")]
    pub reconnect_period: Duration,
    /// Bound on the initial connection attempt.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    #[serde(with = "secs")]
    pub keep_alive: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_owned(),
            broker_port: 1883,
            username: None,
            password: None,
            client_id_prefix: "feedlink".to_owned(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            reconnect_period: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl BusConfig {
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Provisioning-channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Advertised-name prefix to filter scan results by.
    pub scan_prefix: String,
    /// Per-operation bound on connect/provision/disconnect; expiry surfaces
    /// as a timeout error rather than hanging the flow.
    #[serde(with = "secs")]
    pub op_timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            scan_prefix: SCAN_PREFIX.to_owned(),
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// Serialize `Duration` fields as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
