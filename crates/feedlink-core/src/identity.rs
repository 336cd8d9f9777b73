//! Appliance identity derivation.
//!
//! An appliance advertises over BLE as `PROV_PETFEEDER_XXXXXX` while waiting
//! to be provisioned. Its durable identity is that name with the `PROV_`
//! prefix stripped, assigned exactly once when provisioning completes and
//! never regenerated for the same hardware.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix carried only by the provisioning-mode BLE advertisement.
pub const PROV_NAME_PREFIX: &str = "PROV_";

/// Full advertisement prefix used to filter BLE scan results.
pub const SCAN_PREFIX: &str = "PROV_PETFEEDER_";

/// Durable identity of one physical appliance.
///
/// Opaque string token; immutable once assigned. Every subsystem (topics,
/// ownership links, event records) references devices through this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the durable identity from a provisioning-session name.
    ///
    /// `PROV_PETFEEDER_A1B2C3` becomes `PETFEEDER_A1B2C3`. A name without
    /// the prefix passes through unchanged; the scan filter already
    /// restricts candidates to prefixed names.
    pub fn from_advertised_name(name: &str) -> Self {
        Self(name.strip_prefix(PROV_NAME_PREFIX).unwrap_or(name).to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prov_prefix() {
        let id = DeviceId::from_advertised_name("PROV_PETFEEDER_A1B2C3");
        assert_eq!(id.as_str(), "PETFEEDER_A1B2C3");
    }

    #[test]
    fn unprefixed_name_passes_through() {
        let id = DeviceId::from_advertised_name("PETFEEDER_A1B2C3");
        assert_eq!(id.as_str(), "PETFEEDER_A1B2C3");
    }

    #[test]
    fn prefix_stripped_only_once_and_only_at_start() {
        let id = DeviceId::from_advertised_name("PROV_PROV_X");
        assert_eq!(id.as_str(), "PROV_X");

        let id = DeviceId::from_advertised_name("XPROV_Y");
        assert_eq!(id.as_str(), "XPROV_Y");
    }
}
