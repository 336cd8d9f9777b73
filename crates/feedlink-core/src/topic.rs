//! Bus topic naming and parsing.
//!
//! Two fixed topic families exist per appliance:
//!
//! - event topic:   `<namespace>/<device_id>/event`   (appliance -> listeners)
//! - command topic: `<namespace>/<device_id>/command` (listeners -> appliance)
//!
//! The backend relay subscribes to `<namespace>/+/event` to cover every
//! appliance with a single subscription.

use std::fmt;

use crate::error::DecodeError;
use crate::identity::DeviceId;

/// Default topic namespace.
pub const DEFAULT_NAMESPACE: &str = "petfeeder";

/// Which direction a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Appliance -> listeners; read-only from the client's perspective.
    Event,
    /// Listeners -> appliance; write-only from the client's perspective.
    Command,
}

impl Channel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed device topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub namespace: String,
    pub device_id: DeviceId,
    pub channel: Channel,
}

impl Topic {
    /// Parse a raw topic string.
    ///
    /// Total over its error type: anything that is not exactly
    /// `<namespace>/<device_id>/<event|command>` is rejected, and the caller
    /// drops the message.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        let mut parts = raw.split('/');
        let (Some(namespace), Some(device_id), Some(channel), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::Topic(raw.to_owned()));
        };

        if namespace.is_empty() || device_id.is_empty() {
            return Err(DecodeError::Topic(raw.to_owned()));
        }

        let channel = match channel {
            "event" => Channel::Event,
            "command" => Channel::Command,
            _ => return Err(DecodeError::Topic(raw.to_owned())),
        };

        Ok(Self {
            namespace: namespace.to_owned(),
            device_id: DeviceId::new(device_id),
            channel,
        })
    }
}

/// Event topic for one appliance: `<ns>/<id>/event`.
pub fn event_topic(namespace: &str, device_id: &DeviceId) -> String {
    format!("{namespace}/{device_id}/event")
}

/// Command topic for one appliance: `<ns>/<id>/command`.
pub fn command_topic(namespace: &str, device_id: &DeviceId) -> String {
    format!("{namespace}/{device_id}/command")
}

/// Wildcard pattern covering every appliance's event topic: `<ns>/+/event`.
pub fn event_wildcard(namespace: &str) -> String {
    format!("{namespace}/+/event")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_device_topics() {
        let id = DeviceId::new("PETFEEDER_A1B2C3");
        assert_eq!(event_topic("petfeeder", &id), "petfeeder/PETFEEDER_A1B2C3/event");
        assert_eq!(
            command_topic("petfeeder", &id),
            "petfeeder/PETFEEDER_A1B2C3/command"
        );
        assert_eq!(event_wildcard("petfeeder"), "petfeeder/+/event");
    }

    #[test]
    fn parse_roundtrips() {
        let topic = Topic::parse("petfeeder/DEV1/event").unwrap();
        assert_eq!(topic.namespace, "petfeeder");
        assert_eq!(topic.device_id.as_str(), "DEV1");
        assert_eq!(topic.channel, Channel::Event);

        let topic = Topic::parse("petfeeder/DEV1/command").unwrap();
        assert_eq!(topic.channel, Channel::Command);
    }

    #[test]
    fn parse_rejects_malformed_topics() {
        for raw in [
            "",
            "petfeeder",
            "petfeeder/DEV1",
            "petfeeder/DEV1/telemetry",
            "petfeeder/DEV1/event/extra",
            "/DEV1/event",
            "petfeeder//event",
        ] {
            assert!(Topic::parse(raw).is_err(), "should reject {raw:?}");
        }
    }
}
