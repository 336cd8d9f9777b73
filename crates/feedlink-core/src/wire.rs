//! Bus wire format: one JSON object per message.
//!
//! Events travel appliance -> listeners tagged by `type`; commands travel
//! listeners -> appliance tagged by `action`. The relay persists event
//! payloads as opaque JSON and only reads the fields named here; the typed
//! [`DeviceEvent`] decoding is for clients, which drop undecodable payloads
//! with a logged diagnostic.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Sentinel name attached to a `cat_identified` event whose RFID tag has no
/// stored mapping. Absence of an enrichment fact is not an error.
pub const UNKNOWN_CAT: &str = "Unknown cat";

/// Telemetry/event published by an appliance on its event topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// Food was dispensed.
    Dispense { amount: u32 },
    /// An RFID tag was read at the bowl. `cat_name` is absent on the wire
    /// from the appliance; the relay attaches it during enrichment.
    CatIdentified {
        rfid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cat_name: Option<String>,
    },
    CatCame,
    CatLeave,
    /// Remaining tank fill, percent 0-100.
    TankLevel { level: u8 },
    Error { message: String },
}

impl DeviceEvent {
    /// Wire value of the `type` tag.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Dispense { .. } => "dispense",
            Self::CatIdentified { .. } => "cat_identified",
            Self::CatCame => "cat_came",
            Self::CatLeave => "cat_leave",
            Self::TankLevel { .. } => "tank_level",
            Self::Error { .. } => "error",
        }
    }
}

/// Command published to an appliance on its command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Dispense `amount` portions now.
    Feed { amount: u32 },
    /// Replace the appliance's feeding schedule.
    Schedule { schedules: Vec<FeedSchedule> },
}

/// One feeding-schedule entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSchedule {
    pub hour: u8,
    pub minute: u8,
    pub amount: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl FeedSchedule {
    /// Check the wall-clock fields are in range.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.hour > 23 {
            return Err(DecodeError::Payload(format!("hour {} out of range", self.hour)));
        }
        if self.minute > 59 {
            return Err(DecodeError::Payload(format!(
                "minute {} out of range",
                self.minute
            )));
        }
        Ok(())
    }
}

/// Decode an inbound event payload.
pub fn decode_event(payload: &[u8]) -> Result<DeviceEvent, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize a command for publication.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(command)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_event_types() {
        let event = decode_event(br#"{"type":"dispense","amount":2}"#).unwrap();
        assert_eq!(event, DeviceEvent::Dispense { amount: 2 });

        let event = decode_event(br#"{"type":"cat_identified","rfid":"A1"}"#).unwrap();
        assert_eq!(
            event,
            DeviceEvent::CatIdentified { rfid: "A1".into(), cat_name: None }
        );

        let event = decode_event(br#"{"type":"tank_level","level":42}"#).unwrap();
        assert_eq!(event, DeviceEvent::TankLevel { level: 42 });

        let event = decode_event(br#"{"type":"cat_leave"}"#).unwrap();
        assert_eq!(event, DeviceEvent::CatLeave);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(decode_event(b"not json").is_err());
        assert!(decode_event(br#"{"type":"warp_drive"}"#).is_err());
        assert!(decode_event(br#"{"amount":2}"#).is_err());
    }

    #[test]
    fn feed_command_wire_body() {
        let body = encode_command(&Command::Feed { amount: 2 }).unwrap();
        assert_eq!(body, br#"{"action":"feed","amount":2}"#);
    }

    #[test]
    fn schedule_command_includes_entries() {
        let command = Command::Schedule {
            schedules: vec![FeedSchedule { hour: 7, minute: 30, amount: 1, enabled: true }],
        };
        let value: serde_json::Value =
            serde_json::from_slice(&encode_command(&command).unwrap()).unwrap();
        assert_eq!(value["action"], "schedule");
        assert_eq!(value["schedules"][0]["hour"], 7);
        assert_eq!(value["schedules"][0]["minute"], 30);
    }

    #[test]
    fn schedule_enabled_defaults_to_true() {
        let entry: FeedSchedule =
            serde_json::from_str(r#"{"hour":7,"minute":0,"amount":1}"#).unwrap();
        assert!(entry.enabled);
    }

    #[test]
    fn schedule_validation_bounds() {
        let good = FeedSchedule { hour: 23, minute: 59, amount: 1, enabled: true };
        assert!(good.validate().is_ok());

        let bad_hour = FeedSchedule { hour: 24, minute: 0, amount: 1, enabled: true };
        assert!(bad_hour.validate().is_err());

        let bad_minute = FeedSchedule { hour: 0, minute: 60, amount: 1, enabled: true };
        assert!(bad_minute.validate().is_err());
    }
}
