//! Bus-side ingest: subscribe to every appliance's event topic, enrich, and
//! persist.
//!
//! The relay owns one wildcard subscription (`<namespace>/+/event`) and treats
//! payloads as opaque JSON objects. It reads only the `type` tag and, for
//! `cat_identified`, the `rfid` field it enriches by. Anything else the
//! appliance sends is stored verbatim so newer firmware can add fields without
//! a relay release.

use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, Publish, QoS};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use feedlink_core::db::{DatabaseError, unix_timestamp};
use feedlink_core::topic::{Channel, Topic, event_wildcard};
use feedlink_core::wire::UNKNOWN_CAT;
use feedlink_core::{BusConfig, DecodeError};

use crate::storage::RelayDatabase;

/// Why one inbound message was dropped. Ingest errors are per-message; the
/// poll loop logs them and keeps running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Persistence(#[from] DatabaseError),
}

/// Long-lived bridge between the bus and the event store.
pub struct BusRelay {
    db: RelayDatabase,
    namespace: String,
}

impl BusRelay {
    pub fn new(db: RelayDatabase, namespace: impl Into<String>) -> Self {
        Self { db, namespace: namespace.into() }
    }

    /// Run the ingest loop. Never returns under normal operation; transport
    /// failures back off and reconnect, and the wildcard subscription is
    /// re-established on every session start.
    pub async fn run(&self, config: &BusConfig) {
        let client_id = format!("{}-relay-{}", config.client_id_prefix, Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let wildcard = event_wildcard(&self.namespace);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %wildcard, "Bus connected, subscribing to event wildcard");
                    if let Err(error) = client.subscribe(&wildcard, QoS::AtMostOnce).await {
                        warn!(%error, "Failed to queue wildcard subscription");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_publish(&publish).await;
                }
                Ok(_) => {}
                Err(error) => {
                    self.log_poll_error(&error);
                    tokio::time::sleep(config.reconnect_period).await;
                }
            }
        }
    }

    fn log_poll_error(&self, error: &ConnectionError) {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                warn!(?code, "Broker refused connection, retrying");
            }
            other => warn!(error = %other, "Bus connection lost, retrying"),
        }
    }

    async fn handle_publish(&self, publish: &Publish) {
        match self.handle_event_message(&publish.topic, &publish.payload).await {
            Ok(()) => {}
            Err(error) => {
                warn!(topic = %publish.topic, %error, "Dropped inbound event");
            }
        }
    }

    /// Decode, enrich, and persist one inbound message.
    ///
    /// A failure here affects only this message. Malformed topics and
    /// payloads, command-channel traffic, and events from unregistered
    /// appliances are all rejected without touching the store.
    pub async fn handle_event_message(
        &self,
        raw_topic: &str,
        payload: &[u8],
    ) -> Result<(), IngestError> {
        let topic = Topic::parse(raw_topic)?;
        if topic.channel != Channel::Event {
            return Err(DecodeError::Topic(raw_topic.to_owned()).into());
        }

        let mut body: Value = serde_json::from_slice(payload).map_err(DecodeError::from)?;
        let Some(object) = body.as_object_mut() else {
            return Err(DecodeError::Payload("event payload is not an object".to_owned()).into());
        };
        let Some(event_type) = object.get("type").and_then(Value::as_str).map(str::to_owned)
        else {
            return Err(DecodeError::Payload("event payload missing type tag".to_owned()).into());
        };

        if event_type == "cat_identified" {
            let rfid = object.get("rfid").and_then(Value::as_str).map(str::to_owned);
            let name = match rfid {
                Some(ref rfid) => self.resolve_cat_name(topic.device_id.as_str(), rfid).await,
                None => None,
            };
            object.insert(
                "cat_name".to_owned(),
                Value::String(name.unwrap_or_else(|| UNKNOWN_CAT.to_owned())),
            );
        }

        let stored = serde_json::to_string(&body).map_err(DecodeError::from)?;
        self.db
            .insert_event(topic.device_id.as_str(), &event_type, &stored, unix_timestamp())
            .await?;

        debug!(device_id = %topic.device_id, event_type = %event_type, "Event persisted");
        Ok(())
    }

    /// Best-effort enrichment lookup. A store error here degrades to the
    /// unknown sentinel rather than dropping the event.
    async fn resolve_cat_name(&self, device_id: &str, rfid: &str) -> Option<String> {
        match self.db.lookup_cat_name(device_id, rfid).await {
            Ok(name) => name,
            Err(error) => {
                warn!(%device_id, %rfid, %error, "Enrichment lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use feedlink_core::db::unix_timestamp;

    use super::*;

    async fn relay_with_device(device_id: &str) -> BusRelay {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        db.register_device(device_id).await.unwrap();
        BusRelay::new(db, "petfeeder")
    }

    fn payload(record: &crate::storage::EventRecord) -> Value {
        serde_json::from_str(&record.payload).unwrap()
    }

    #[tokio::test]
    async fn persists_event_with_server_timestamp() {
        let relay = relay_with_device("DEV1").await;

        let before = unix_timestamp();
        relay
            .handle_event_message("petfeeder/DEV1/event", br#"{"type":"tank_level","level":42}"#)
            .await
            .unwrap();
        let after = unix_timestamp();

        let events = relay.db.list_events("DEV1", 10, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "tank_level");
        assert_eq!(payload(&events[0])["level"], 42);
        assert!(events[0].created_at >= before && events[0].created_at <= after);
    }

    #[tokio::test]
    async fn enriches_cat_identified_with_stored_name() {
        let relay = relay_with_device("DEV1").await;
        relay.db.upsert_cat("DEV1", "TAG1", Some("Miso")).await.unwrap();

        relay
            .handle_event_message(
                "petfeeder/DEV1/event",
                br#"{"type":"cat_identified","rfid":"TAG1"}"#,
            )
            .await
            .unwrap();

        let events = relay.db.list_events("DEV1", 10, 0).await.unwrap();
        assert_eq!(payload(&events[0])["cat_name"], "Miso");
        assert_eq!(payload(&events[0])["rfid"], "TAG1");
    }

    #[tokio::test]
    async fn unmapped_tag_gets_the_unknown_sentinel() {
        let relay = relay_with_device("DEV1").await;

        relay
            .handle_event_message(
                "petfeeder/DEV1/event",
                br#"{"type":"cat_identified","rfid":"TAG9"}"#,
            )
            .await
            .unwrap();

        let events = relay.db.list_events("DEV1", 10, 0).await.unwrap();
        assert_eq!(payload(&events[0])["cat_name"], UNKNOWN_CAT);
    }

    #[tokio::test]
    async fn malformed_input_is_dropped_without_persisting() {
        let relay = relay_with_device("DEV1").await;

        let cases: [(&str, &[u8]); 4] = [
            ("petfeeder/DEV1/event", b"not json"),
            ("petfeeder/DEV1/event", br#"[1,2,3]"#),
            ("petfeeder/DEV1/event", br#"{"level":42}"#),
            ("petfeeder/DEV1", br#"{"type":"cat_came"}"#),
        ];
        for (topic, body) in cases {
            let result = relay.handle_event_message(topic, body).await;
            assert!(matches!(result, Err(IngestError::Decode(_))), "{topic}");
        }

        assert!(relay.db.list_events("DEV1", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_channel_traffic_is_rejected() {
        let relay = relay_with_device("DEV1").await;

        let result = relay
            .handle_event_message("petfeeder/DEV1/command", br#"{"type":"cat_came"}"#)
            .await;
        assert!(matches!(result, Err(IngestError::Decode(_))));
    }

    #[tokio::test]
    async fn unregistered_appliance_is_rejected() {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        let relay = BusRelay::new(db, "petfeeder");

        let result = relay
            .handle_event_message("petfeeder/GHOST/event", br#"{"type":"cat_came"}"#)
            .await;
        assert!(matches!(
            result,
            Err(IngestError::Persistence(DatabaseError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn unknown_event_types_are_stored_verbatim() {
        let relay = relay_with_device("DEV1").await;

        relay
            .handle_event_message(
                "petfeeder/DEV1/event",
                br#"{"type":"firmware_update","version":"2.1.0"}"#,
            )
            .await
            .unwrap();

        let events = relay.db.list_events("DEV1", 10, 0).await.unwrap();
        assert_eq!(events[0].event_type, "firmware_update");
        assert_eq!(payload(&events[0])["version"], "2.1.0");
    }
}
