//! Resilient MQTT bus client.
//!
//! One persistent connection per process. The initial `connect()` suspends
//! its caller until the broker accepts the session (or rejects it with an
//! unrecoverable error such as bad credentials). After that a background
//! task owns the connection: transport failures are retried on a fixed
//! interval forever and are never surfaced to callers beyond
//! [`BusClient::connection_state`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use feedlink_core::topic::{command_topic, event_topic};
use feedlink_core::wire::{decode_event, encode_command};
use feedlink_core::{BusConfig, Channel, Command, DeviceId, Topic};

use super::subscriptions::SubscriptionTable;
use super::{ConnectionState, EventEnvelope};

/// Errors surfaced by the very first connection attempt.
///
/// Later disconnects are retried silently; they never produce one of these.
#[derive(Debug, thiserror::Error)]
pub enum BusConnectError {
    /// The broker rejected the session (e.g. bad credentials). Retrying
    /// without a configuration change cannot succeed.
    #[error("Bus connection refused: {0}")]
    Refused(String),

    #[error("Bus transport error: {0}")]
    Transport(String),

    #[error("Bus connection timed out")]
    Timeout,
}

/// Handle to the shared bus connection.
///
/// Cheap to clone; all clones share the connection, subscription table, and
/// connection state.
#[derive(Clone)]
pub struct BusClient {
    client: AsyncClient,
    table: SubscriptionTable,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<AtomicBool>,
    namespace: String,
}

impl BusClient {
    /// Open the bus connection and wait for it to become ready.
    ///
    /// Blocks the caller until the first `ConnAck`, bounded by
    /// `config.connect_timeout`. Recoverable transport failures during this
    /// window keep the caller suspended while the background task retries;
    /// only broker rejection fails fast.
    pub async fn connect(config: BusConfig) -> Result<Self, BusConnectError> {
        let client_id = format!("{}-{}", config.client_id_prefix, Uuid::new_v4());
        let mut options =
            MqttOptions::new(client_id, config.broker_host.clone(), config.broker_port);
        options.set_keep_alive(config.keep_alive);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let table = SubscriptionTable::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (gate_tx, gate_rx) = oneshot::channel();

        tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            table.clone(),
            state_tx,
            Arc::clone(&shutdown),
            gate_tx,
            config.reconnect_period,
        ));

        let bus = Self {
            client,
            table,
            state: state_rx,
            shutdown,
            namespace: config.namespace,
        };

        match tokio::time::timeout(config.connect_timeout, gate_rx).await {
            Ok(Ok(Ok(()))) => Ok(bus),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(BusConnectError::Transport(
                "connection task exited".to_owned(),
            )),
            Err(_) => {
                bus.disconnect();
                Err(BusConnectError::Timeout)
            }
        }
    }

    /// Register a listener for a device's event topic and return its event
    /// stream.
    ///
    /// The first registration for a topic issues the network-level
    /// subscribe; later registrations reuse it. Re-registering the same
    /// `listener` name replaces the previous stream rather than doubling
    /// delivery. Active subscriptions are replayed transparently after every
    /// reconnect.
    pub async fn subscribe_to_device(
        &self,
        device_id: &DeviceId,
        listener: &str,
    ) -> mpsc::Receiver<EventEnvelope> {
        let topic = event_topic(&self.namespace, device_id);
        let (rx, first_for_topic) = self.table.register(&topic, listener).await;

        if first_for_topic {
            // Queued by rumqttc when offline; the reconnect replay covers
            // the subscription either way.
            if let Err(e) = self.client.subscribe(&topic, QoS::AtMostOnce).await {
                warn!(topic, error = %e, "Subscribe request not queued");
            } else {
                debug!(topic, listener, "Subscribed to device events");
            }
        }
        rx
    }

    /// Remove all listeners for a device and unsubscribe from the bus.
    /// Safe to call with no active subscription (no-op).
    pub async fn unsubscribe_from_device(&self, device_id: &DeviceId) {
        let topic = event_topic(&self.namespace, device_id);
        if self.table.remove_topic(&topic).await {
            if let Err(e) = self.client.unsubscribe(&topic).await {
                warn!(topic, error = %e, "Unsubscribe request not queued");
            }
        }
    }

    /// Publish a command to a device's command topic.
    ///
    /// Fire-and-forget: QoS 0, no acknowledgement awaited, no retry on
    /// failure. Callers may inspect [`Self::is_connected`] beforehand but
    /// the call never blocks on confirmed delivery.
    pub async fn publish_command(&self, device_id: &DeviceId, command: &Command) {
        let topic = command_topic(&self.namespace, device_id);
        let body = match encode_command(command) {
            Ok(body) => body,
            Err(e) => {
                warn!(topic, error = %e, "Command not serializable, dropped");
                return;
            }
        };
        if let Err(e) = self.client.publish(&topic, QoS::AtMostOnce, false, body).await {
            warn!(topic, error = %e, "Command publish not queued");
        } else {
            debug!(topic, "Command published");
        }
    }

    /// Current connected/not-connected snapshot.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Tear the connection down. Idempotent.
    pub fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.client.try_disconnect();
    }
}

#[allow(clippy::too_many_lines)]
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    table: SubscriptionTable,
    state: watch::Sender<ConnectionState>,
    shutdown: Arc<AtomicBool>,
    gate: oneshot::Sender<Result<(), BusConnectError>>,
    reconnect_period: Duration,
) {
    let mut gate = Some(gate);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let _ = state.send(ConnectionState::Connected);
                if let Some(gate) = gate.take() {
                    let _ = gate.send(Ok(()));
                    info!("Bus connected");
                } else {
                    info!("Bus reconnected");
                }

                // Replay every active subscription so reconnects are
                // invisible to listeners.
                for topic in table.topics().await {
                    if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                        warn!(topic, error = %e, "Subscription replay not queued");
                    } else {
                        debug!(topic, "Subscription replayed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(&table, &publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                // Refusal codes (bad credentials, banned client id) cannot
                // heal by retrying. Reject the initial caller; after that
                // the policy is silent indefinite reconnection.
                if matches!(e, ConnectionError::ConnectionRefused(_)) {
                    if let Some(gate) = gate.take() {
                        let _ = gate.send(Err(BusConnectError::Refused(e.to_string())));
                        break;
                    }
                }

                let _ = state.send(ConnectionState::Reconnecting);
                warn!(error = %e, "Bus connection lost, retrying");
                tokio::time::sleep(reconnect_period).await;
            }
        }
    }

    let _ = state.send(ConnectionState::Disconnected);
}

/// Route one inbound message to its topic's listeners.
///
/// Malformed topics or payloads are dropped with a diagnostic; they never
/// stop delivery of subsequent events.
async fn handle_publish(table: &SubscriptionTable, raw_topic: &str, payload: &[u8]) {
    let topic = match Topic::parse(raw_topic) {
        Ok(topic) if topic.channel == Channel::Event => topic,
        Ok(_) => return,
        Err(e) => {
            warn!(topic = raw_topic, error = %e, "Dropping message on unparseable topic");
            return;
        }
    };

    match decode_event(payload) {
        Ok(event) => {
            table
                .deliver(
                    raw_topic,
                    &EventEnvelope {
                        device_id: topic.device_id,
                        event,
                    },
                )
                .await;
        }
        Err(e) => {
            warn!(topic = raw_topic, error = %e, "Dropping malformed event payload");
        }
    }
}
