//! BLE provisioning transport backed by btleplug.
//!
//! The appliance firmware exposes a provisioning GATT service while
//! advertising under the `PROV_` name prefix. Credentials are written as a
//! JSON object to the credentials characteristic; the appliance reports the
//! outcome through a notification on the status characteristic. The link is
//! accepted with an empty proof-of-possession, so possession of the radio
//! neighbourhood is the whole trust boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::transport::{Candidate, ProvisionError, ProvisioningTransport};

/// Provisioning GATT service exposed by unprovisioned appliances.
const PROV_SERVICE: Uuid = Uuid::from_u128(0x0000_ffff_0000_1000_8000_0080_5f9b_34fb);
/// Write target for the JSON credential payload.
const CREDENTIALS_CHAR: Uuid = Uuid::from_u128(0x0000_ff01_0000_1000_8000_0080_5f9b_34fb);
/// Notifies the provisioning outcome.
const STATUS_CHAR: Uuid = Uuid::from_u128(0x0000_ff02_0000_1000_8000_0080_5f9b_34fb);

/// BLE transport for the provisioning channel.
pub struct BleTransport {
    adapter: Adapter,
    discovered: Arc<Mutex<HashMap<String, Peripheral>>>,
    scan_task: Option<JoinHandle<()>>,
}

/// An open secure session with one appliance.
pub struct BleSession {
    peripheral: Peripheral,
    credentials: Characteristic,
    status: Characteristic,
}

impl BleTransport {
    /// Bind to the first available Bluetooth adapter.
    pub async fn new() -> Result<Self, ProvisionError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::Discovery("no Bluetooth adapter".to_owned()))?;

        Ok(Self {
            adapter,
            discovered: Arc::new(Mutex::new(HashMap::new())),
            scan_task: None,
        })
    }
}

#[async_trait]
impl ProvisioningTransport for BleTransport {
    type Session = BleSession;

    async fn start_scan(
        &mut self,
        prefix: &str,
    ) -> Result<mpsc::Receiver<Candidate>, ProvisionError> {
        self.stop_scan().await;

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        let adapter = self.adapter.clone();
        let discovered = Arc::clone(&self.discovered);
        let prefix = prefix.to_owned();

        self.scan_task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
                else {
                    continue;
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = properties.local_name else {
                    continue;
                };
                if !name.starts_with(&prefix) {
                    continue;
                }

                let handle = id.to_string();
                if let Ok(mut map) = discovered.lock() {
                    map.insert(handle.clone(), peripheral);
                }
                debug!(name, handle, "Provisioning candidate advertised");
                if tx.send(Candidate { name, handle }).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "Stopping BLE scan failed");
            }
        }
    }

    async fn connect(&mut self, candidate: &Candidate) -> Result<Self::Session, ProvisionError> {
        let peripheral = self
            .discovered
            .lock()
            .map_err(|_| ProvisionError::Connection("scan registry poisoned".to_owned()))?
            .get(&candidate.handle)
            .cloned()
            .ok_or_else(|| ProvisionError::Connection("candidate no longer visible".to_owned()))?;

        peripheral
            .connect()
            .await
            .map_err(|e| ProvisionError::Connection(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| ProvisionError::Connection(e.to_string()))?;

        let mut credentials = None;
        let mut status = None;
        for characteristic in peripheral.characteristics() {
            if characteristic.service_uuid != PROV_SERVICE {
                continue;
            }
            if characteristic.uuid == CREDENTIALS_CHAR {
                credentials = Some(characteristic);
            } else if characteristic.uuid == STATUS_CHAR {
                status = Some(characteristic);
            }
        }
        let (Some(credentials), Some(status)) = (credentials, status) else {
            let _ = peripheral.disconnect().await;
            return Err(ProvisionError::Connection(
                "appliance does not expose the provisioning service".to_owned(),
            ));
        };

        Ok(BleSession { peripheral, credentials, status })
    }

    async fn provision(
        &mut self,
        session: &mut Self::Session,
        ssid: &str,
        password: &str,
    ) -> Result<(), ProvisionError> {
        session
            .peripheral
            .subscribe(&session.status)
            .await
            .map_err(|e| ProvisionError::Provisioning(e.to_string()))?;
        let mut notifications = session
            .peripheral
            .notifications()
            .await
            .map_err(|e| ProvisionError::Provisioning(e.to_string()))?;

        let payload = serde_json::json!({ "ssid": ssid, "password": password });
        session
            .peripheral
            .write(
                &session.credentials,
                payload.to_string().as_bytes(),
                WriteType::WithResponse,
            )
            .await
            .map_err(|e| ProvisionError::Provisioning(e.to_string()))?;

        // The appliance joins the network before acking, so this can take
        // several seconds; the state machine bounds the wait.
        while let Some(notification) = notifications.next().await {
            if notification.uuid != STATUS_CHAR {
                continue;
            }
            let ack: serde_json::Value = serde_json::from_slice(&notification.value)
                .map_err(|e| ProvisionError::Provisioning(format!("bad ack: {e}")))?;
            return match ack.get("status").and_then(serde_json::Value::as_str) {
                Some("ok") => Ok(()),
                other => Err(ProvisionError::Provisioning(format!(
                    "appliance rejected credentials: {other:?}"
                ))),
            };
        }

        Err(ProvisionError::Provisioning(
            "session closed before acknowledgement".to_owned(),
        ))
    }

    async fn disconnect(&mut self, session: Self::Session) {
        if let Err(e) = session.peripheral.disconnect().await {
            warn!(error = %e, "BLE disconnect failed");
        }
    }
}
