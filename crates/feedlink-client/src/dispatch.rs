//! Command dispatcher: user intents -> bus publications.
//!
//! Stateless. Feed-now goes straight to the device's command topic; schedule
//! pushes persist the authoritative copy first so the stored rows and the
//! value sent to the appliance are the same object.

use async_trait::async_trait;

use feedlink_core::{Command, DeviceId, FeedSchedule};

use crate::bus::BusClient;

/// Seam over the bus publication side, so dispatch logic is testable
/// without a broker.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_command(&self, device_id: &DeviceId, command: &Command);
}

#[async_trait]
impl CommandPublisher for BusClient {
    async fn publish_command(&self, device_id: &DeviceId, command: &Command) {
        Self::publish_command(self, device_id, command).await;
    }
}

/// Authoritative schedule persistence, implemented by the backend store.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn replace_schedules(
        &self,
        device_id: &DeviceId,
        schedules: &[FeedSchedule],
    ) -> Result<(), String>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid schedule entry: {0}")]
    InvalidSchedule(String),

    #[error("Schedule store rejected update: {0}")]
    Store(String),
}

/// Translates the two user intents into bus publications.
pub struct CommandDispatcher<P> {
    publisher: P,
}

impl<P: CommandPublisher> CommandDispatcher<P> {
    pub const fn new(publisher: P) -> Self {
        Self { publisher }
    }

    /// Dispense `portions` now. Fire-and-forget, like the underlying bus
    /// publish; silent command loss is accepted.
    pub async fn trigger_feed(&self, device_id: &DeviceId, portions: u32) {
        self.publisher
            .publish_command(device_id, &Command::Feed { amount: portions })
            .await;
    }

    /// Replace a device's feeding schedule.
    ///
    /// Validates every entry, persists through `store`, then publishes the
    /// exact same list to the device. A store failure means nothing was
    /// published.
    pub async fn push_schedule(
        &self,
        device_id: &DeviceId,
        schedules: Vec<FeedSchedule>,
        store: &dyn ScheduleStore,
    ) -> Result<(), DispatchError> {
        for entry in &schedules {
            entry
                .validate()
                .map_err(|e| DispatchError::InvalidSchedule(e.to_string()))?;
        }

        store
            .replace_schedules(device_id, &schedules)
            .await
            .map_err(DispatchError::Store)?;

        self.publisher
            .publish_command(device_id, &Command::Schedule { schedules })
            .await;
        Ok(())
    }
}
