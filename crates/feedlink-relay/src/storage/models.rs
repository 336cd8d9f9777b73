//! Data models for Feedlink relay storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    /// Internal row id; foreign keys use this, the bus uses `device_id`.
    pub id: i64,
    /// Durable appliance identity derived at provisioning.
    pub device_id: String,
    pub name: Option<String>,
    pub max_owners: i64,
    pub registered_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnerLink {
    pub id: i64,
    pub device_row_id: i64,
    pub account_id: String,
    pub linked_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cat {
    pub id: i64,
    pub device_row_id: i64,
    pub rfid: String,
    pub name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: i64,
    pub device_row_id: i64,
    pub hour: i64,
    pub minute: i64,
    pub amount: i64,
    pub enabled: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub device_row_id: i64,
    pub event_type: String,
    /// Enriched event payload as stored, one JSON object.
    pub payload: String,
    /// Server-assigned unix timestamp.
    pub created_at: i64,
}
