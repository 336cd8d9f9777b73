//! Database queries for the Feedlink relay.

use feedlink_core::FeedSchedule;
use feedlink_core::db::unix_timestamp;

use super::db::RelayDatabase;
use super::models::{Cat, Device, EventRecord, OwnerLink, ScheduleRow};
use feedlink_core::db::DatabaseError;

impl RelayDatabase {
    // =========================================================================
    // Device queries
    // =========================================================================

    /// Register a device identity, creating the record if it does not exist.
    /// Idempotent: re-registering an existing identity returns the existing
    /// record untouched.
    pub async fn register_device(&self, device_id: &str) -> Result<Device, DatabaseError> {
        sqlx::query("INSERT OR IGNORE INTO devices (device_id, registered_at) VALUES (?, ?)")
            .bind(device_id)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        self.get_device(device_id).await
    }

    /// Get a device by its durable identity.
    pub async fn get_device(&self, device_id: &str) -> Result<Device, DatabaseError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {device_id}")))
    }

    /// Set a device's display name.
    pub async fn rename_device(&self, device_id: &str, name: &str) -> Result<Device, DatabaseError> {
        sqlx::query("UPDATE devices SET name = ? WHERE device_id = ?")
            .bind(name)
            .bind(device_id)
            .execute(self.pool())
            .await?;

        self.get_device(device_id).await
    }

    // =========================================================================
    // Ownership links
    // =========================================================================

    /// Link an account to a device.
    ///
    /// Fails with `Conflict` when the account is already linked and with
    /// `Capacity` when the device is at its owner limit; in both cases no
    /// link is created.
    pub async fn link_owner(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<OwnerLink, DatabaseError> {
        let device = self.get_device(device_id).await?;

        let existing = sqlx::query_as::<_, OwnerLink>(
            "SELECT * FROM device_owners WHERE device_row_id = ? AND account_id = ?",
        )
        .bind(device.id)
        .bind(account_id)
        .fetch_optional(self.pool())
        .await?;
        if existing.is_some() {
            return Err(DatabaseError::Conflict(format!(
                "Account {account_id} already linked to {device_id}"
            )));
        }

        if self.owner_count(device_id).await? >= device.max_owners {
            return Err(DatabaseError::Capacity(format!(
                "Device {device_id} owner limit reached"
            )));
        }

        sqlx::query(
            "INSERT INTO device_owners (device_row_id, account_id, linked_at) VALUES (?, ?, ?)",
        )
        .bind(device.id)
        .bind(account_id)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        sqlx::query_as::<_, OwnerLink>(
            "SELECT * FROM device_owners WHERE device_row_id = ? AND account_id = ?",
        )
        .bind(device.id)
        .bind(account_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Link {account_id}/{device_id}")))
    }

    /// Unlink an account from a device.
    ///
    /// When the last owner unlinks, the device record itself is deleted and
    /// its cats, schedules, and events cascade away (identity retirement).
    /// Returns `true` when the device was deleted.
    pub async fn unlink_owner(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<bool, DatabaseError> {
        let device = self.get_device(device_id).await?;

        sqlx::query("DELETE FROM device_owners WHERE device_row_id = ? AND account_id = ?")
            .bind(device.id)
            .bind(account_id)
            .execute(self.pool())
            .await?;

        if self.owner_count(device_id).await? == 0 {
            sqlx::query("DELETE FROM devices WHERE id = ?")
                .bind(device.id)
                .execute(self.pool())
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Number of accounts linked to a device.
    pub async fn owner_count(&self, device_id: &str) -> Result<i64, DatabaseError> {
        let device = self.get_device(device_id).await?;
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM device_owners WHERE device_row_id = ?")
                .bind(device.id)
                .fetch_one(self.pool())
                .await?;
        Ok(row.0)
    }

    /// Whether an account is linked to a device. An unknown device is simply
    /// not linked, not an error.
    pub async fn is_linked(&self, account_id: &str, device_id: &str) -> Result<bool, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM device_owners ol
             JOIN devices d ON d.id = ol.device_row_id
             WHERE d.device_id = ? AND ol.account_id = ?",
        )
        .bind(device_id)
        .bind(account_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0 > 0)
    }

    /// List devices linked to an account.
    pub async fn list_devices_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT d.* FROM devices d
             JOIN device_owners ol ON d.id = ol.device_row_id
             WHERE ol.account_id = ?
             ORDER BY ol.linked_at",
        )
        .bind(account_id)
        .fetch_all(self.pool())
        .await?;
        Ok(devices)
    }

    // =========================================================================
    // Cats (enrichment facts)
    // =========================================================================

    /// Create or rename the cat mapped to an RFID tag on a device.
    pub async fn upsert_cat(
        &self,
        device_id: &str,
        rfid: &str,
        name: Option<&str>,
    ) -> Result<Cat, DatabaseError> {
        let device = self.get_device(device_id).await?;

        sqlx::query(
            "INSERT INTO cats (device_row_id, rfid, name, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(device_row_id, rfid) DO UPDATE SET name = excluded.name",
        )
        .bind(device.id)
        .bind(rfid)
        .bind(name)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        sqlx::query_as::<_, Cat>("SELECT * FROM cats WHERE device_row_id = ? AND rfid = ?")
            .bind(device.id)
            .bind(rfid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Cat {rfid} on {device_id}")))
    }

    /// List cats registered on a device.
    pub async fn list_cats(&self, device_id: &str) -> Result<Vec<Cat>, DatabaseError> {
        let device = self.get_device(device_id).await?;
        let cats = sqlx::query_as::<_, Cat>(
            "SELECT * FROM cats WHERE device_row_id = ? ORDER BY created_at",
        )
        .bind(device.id)
        .fetch_all(self.pool())
        .await?;
        Ok(cats)
    }

    /// Resolve an RFID tag to a display name.
    ///
    /// Absence of the device, the tag, or a stored name all yield `None`;
    /// enrichment treats that as "unknown", never as an error.
    pub async fn lookup_cat_name(
        &self,
        device_id: &str,
        rfid: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT c.name FROM cats c
             JOIN devices d ON d.id = c.device_row_id
             WHERE d.device_id = ? AND c.rfid = ?",
        )
        .bind(device_id)
        .bind(rfid)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.and_then(|(name,)| name))
    }

    /// Remove a cat mapping. Returns `true` when a row was deleted.
    pub async fn remove_cat(&self, device_id: &str, rfid: &str) -> Result<bool, DatabaseError> {
        let device = self.get_device(device_id).await?;
        let result = sqlx::query("DELETE FROM cats WHERE device_row_id = ? AND rfid = ?")
            .bind(device.id)
            .bind(rfid)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Schedules
    // =========================================================================

    /// Replace a device's feeding schedule wholesale, transactionally.
    pub async fn replace_schedules(
        &self,
        device_id: &str,
        schedules: &[FeedSchedule],
    ) -> Result<Vec<ScheduleRow>, DatabaseError> {
        let device = self.get_device(device_id).await?;

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM schedules WHERE device_row_id = ?")
            .bind(device.id)
            .execute(&mut *tx)
            .await?;
        for entry in schedules {
            sqlx::query(
                "INSERT INTO schedules (device_row_id, hour, minute, amount, enabled)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(device.id)
            .bind(i64::from(entry.hour))
            .bind(i64::from(entry.minute))
            .bind(i64::from(entry.amount))
            .bind(i64::from(entry.enabled))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.list_schedules(device_id).await
    }

    /// List a device's feeding schedule.
    pub async fn list_schedules(&self, device_id: &str) -> Result<Vec<ScheduleRow>, DatabaseError> {
        let device = self.get_device(device_id).await?;
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE device_row_id = ? ORDER BY hour, minute",
        )
        .bind(device.id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Event store
    // =========================================================================

    /// Append one event record. The device must exist at the time of write;
    /// a missing device surfaces as `NotFound` and the caller drops the
    /// message.
    pub async fn insert_event(
        &self,
        device_id: &str,
        event_type: &str,
        payload: &str,
        created_at: i64,
    ) -> Result<(), DatabaseError> {
        let device = self.get_device(device_id).await?;

        sqlx::query(
            "INSERT INTO events (device_row_id, event_type, payload, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(device.id)
        .bind(event_type)
        .bind(payload)
        .bind(created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// List a device's events, newest first.
    pub async fn list_events(
        &self,
        device_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EventRecord>, DatabaseError> {
        let device = self.get_device(device_id).await?;
        let events = sqlx::query_as::<_, EventRecord>(
            "SELECT * FROM events WHERE device_row_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(device.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }

    /// Delete events older than the cutoff. Irreversible; returns the
    /// number of records removed.
    pub async fn prune_events_older_than(&self, days: u32) -> Result<u64, DatabaseError> {
        let cutoff = unix_timestamp() - i64::from(days) * 86_400;
        let result = sqlx::query("DELETE FROM events WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
