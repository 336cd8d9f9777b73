//! SQLite storage for the Feedlink relay.

mod db;
mod models;
mod queries;


pub use db::RelayDatabase;
pub use models::{Cat, Device, EventRecord, OwnerLink, ScheduleRow};

pub use feedlink_core::db::DatabaseError;
