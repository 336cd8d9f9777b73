//! Feedlink Relay Library
//!
//! The backend's system of record for device telemetry:
//! - Single wildcard subscriber across every appliance's event topic
//! - Event enrichment (RFID tag -> cat name) before persistence
//! - SQLite storage for devices, ownership links, cats, schedules, events
//! - Age-based event retention pruning

pub mod ingest;
pub mod retention;
pub mod storage;
