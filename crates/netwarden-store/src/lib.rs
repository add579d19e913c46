//! netwarden-store: the Device Store.
//!
//! Devices are the mutable "current state" projection of the audit trail.
//! Every backend serializes writes per device so the scanner loop and
//! operator actions can touch the same row concurrently without losing
//! updates: field-level operations (`touch`, `set_authorized`, `set_name`)
//! never overwrite fields they do not own.

pub mod client;
pub mod memory;
pub mod neo4j;

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use netwarden_core::{Device, HardwareId, NetwardenError};

pub use client::{GraphClient, Neo4jConfig};
pub use memory::MemoryDeviceStore;

/// Errors from device store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Device not found: {hardware_id}")]
    NotFound { hardware_id: HardwareId },

    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for NetwardenError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { hardware_id } => NetwardenError::NotFound {
                hardware_id: hardware_id.to_string(),
            },
            other => NetwardenError::Persistence(other.to_string()),
        }
    }
}

/// Result of a rename: the name it replaced plus the updated device.
#[derive(Debug, Clone)]
pub struct Renamed {
    pub previous_name: String,
    pub device: Device,
}

/// Durable table of known devices keyed by hardware identifier.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, id: &HardwareId) -> Result<Option<Device>, StoreError>;

    /// Insert or fully replace a device row.
    async fn upsert(&self, device: &Device) -> Result<(), StoreError>;

    /// Insert a device unless its id is already known. Returns the existing
    /// row untouched when there is one.
    async fn create(&self, device: &Device) -> Result<Option<Device>, StoreError>;

    /// Record an observation: update address, advance last_seen (never
    /// backwards), and clear any recorded disconnect.
    async fn touch(
        &self,
        id: &HardwareId,
        address: IpAddr,
        seen_at: DateTime<Utc>,
    ) -> Result<Device, StoreError>;

    /// Note that a disconnect has been recorded for the current absence.
    /// Returns `false` when one was already recorded.
    async fn mark_disconnected(
        &self,
        id: &HardwareId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Every device ever seen, most recently seen first.
    async fn list_all(&self) -> Result<Vec<Device>, StoreError>;

    /// Devices with `now - last_seen < window`, most recently seen first.
    async fn list_within(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<Device>, StoreError>;

    async fn set_authorized(&self, id: &HardwareId, value: bool) -> Result<Device, StoreError>;

    async fn set_name(&self, id: &HardwareId, name: &str) -> Result<Renamed, StoreError>;
}
