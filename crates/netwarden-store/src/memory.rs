//! In-memory device store.
//!
//! A single `RwLock` over the table gives per-table serialization: every
//! operation reads or mutates under one lock acquisition.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use netwarden_core::types::is_connected;
use netwarden_core::{Device, HardwareId};

use crate::{DeviceStore, Renamed, StoreError};

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<HardwareId, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: &HardwareId, f: F) -> Result<Device, StoreError>
    where
        F: FnOnce(&mut Device) + Send,
    {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id).ok_or_else(|| StoreError::NotFound {
            hardware_id: id.clone(),
        })?;
        f(device);
        Ok(device.clone())
    }
}

fn newest_first(mut devices: Vec<Device>) -> Vec<Device> {
    devices.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.hardware_id.cmp(&b.hardware_id))
    });
    devices
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, id: &HardwareId) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .insert(device.hardware_id.clone(), device.clone());
        Ok(())
    }

    async fn create(&self, device: &Device) -> Result<Option<Device>, StoreError> {
        match self.devices.write().await.entry(device.hardware_id.clone()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(device.clone());
                Ok(None)
            }
        }
    }

    async fn touch(
        &self,
        id: &HardwareId,
        address: IpAddr,
        seen_at: DateTime<Utc>,
    ) -> Result<Device, StoreError> {
        self.update(id, |d| {
            d.address = address;
            d.last_seen = d.last_seen.max(seen_at);
            d.disconnected_at = None;
        })
        .await
    }

    async fn mark_disconnected(
        &self,
        id: &HardwareId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut recorded = false;
        self.update(id, |d| {
            if d.disconnected_at.is_none() {
                d.disconnected_at = Some(at);
                recorded = true;
            }
        })
        .await?;
        Ok(recorded)
    }

    async fn list_all(&self) -> Result<Vec<Device>, StoreError> {
        let devices = self.devices.read().await.values().cloned().collect();
        Ok(newest_first(devices))
    }

    async fn list_within(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<Device>, StoreError> {
        let devices = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| is_connected(now, d.last_seen, window))
            .cloned()
            .collect();
        Ok(newest_first(devices))
    }

    async fn set_authorized(&self, id: &HardwareId, value: bool) -> Result<Device, StoreError> {
        self.update(id, |d| d.authorized = value).await
    }

    async fn set_name(&self, id: &HardwareId, name: &str) -> Result<Renamed, StoreError> {
        let mut previous_name = String::new();
        let device = self
            .update(id, |d| {
                previous_name = std::mem::replace(&mut d.display_name, name.to_string());
            })
            .await?;
        Ok(Renamed {
            previous_name,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwarden_core::types::staleness_threshold;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn id(raw: &str) -> HardwareId {
        HardwareId::parse(raw).unwrap()
    }

    async fn seeded(raw: &str, secs: i64) -> (MemoryDeviceStore, HardwareId) {
        let store = MemoryDeviceStore::new();
        let hw = id(raw);
        store
            .upsert(&Device::discovered(hw.clone(), "10.0.0.5".parse().unwrap(), at(secs)))
            .await
            .unwrap();
        (store, hw)
    }

    #[tokio::test]
    async fn test_touch_updates_address_and_clears_disconnect() {
        let (store, hw) = seeded("aa:bb", 0).await;
        assert!(store.mark_disconnected(&hw, at(400)).await.unwrap());

        let device = store
            .touch(&hw, "10.0.0.9".parse().unwrap(), at(500))
            .await
            .unwrap();
        assert_eq!(device.address.to_string(), "10.0.0.9");
        assert_eq!(device.last_seen, at(500));
        assert_eq!(device.first_seen, at(0));
        assert!(device.disconnected_at.is_none());
    }

    #[tokio::test]
    async fn test_create_keeps_existing_row() {
        let (store, hw) = seeded("aa:bb", 0).await;
        store.set_authorized(&hw, true).await.unwrap();
        store.set_name(&hw, "Printer").await.unwrap();

        let late = Device::discovered(hw.clone(), "10.0.0.9".parse().unwrap(), at(30));
        let existing = store.create(&late).await.unwrap().unwrap();
        assert_eq!(existing.address.to_string(), "10.0.0.5");

        let stored = store.get(&hw).await.unwrap().unwrap();
        assert!(stored.authorized);
        assert_eq!(stored.display_name, "Printer");

        let fresh = Device::discovered(id("cc:dd"), "10.0.0.7".parse().unwrap(), at(30));
        assert!(store.create(&fresh).await.unwrap().is_none());
        assert_eq!(store.get(&fresh.hardware_id).await.unwrap().unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_disconnect_is_marked_once_per_absence() {
        let (store, hw) = seeded("aa:bb", 0).await;
        assert!(store.mark_disconnected(&hw, at(400)).await.unwrap());
        assert!(!store.mark_disconnected(&hw, at(401)).await.unwrap());
        let stored = store.get(&hw).await.unwrap().unwrap();
        assert_eq!(stored.disconnected_at, Some(at(400)));

        store.touch(&hw, "10.0.0.5".parse().unwrap(), at(500)).await.unwrap();
        assert!(store.mark_disconnected(&hw, at(900)).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_never_moves_last_seen_backwards() {
        let (store, hw) = seeded("aa:bb", 100).await;
        let device = store
            .touch(&hw, "10.0.0.5".parse().unwrap(), at(50))
            .await
            .unwrap();
        assert_eq!(device.last_seen, at(100));
        assert!(device.first_seen <= device.last_seen);
    }

    #[tokio::test]
    async fn test_update_class_operations_report_not_found() {
        let store = MemoryDeviceStore::new();
        let missing = id("zz:zz");

        assert!(matches!(
            store.set_authorized(&missing, true).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.set_name(&missing, "x").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.touch(&missing, "10.0.0.1".parse().unwrap(), at(0)).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.get(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_name_returns_previous() {
        let (store, hw) = seeded("aa:bb:cc:dd:ee:ff", 0).await;
        let renamed = store.set_name(&hw, "Printer").await.unwrap();
        assert_eq!(renamed.previous_name, "Device-:ee:ff");
        assert_eq!(renamed.device.display_name, "Printer");
    }

    #[tokio::test]
    async fn test_list_within_uses_presence_window() {
        let store = MemoryDeviceStore::new();
        for (raw, secs) in [("aa:01", 0), ("aa:02", 200), ("aa:03", 290)] {
            store
                .upsert(&Device::discovered(id(raw), "10.0.0.1".parse().unwrap(), at(secs)))
                .await
                .unwrap();
        }

        let now = at(300);
        let connected = store.list_within(staleness_threshold(), now).await.unwrap();
        let ids: Vec<&str> = connected.iter().map(|d| d.hardware_id.as_str()).collect();
        assert_eq!(ids, vec!["aa:03", "aa:02"]);

        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }
}
