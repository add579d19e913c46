//! Presence reconciliation: diff a sweep against the stored devices.
//!
//! [`plan`] is pure: given the observations, a snapshot of the store, and
//! `now`, it returns the device mutations and audit events for the sweep.
//! [`apply`] then writes them through field-level store operations, so an
//! authorize or rename landing mid-sweep is never overwritten. A create
//! never replaces an existing row and a disconnect is recorded at most once
//! per absence, whatever the snapshot said.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use netwarden_audit::AuditLog;
use netwarden_core::types::{is_connected, staleness_threshold};
use netwarden_core::{AuditEvent, Device, EventKind, HardwareId, Observation};
use netwarden_store::DeviceStore;
use serde::Serialize;

use crate::error::Result;

/// A single write against the Device Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMutation {
    Create(Device),
    Touch {
        hardware_id: HardwareId,
        address: IpAddr,
        seen_at: DateTime<Utc>,
    },
    MarkDisconnected {
        hardware_id: HardwareId,
        at: DateTime<Utc>,
    },
}

/// One lifecycle transition: the write and the event that records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub mutation: DeviceMutation,
    pub event: AuditEvent,
}

/// The outcome of diffing a sweep against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub transitions: Vec<Transition>,
    pub summary: ReconcileSummary,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub observed: u32,
    pub new_count: u32,
    pub moved_count: u32,
    pub reconnected_count: u32,
    pub disconnected_count: u32,
}

/// Collapse a sweep to one address per hardware id.
///
/// Observations are ordered by (id, address) and the last one wins, so a
/// duplicate id resolves to its greatest address regardless of input order.
pub fn dedupe_observations(observations: &[Observation]) -> BTreeMap<HardwareId, IpAddr> {
    let mut sorted: Vec<&Observation> = observations.iter().collect();
    sorted.sort_by(|a, b| {
        a.hardware_id
            .cmp(&b.hardware_id)
            .then_with(|| a.address.cmp(&b.address))
    });

    let mut latest = BTreeMap::new();
    for obs in sorted {
        if let Some(previous) = latest.insert(obs.hardware_id.clone(), obs.address) {
            if previous != obs.address {
                tracing::warn!(
                    hardware_id = %obs.hardware_id,
                    kept = %obs.address,
                    dropped = %previous,
                    "Hardware id answered on two addresses in one sweep"
                );
            }
        }
    }
    latest
}

/// Compute the mutations and events for one sweep.
pub fn plan(observations: &[Observation], snapshot: &[Device], now: DateTime<Utc>) -> ReconcilePlan {
    let observed = dedupe_observations(observations);
    let known: HashMap<&HardwareId, &Device> =
        snapshot.iter().map(|d| (&d.hardware_id, d)).collect();

    let mut transitions = Vec::new();
    let mut summary = ReconcileSummary {
        observed: observed.len() as u32,
        ..Default::default()
    };

    for (id, &address) in &observed {
        match known.get(id) {
            None => {
                let device = Device::discovered(id.clone(), address, now);
                let event =
                    AuditEvent::for_device(EventKind::Connect, &device, "First connection", now);
                summary.new_count += 1;
                transitions.push(Transition {
                    mutation: DeviceMutation::Create(device),
                    event,
                });
            }
            Some(existing) => {
                let details = if existing.address != address {
                    summary.moved_count += 1;
                    format!("IP changed from {} to {}", existing.address, address)
                } else {
                    summary.reconnected_count += 1;
                    "Device reconnected".to_string()
                };

                let mut after = (*existing).clone();
                after.address = address;
                after.last_seen = after.last_seen.max(now);
                let event = AuditEvent::for_device(EventKind::Connect, &after, details, now);
                transitions.push(Transition {
                    mutation: DeviceMutation::Touch {
                        hardware_id: id.clone(),
                        address,
                        seen_at: now,
                    },
                    event,
                });
            }
        }
    }

    // Staleness pass over devices this sweep did not see.
    let observed_addresses: HashSet<IpAddr> = observed.values().copied().collect();
    let mut stale: Vec<&Device> = snapshot
        .iter()
        .filter(|d| !observed.contains_key(&d.hardware_id))
        .filter(|d| !is_connected(now, d.last_seen, staleness_threshold()))
        .filter(|d| !observed_addresses.contains(&d.address))
        .filter(|d| d.disconnected_at.is_none())
        .collect();
    stale.sort_by(|a, b| a.hardware_id.cmp(&b.hardware_id));

    for device in stale {
        let details = format!(
            "Disconnected after {} without response",
            format_elapsed(now - device.last_seen)
        );
        let event = AuditEvent::for_device(EventKind::Disconnect, device, details, now);
        summary.disconnected_count += 1;
        transitions.push(Transition {
            mutation: DeviceMutation::MarkDisconnected {
                hardware_id: device.hardware_id.clone(),
                at: now,
            },
            event,
        });
    }

    ReconcilePlan {
        transitions,
        summary,
    }
}

/// Write a plan: each mutation is persisted before its event is appended.
pub async fn apply(
    plan: &ReconcilePlan,
    store: &dyn DeviceStore,
    audit: &dyn AuditLog,
) -> Result<()> {
    for transition in &plan.transitions {
        let mut event = transition.event.clone();
        match &transition.mutation {
            DeviceMutation::Create(device) => {
                if let Some(existing) = store.create(device).await? {
                    // Created by another writer after the snapshot.
                    let touched = store
                        .touch(&device.hardware_id, device.address, device.last_seen)
                        .await?;
                    event.details = if existing.address != device.address {
                        format!("IP changed from {} to {}", existing.address, device.address)
                    } else {
                        "Device reconnected".to_string()
                    };
                    event.display_name = Some(touched.display_name);
                }
            }
            DeviceMutation::Touch {
                hardware_id,
                address,
                seen_at,
            } => {
                let device = store.touch(hardware_id, *address, *seen_at).await?;
                // Pick up a rename that landed after the snapshot was taken.
                event.display_name = Some(device.display_name);
            }
            DeviceMutation::MarkDisconnected { hardware_id, at } => {
                if !store.mark_disconnected(hardware_id, *at).await? {
                    tracing::debug!(hardware_id = %hardware_id, "Disconnect already recorded");
                    continue;
                }
            }
        }

        tracing::debug!(
            hardware_id = %event.hardware_id,
            kind = %event.kind,
            details = %event.details,
            "Device transition"
        );
        audit.append(event)?;
    }
    Ok(())
}

/// Snapshot the store, plan, and apply one sweep.
pub async fn reconcile(
    observations: &[Observation],
    store: &dyn DeviceStore,
    audit: &dyn AuditLog,
    now: DateTime<Utc>,
) -> Result<ReconcileSummary> {
    let snapshot = store.list_all().await?;
    let plan = plan(observations, &snapshot, now);
    apply(&plan, store, audit).await?;
    Ok(plan.summary)
}

/// Render a duration as e.g. `1h 02m 05s` or `5m 30s`.
pub fn format_elapsed(elapsed: TimeDelta) -> String {
    let total = elapsed.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwarden_audit::{AuditQuery, MemoryAuditLog};
    use netwarden_store::MemoryDeviceStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn obs(id: &str, addr: &str) -> Observation {
        Observation {
            address: addr.parse().unwrap(),
            hardware_id: HardwareId::parse(id).unwrap(),
        }
    }

    fn device(id: &str, addr: &str, last_seen: i64) -> Device {
        Device::discovered(HardwareId::parse(id).unwrap(), addr.parse().unwrap(), at(last_seen))
    }

    #[test]
    fn test_first_observation_creates_device() {
        let plan = plan(&[obs("AA:BB", "10.0.0.5")], &[], at(0));

        assert_eq!(plan.summary.new_count, 1);
        assert_eq!(plan.transitions.len(), 1);
        let DeviceMutation::Create(created) = &plan.transitions[0].mutation else {
            panic!("expected a create");
        };
        assert_eq!(created.hardware_id.as_str(), "aa:bb");
        assert_eq!(created.first_seen, at(0));
        assert_eq!(created.last_seen, at(0));
        assert!(!created.authorized);

        let event = &plan.transitions[0].event;
        assert_eq!(event.kind, EventKind::Connect);
        assert_eq!(event.details, "First connection");
    }

    #[test]
    fn test_address_change_is_reported() {
        let snapshot = [device("aa:bb", "10.0.0.5", 0)];
        let plan = plan(&[obs("aa:bb", "10.0.0.9")], &snapshot, at(30));

        assert_eq!(plan.summary.moved_count, 1);
        let event = &plan.transitions[0].event;
        assert_eq!(event.details, "IP changed from 10.0.0.5 to 10.0.0.9");
        assert_eq!(event.address, Some("10.0.0.9".parse().unwrap()));
        assert_eq!(
            plan.transitions[0].mutation,
            DeviceMutation::Touch {
                hardware_id: HardwareId::parse("aa:bb").unwrap(),
                address: "10.0.0.9".parse().unwrap(),
                seen_at: at(30),
            }
        );
    }

    #[test]
    fn test_same_address_is_a_reconnect() {
        let snapshot = [device("aa:bb", "10.0.0.5", 0)];
        let plan = plan(&[obs("aa:bb", "10.0.0.5")], &snapshot, at(30));

        assert_eq!(plan.summary.reconnected_count, 1);
        assert_eq!(plan.transitions[0].event.details, "Device reconnected");
    }

    #[test]
    fn test_empty_sweep_only_runs_staleness_pass() {
        let snapshot = [device("aa:01", "10.0.0.1", 0), device("aa:02", "10.0.0.2", 200)];
        let plan = plan(&[], &snapshot, at(301));

        assert_eq!(plan.summary.new_count, 0);
        assert_eq!(plan.summary.disconnected_count, 1);
        let event = &plan.transitions[0].event;
        assert_eq!(event.kind, EventKind::Disconnect);
        assert_eq!(event.hardware_id.as_str(), "aa:01");
        assert_eq!(event.details, "Disconnected after 5m 01s without response");
    }

    #[test]
    fn test_staleness_window_boundary() {
        let snapshot = [device("aa:bb", "10.0.0.5", 0)];
        assert!(plan(&[], &snapshot, at(299)).transitions.is_empty());
        assert_eq!(plan(&[], &snapshot, at(300)).summary.disconnected_count, 1);
    }

    #[test]
    fn test_disconnect_is_recorded_once() {
        let mut gone = device("aa:bb", "10.0.0.5", 0);
        gone.disconnected_at = Some(at(400));
        assert!(plan(&[], &[gone], at(900)).transitions.is_empty());
    }

    #[test]
    fn test_stale_device_whose_address_was_observed_is_not_disconnected() {
        let snapshot = [device("aa:bb", "10.0.0.5", 0)];
        let plan = plan(&[obs("cc:dd", "10.0.0.5")], &snapshot, at(600));

        assert_eq!(plan.summary.new_count, 1);
        assert_eq!(plan.summary.disconnected_count, 0);
    }

    #[test]
    fn test_duplicate_id_keeps_greatest_address() {
        let forward = [obs("aa:bb", "10.0.0.9"), obs("aa:bb", "10.0.0.12")];
        let reverse = [obs("aa:bb", "10.0.0.12"), obs("aa:bb", "10.0.0.9")];

        let a = plan(&forward, &[], at(0));
        let b = plan(&reverse, &[], at(0));
        assert_eq!(a, b);
        assert_eq!(a.summary.observed, 1);
        assert_eq!(a.transitions[0].event.address, Some("10.0.0.12".parse().unwrap()));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let snapshot = [
            device("aa:01", "10.0.0.1", 0),
            device("aa:02", "10.0.0.2", 0),
            device("aa:03", "10.0.0.3", 250),
        ];
        let sweep = [
            obs("aa:03", "10.0.0.30"),
            obs("aa:04", "10.0.0.4"),
            obs("aa:01", "10.0.0.1"),
        ];

        let first = plan(&sweep, &snapshot, at(320));
        let second = plan(&sweep, &snapshot, at(320));
        assert_eq!(first, second);
        assert_eq!(
            first.summary,
            ReconcileSummary {
                observed: 3,
                new_count: 1,
                moved_count: 1,
                reconnected_count: 1,
                disconnected_count: 1,
            }
        );
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(TimeDelta::seconds(330)), "5m 30s");
        assert_eq!(format_elapsed(TimeDelta::seconds(3725)), "1h 02m 05s");
        assert_eq!(format_elapsed(TimeDelta::seconds(-5)), "0m 00s");
    }

    #[tokio::test]
    async fn test_reconcile_writes_store_and_audit() {
        let store = MemoryDeviceStore::new();
        let audit = MemoryAuditLog::new();

        let summary = reconcile(&[obs("aa:bb", "10.0.0.5")], &store, &audit, at(0))
            .await
            .unwrap();
        assert_eq!(summary.new_count, 1);

        reconcile(&[obs("aa:bb", "10.0.0.9")], &store, &audit, at(30))
            .await
            .unwrap();

        let stored = store
            .get(&HardwareId::parse("aa:bb").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.address.to_string(), "10.0.0.9");
        assert_eq!(stored.last_seen, at(30));
        assert!(stored.last_seen >= stored.first_seen);

        let records = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].event.details.contains("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_touch_preserves_concurrent_rename() {
        let store = MemoryDeviceStore::new();
        let audit = MemoryAuditLog::new();
        let id = HardwareId::parse("aa:bb").unwrap();
        store.upsert(&device("aa:bb", "10.0.0.5", 0)).await.unwrap();

        let snapshot = store.list_all().await.unwrap();
        let plan = plan(&[obs("aa:bb", "10.0.0.5")], &snapshot, at(30));

        // Operator action lands between snapshot and apply.
        store.set_name(&id, "Printer").await.unwrap();
        store.set_authorized(&id, true).await.unwrap();
        apply(&plan, &store, &audit).await.unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.display_name, "Printer");
        assert!(stored.authorized);
        let records = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(records[0].event.display_name.as_deref(), Some("Printer"));
    }

    #[tokio::test]
    async fn test_stale_create_never_replaces_existing_row() {
        let store = MemoryDeviceStore::new();
        let audit = MemoryAuditLog::new();
        let id = HardwareId::parse("aa:bb").unwrap();
        let sweep = [obs("aa:bb", "10.0.0.5")];

        let first = plan(&sweep, &[], at(0));
        let second = plan(&sweep, &[], at(1));
        apply(&first, &store, &audit).await.unwrap();
        store.set_authorized(&id, true).await.unwrap();
        store.set_name(&id, "Printer").await.unwrap();
        apply(&second, &store, &audit).await.unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.authorized);
        assert_eq!(stored.display_name, "Printer");
        assert_eq!(stored.first_seen, at(0));
        assert_eq!(stored.last_seen, at(1));

        let records = audit.query(&AuditQuery::default()).unwrap();
        let first_connections = records
            .iter()
            .filter(|r| r.event.details == "First connection")
            .count();
        assert_eq!(first_connections, 1);
        assert_eq!(records[0].event.details, "Device reconnected");
        assert_eq!(records[0].event.display_name.as_deref(), Some("Printer"));
    }

    #[tokio::test]
    async fn test_overlapping_staleness_plans_disconnect_once() {
        let store = MemoryDeviceStore::new();
        let audit = MemoryAuditLog::new();
        store.upsert(&device("aa:bb", "10.0.0.5", 0)).await.unwrap();

        let snapshot = store.list_all().await.unwrap();
        let early = plan(&[], &snapshot, at(400));
        let late = plan(&[], &snapshot, at(401));
        apply(&early, &store, &audit).await.unwrap();
        apply(&late, &store, &audit).await.unwrap();

        let records = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.kind, EventKind::Disconnect);
    }
}
