//! Neo4j-backed device store.
//!
//! Devices are `:Device` nodes keyed by a unique `hardware_id`. Each
//! operation is a single Cypher statement, so it is atomic per device.
//! Timestamps are stored as fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so string comparison orders them correctly.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use neo4rs::query;

use netwarden_core::{Device, HardwareId};

use crate::client::GraphClient;
use crate::{DeviceStore, Renamed, StoreError};

impl GraphClient {
    /// Create the uniqueness constraint on `Device.hardware_id`.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.run(query(
            "CREATE CONSTRAINT device_hardware_id IF NOT EXISTS
             FOR (d:Device) REQUIRE d.hardware_id IS UNIQUE",
        ))
        .await
    }

    async fn fetch_devices(&self, q: neo4rs::Query) -> Result<Vec<Device>, StoreError> {
        let rows = self.query_rows(q).await?;
        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            devices.push(row_to_device(&row, "d")?);
        }
        Ok(devices)
    }
}

#[async_trait]
impl DeviceStore for GraphClient {
    async fn get(&self, id: &HardwareId) -> Result<Option<Device>, StoreError> {
        let q = query("MATCH (d:Device {hardware_id: $hardware_id}) RETURN d")
            .param("hardware_id", id.to_string());

        match self.query_one(q).await? {
            Some(row) => Ok(Some(row_to_device(&row, "d")?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        let q = query(
            "MERGE (d:Device {hardware_id: $hardware_id})
             SET d.address = $address, d.authorized = $authorized,
                 d.display_name = $display_name, d.first_seen = $first_seen,
                 d.last_seen = $last_seen, d.disconnected_at = $disconnected_at",
        )
        .param("hardware_id", device.hardware_id.to_string())
        .param("address", device.address.to_string())
        .param("authorized", device.authorized)
        .param("display_name", device.display_name.clone())
        .param("first_seen", ts(&device.first_seen))
        .param("last_seen", ts(&device.last_seen))
        .param("disconnected_at", opt_ts(&device.disconnected_at));

        self.run(q).await
    }

    async fn create(&self, device: &Device) -> Result<Option<Device>, StoreError> {
        let q = query(
            "MERGE (d:Device {hardware_id: $hardware_id})
             ON CREATE SET d.address = $address, d.authorized = $authorized,
                 d.display_name = $display_name, d.first_seen = $first_seen,
                 d.last_seen = $last_seen, d.disconnected_at = $disconnected_at,
                 d.pending_create = true
             WITH d, coalesce(d.pending_create, false) AS created
             REMOVE d.pending_create
             RETURN d, created",
        )
        .param("hardware_id", device.hardware_id.to_string())
        .param("address", device.address.to_string())
        .param("authorized", device.authorized)
        .param("display_name", device.display_name.clone())
        .param("first_seen", ts(&device.first_seen))
        .param("last_seen", ts(&device.last_seen))
        .param("disconnected_at", opt_ts(&device.disconnected_at));

        let row = self
            .query_one(q)
            .await?
            .ok_or_else(|| StoreError::Serialization("MERGE returned no row".into()))?;
        if column::<bool>(&row, "created")? {
            Ok(None)
        } else {
            Ok(Some(row_to_device(&row, "d")?))
        }
    }

    async fn touch(
        &self,
        id: &HardwareId,
        address: IpAddr,
        seen_at: DateTime<Utc>,
    ) -> Result<Device, StoreError> {
        let q = query(
            "MATCH (d:Device {hardware_id: $hardware_id})
             SET d.address = $address,
                 d.last_seen = CASE WHEN d.last_seen < $seen_at THEN $seen_at ELSE d.last_seen END,
                 d.disconnected_at = ''
             RETURN d",
        )
        .param("hardware_id", id.to_string())
        .param("address", address.to_string())
        .param("seen_at", ts(&seen_at));

        self.query_one(q)
            .await?
            .map(|row| row_to_device(&row, "d"))
            .unwrap_or_else(|| Err(not_found(id)))
    }

    async fn mark_disconnected(
        &self,
        id: &HardwareId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let q = query(
            "MATCH (d:Device {hardware_id: $hardware_id})
             WITH d, coalesce(d.disconnected_at, '') = '' AS fresh
             SET d.disconnected_at = CASE WHEN fresh THEN $at ELSE d.disconnected_at END
             RETURN fresh",
        )
        .param("hardware_id", id.to_string())
        .param("at", ts(&at));

        let row = self.query_one(q).await?.ok_or_else(|| not_found(id))?;
        column(&row, "fresh")
    }

    async fn list_all(&self) -> Result<Vec<Device>, StoreError> {
        self.fetch_devices(query(
            "MATCH (d:Device) RETURN d ORDER BY d.last_seen DESC",
        ))
        .await
    }

    async fn list_within(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<Device>, StoreError> {
        let q = query(
            "MATCH (d:Device)
             WHERE d.last_seen > $cutoff
             RETURN d ORDER BY d.last_seen DESC",
        )
        .param("cutoff", ts(&(now - window)));

        self.fetch_devices(q).await
    }

    async fn set_authorized(&self, id: &HardwareId, value: bool) -> Result<Device, StoreError> {
        let q = query(
            "MATCH (d:Device {hardware_id: $hardware_id})
             SET d.authorized = $authorized
             RETURN d",
        )
        .param("hardware_id", id.to_string())
        .param("authorized", value);

        self.query_one(q)
            .await?
            .map(|row| row_to_device(&row, "d"))
            .unwrap_or_else(|| Err(not_found(id)))
    }

    async fn set_name(&self, id: &HardwareId, name: &str) -> Result<Renamed, StoreError> {
        let q = query(
            "MATCH (d:Device {hardware_id: $hardware_id})
             WITH d, d.display_name AS previous
             SET d.display_name = $name
             RETURN d, previous",
        )
        .param("hardware_id", id.to_string())
        .param("name", name.to_string());

        let row = self.query_one(q).await?.ok_or_else(|| not_found(id))?;
        let previous_name: String = column(&row, "previous")?;
        Ok(Renamed {
            previous_name,
            device: row_to_device(&row, "d")?,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn not_found(id: &HardwareId) -> StoreError {
    StoreError::NotFound {
        hardware_id: id.clone(),
    }
}

fn column<'a, T: serde::Deserialize<'a>>(row: &'a neo4rs::Row, key: &str) -> Result<T, StoreError> {
    row.get(key)
        .map_err(|e| StoreError::Serialization(format!("Failed to read column {key}: {e}")))
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(t: &Option<DateTime<Utc>>) -> String {
    t.as_ref().map(ts).unwrap_or_default()
}

fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("Invalid {field} timestamp {raw:?}: {e}")))
}

/// Convert a `:Device` node in `row[column]` into a [`Device`].
fn row_to_device(row: &neo4rs::Row, column: &str) -> Result<Device, StoreError> {
    let node: neo4rs::Node = row
        .get(column)
        .map_err(|e| StoreError::Serialization(format!("Failed to deserialize node: {e}")))?;

    let field = |key: &str| -> Result<String, StoreError> {
        node.get::<String>(key)
            .map_err(|e| StoreError::Serialization(format!("Device is missing {key}: {e}")))
    };

    let hardware_id = HardwareId::parse(&field("hardware_id")?)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let raw_address = field("address")?;
    let address = raw_address.parse::<IpAddr>().map_err(|e| {
        StoreError::Serialization(format!("Invalid address {raw_address:?}: {e}"))
    })?;
    let disconnected_at = match node.get::<String>("disconnected_at").unwrap_or_default() {
        raw if raw.is_empty() => None,
        raw => Some(parse_ts("disconnected_at", &raw)?),
    };

    Ok(Device {
        hardware_id,
        address,
        authorized: node.get::<bool>("authorized").unwrap_or(false),
        display_name: field("display_name")?,
        first_seen: parse_ts("first_seen", &field("first_seen")?)?,
        last_seen: parse_ts("last_seen", &field("last_seen")?)?,
        disconnected_at,
    })
}
