//! Core domain types for LAN presence tracking.
//!
//! A [`Device`] is the mutable "current state" projection of one piece of
//! hardware; [`AuditEvent`]s are the append-only history behind it.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NetwardenError;

// ── Presence window ───────────────────────────────────────────────

/// Seconds without a fresh observation after which a device is disconnected.
pub const STALENESS_THRESHOLD_SECS: i64 = 300;

/// The staleness threshold as a duration.
pub fn staleness_threshold() -> TimeDelta {
    TimeDelta::seconds(STALENESS_THRESHOLD_SECS)
}

/// A device is connected iff `now - last_seen < threshold`.
///
/// Connectivity is never stored; it is always derived at read time.
pub fn is_connected(now: DateTime<Utc>, last_seen: DateTime<Utc>, threshold: TimeDelta) -> bool {
    now - last_seen < threshold
}

// ── Hardware identifier ───────────────────────────────────────────

/// Stable per-device identifier (a MAC address in practice), stored in
/// canonical lower-case form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId(String);

impl HardwareId {
    /// Normalize and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, NetwardenError> {
        let canonical = raw.trim().to_lowercase();
        if canonical.is_empty() {
            return Err(NetwardenError::InvalidInput(
                "hardware identifier must not be empty".to_string(),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Default display name for a newly discovered device.
    pub fn placeholder_name(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
        format!("Device-{tail}")
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HardwareId {
    type Err = NetwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for HardwareId {
    type Error = NetwardenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.0
    }
}

// ── Device ────────────────────────────────────────────────────────

/// One entry per distinct hardware identifier ever observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub hardware_id: HardwareId,
    pub address: IpAddr,
    pub authorized: bool,
    pub display_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set when a disconnect has been recorded for the current absence;
    /// cleared by the next observation.
    #[serde(default)]
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Device {
    /// A device seen for the first time at `now`.
    pub fn discovered(hardware_id: HardwareId, address: IpAddr, now: DateTime<Utc>) -> Self {
        let display_name = hardware_id.placeholder_name();
        Self {
            hardware_id,
            address,
            authorized: false,
            display_name,
            first_seen: now,
            last_seen: now,
            disconnected_at: None,
        }
    }

    pub fn is_connected(&self, now: DateTime<Utc>) -> bool {
        is_connected(now, self.last_seen, staleness_threshold())
    }
}

/// One (address, hardware identifier) pair returned by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub address: IpAddr,
    pub hardware_id: HardwareId,
}

// ── Audit events ──────────────────────────────────────────────────

/// Kind of lifecycle transition or operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connect,
    Disconnect,
    Authorize,
    Revoke,
    NameChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Authorize => "authorize",
            Self::Revoke => "revoke",
            Self::NameChange => "name_change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = NetwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "authorize" => Ok(Self::Authorize),
            "revoke" => Ok(Self::Revoke),
            "name_change" => Ok(Self::NameChange),
            other => Err(NetwardenError::InvalidInput(format!(
                "unknown event kind: {other}"
            ))),
        }
    }
}

/// Immutable record of one transition or operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub hardware_id: HardwareId,
    pub kind: EventKind,
    pub address: Option<IpAddr>,
    pub details: String,
    /// Display name at the time of the event.
    pub display_name: Option<String>,
}

impl AuditEvent {
    /// Build an event snapshotting the device's current address and name.
    pub fn for_device(
        kind: EventKind,
        device: &Device,
        details: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            hardware_id: device.hardware_id.clone(),
            kind,
            address: Some(device.address),
            details: details.into(),
            display_name: Some(device.display_name.clone()),
        }
    }
}

// ── Network status ────────────────────────────────────────────────

/// Point-in-time security summary of the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub secure: bool,
    pub connected_count: usize,
    pub unauthorized_count: usize,
}

impl NetworkStatus {
    /// Summarize the devices that are connected at `now`.
    pub fn from_devices<'a>(devices: impl IntoIterator<Item = &'a Device>, now: DateTime<Utc>) -> Self {
        let (connected_count, unauthorized_count) = devices
            .into_iter()
            .filter(|d| d.is_connected(now))
            .fold((0, 0), |(connected, unauthorized), d| {
                (connected + 1, unauthorized + usize::from(!d.authorized))
            });

        Self {
            secure: unauthorized_count == 0,
            connected_count,
            unauthorized_count,
        }
    }
}

// ── Principals ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Observer,
}

/// The authenticated caller of an operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl Principal {
    /// Whether this principal may change device or scanner state.
    pub fn can_mutate(&self) -> bool {
        self.role == Role::Admin
    }
}
