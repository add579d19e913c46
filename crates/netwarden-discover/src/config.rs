//! Configuration for the netwarden presence monitor.

use std::time::Duration;

use ipnet::IpNet;
use netwarden_core::Role;
use serde::Deserialize;

use crate::error::ProbeError;

/// Top-level discover configuration.
///
/// Loaded from the `netwarden.toml` `[discover]` section or
/// `NETWARDEN__DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// CIDR of the segment to sweep.
    #[serde(default = "default_network_range")]
    pub network_range: String,

    /// Sleep between sweeps, in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Per-host probe timeout handed to nmap.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Wall-clock cap on one whole sweep.
    #[serde(default = "default_sweep_deadline")]
    pub sweep_deadline_secs: u64,

    /// Start the scanner loop as soon as the daemon comes up.
    #[serde(default)]
    pub auto_start: bool,

    /// Root directory of the file-backed audit log.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,

    #[serde(default)]
    pub store: StoreBackend,

    /// Base URL of the physical indicator; signaling is disabled when unset.
    #[serde(default)]
    pub signal_url: Option<String>,

    #[serde(default = "default_signal_timeout")]
    pub signal_timeout_secs: u64,
}

/// Where device rows live.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Neo4j,
}

impl DiscoverConfig {
    /// Parse `network_range` as a CIDR block.
    pub fn range(&self) -> Result<IpNet, ProbeError> {
        self.network_range
            .trim()
            .parse()
            .map_err(|e: ipnet::AddrParseError| ProbeError::InvalidRange {
                range: self.network_range.clone(),
                reason: e.to_string(),
            })
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn sweep_deadline(&self) -> Duration {
        Duration::from_secs(self.sweep_deadline_secs.max(1))
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs(self.signal_timeout_secs.max(1))
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_network_range() -> String {
    "192.168.1.0/24".to_string()
}

fn default_scan_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_sweep_deadline() -> u64 {
    120
}

fn default_audit_dir() -> String {
    "./audit".to_string()
}

fn default_signal_timeout() -> u64 {
    5
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            network_range: default_network_range(),
            scan_interval_secs: default_scan_interval(),
            probe_timeout_secs: default_probe_timeout(),
            sweep_deadline_secs: default_sweep_deadline(),
            auto_start: false,
            audit_dir: default_audit_dir(),
            store: StoreBackend::default(),
            signal_url: None,
            signal_timeout_secs: default_signal_timeout(),
        }
    }
}

/// `[identity]` section: static bearer tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

/// One bearer token and the principal it resolves to.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub username: String,
    pub role: Role,
}
