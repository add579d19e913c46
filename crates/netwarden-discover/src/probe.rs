//! Prober: one discovery pass over an address range.
//!
//! [`NmapProber`] runs an ARP ping sweep as a child process via
//! `tokio::process::Command` and turns the XML output into
//! [`Observation`]s. The child is killed if the sweep deadline elapses.
//! nmap runs with `--privileged`, so a host without raw-socket capability
//! fails loudly instead of degrading to a MAC-less connect ping.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::IpNet;
use netwarden_core::{HardwareId, Observation};
use tokio::process::Command;

use crate::config::DiscoverConfig;
use crate::error::ProbeError;
use crate::nmap_xml::{self, NmapRun};

/// Source of sweep results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// Observe which (address, hardware id) pairs currently answer in `range`.
    async fn probe(&self, range: &IpNet) -> Result<Vec<Observation>, ProbeError>;
}

/// Wrapper around the nmap binary.
pub struct NmapProber {
    nmap_path: String,
    host_timeout: Duration,
    deadline: Duration,
}

impl NmapProber {
    pub fn new(config: &DiscoverConfig) -> Self {
        Self {
            nmap_path: config.nmap_path.clone(),
            host_timeout: Duration::from_secs(config.probe_timeout_secs.max(1)),
            deadline: config.sweep_deadline(),
        }
    }

    /// Verify nmap is installed and accessible, returning its version banner.
    pub async fn verify_installation(&self) -> Result<String, ProbeError> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| ProbeError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn args(&self, range: &IpNet) -> Vec<String> {
        vec![
            "-sn".to_string(),
            "-PR".to_string(),
            "-n".to_string(),
            "--privileged".to_string(),
            "--host-timeout".to_string(),
            format!("{}s", self.host_timeout.as_secs()),
            "-oX".to_string(),
            "-".to_string(),
            "--noninteractive".to_string(),
            range.to_string(),
        ]
    }
}

#[async_trait]
impl Prober for NmapProber {
    async fn probe(&self, range: &IpNet) -> Result<Vec<Observation>, ProbeError> {
        let start = Instant::now();

        tracing::debug!(target_range = %range, "Starting nmap sweep");

        let child = Command::new(&self.nmap_path)
            .args(self.args(range))
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.deadline, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::NmapNotFound {
                    path: self.nmap_path.clone(),
                })
            }
            Ok(Err(e)) => return Err(ProbeError::Io(e)),
            Err(_) => {
                return Err(ProbeError::Timeout {
                    secs: self.deadline.as_secs(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(exit_failure(output.status.code().unwrap_or(-1), stderr));
        }

        let run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        check_link_layer(&run, &stderr)?;
        let observations = observations_from_run(&run);

        tracing::info!(
            target_range = %range,
            hosts_up = run.hosts.iter().filter(|h| h.is_up()).count(),
            observed = observations.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Nmap sweep complete"
        );

        Ok(observations)
    }
}

const PRIVILEGE_MARKERS: [&str; 4] = [
    "requires root privileges",
    "Operation not permitted",
    "Couldn't open a raw socket",
    "not root",
];

fn lacks_privileges(stderr: &str) -> bool {
    PRIVILEGE_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Classify a non-zero nmap exit.
fn exit_failure(code: i32, stderr: String) -> ProbeError {
    if lacks_privileges(&stderr) {
        ProbeError::PermissionDenied { stderr }
    } else {
        ProbeError::NmapFailed { code, stderr }
    }
}

/// Reject a run that reached live hosts without learning a single hardware
/// address while nmap warned about privileges: it fell back to an
/// unprivileged ping and its silence says nothing about presence.
pub fn check_link_layer(run: &NmapRun, stderr: &str) -> Result<(), ProbeError> {
    let live: Vec<_> = run.hosts.iter().filter(|h| h.is_up()).collect();
    if !live.is_empty() && live.iter().all(|h| h.mac().is_none()) && lacks_privileges(stderr) {
        tracing::warn!(hosts_up = live.len(), "Sweep returned no hardware addresses");
        return Err(ProbeError::PermissionDenied {
            stderr: stderr.to_string(),
        });
    }
    Ok(())
}

/// Convert parsed nmap output into observations.
///
/// Only hosts that are up and report both an IPv4 and a MAC address count;
/// the scanning host itself never reports its own MAC.
pub fn observations_from_run(run: &NmapRun) -> Vec<Observation> {
    run.hosts
        .iter()
        .filter(|h| h.is_up())
        .filter_map(|h| {
            let Some(mac) = h.mac() else {
                tracing::debug!(address = ?h.ipv4(), "Skipping host without hardware address");
                return None;
            };
            let address: IpAddr = h.ipv4()?.parse().ok()?;
            let hardware_id = HardwareId::parse(mac).ok()?;
            Some(Observation {
                address,
                hardware_id,
            })
        })
        .collect()
}
