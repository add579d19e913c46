//! Error types for the netwarden-discover crate.

use netwarden_audit::AuditError;
use netwarden_core::NetwardenError;
use netwarden_store::StoreError;
use thiserror::Error;

/// Failure of the discovery transport itself.
///
/// A probe that fails never yields an empty observation list, so callers can
/// tell "nmap broke" apart from "nothing answered".
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap requires raw-socket privileges: {stderr}")]
    PermissionDenied { stderr: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Sweep exceeded its {secs}s deadline")]
    Timeout { secs: u64 },

    #[error("Invalid address range {range:?}: {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<ProbeError> for NetwardenError {
    fn from(e: ProbeError) -> Self {
        NetwardenError::ProbeFailure(e.to_string())
    }
}

impl From<DiscoverError> for NetwardenError {
    fn from(e: DiscoverError) -> Self {
        match e {
            DiscoverError::Probe(inner) => inner.into(),
            DiscoverError::Store(inner) => inner.into(),
            DiscoverError::Audit(inner) => inner.into(),
            DiscoverError::Config(msg) => NetwardenError::Config(msg),
            DiscoverError::Signal(msg) => NetwardenError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoverError>;

#[cfg(test)]
mod tests {
    use super::*;
    use netwarden_core::HardwareId;

    #[test]
    fn test_probe_errors_surface_as_probe_failure() {
        let err: NetwardenError = DiscoverError::from(ProbeError::PermissionDenied {
            stderr: "You requested a scan type which requires root privileges.".into(),
        })
        .into();
        assert!(matches!(err, NetwardenError::ProbeFailure(_)));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_missing_device_keeps_not_found() {
        let err: NetwardenError = DiscoverError::from(StoreError::NotFound {
            hardware_id: HardwareId::parse("zz:zz").unwrap(),
        })
        .into();
        assert_eq!(err.http_status(), 404);
    }
}
