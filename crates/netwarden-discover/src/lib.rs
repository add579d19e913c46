//! netwarden-discover: LAN presence monitor.
//!
//! Sweeps a segment with nmap, reconciles what answered against the device
//! store, records every lifecycle transition in the audit log, and exposes
//! an authenticated operator console over the result.

pub mod config;
pub mod console;
pub mod error;
pub mod identity;
pub mod monitor;
pub mod nmap_xml;
pub mod probe;
pub mod reconcile;
pub mod scanner;
pub mod status;

pub use console::Console;
pub use error::{DiscoverError, ProbeError, Result};
pub use identity::{IdentityProvider, StaticIdentity};
pub use monitor::{Monitor, MonitorParts};
pub use probe::{NmapProber, Prober};
pub use reconcile::ReconcileSummary;
pub use scanner::{ScanStatus, ScannerLoop, StartOutcome, StopOutcome, Sweeper};
pub use status::{HttpSignaler, NoopSignaler, Signaler, StatusAggregator};
