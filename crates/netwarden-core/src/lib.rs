//! netwarden-core: Shared types, configuration, and error handling for netwarden.
//!
//! This crate provides the foundational types used across all netwarden components:
//! - Device and audit event types for presence tracking
//! - The presence window (connected vs. stale) as a pure function of time
//! - Monitor events published on the in-process event bus
//! - Configuration loading
//! - The common error taxonomy

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::NetwardenError;
pub use types::{
    AuditEvent, Device, EventKind, HardwareId, NetworkStatus, Observation, Principal, Role,
};
