//! netwarden-audit: append-only audit trail.
//!
//! Every device lifecycle transition and operator action is appended as an
//! [`AuditRecord`]. Records are never mutated or deleted; each carries a
//! BLAKE3 hash chained to its predecessor so tampering is detectable.

pub mod hash;
pub mod memory;
pub mod store;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use netwarden_core::{AuditEvent, EventKind, HardwareId, NetwardenError};
use serde::{Deserialize, Serialize};

pub use memory::MemoryAuditLog;
pub use store::FileAuditLog;

/// Default number of records returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Errors that can occur during audit log operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Integrity check failed for audit record {seq}: stored hash does not match content")]
    IntegrityViolation { seq: u64 },

    #[error("Audit chain broken at record {seq}: previous hash does not link")]
    BrokenChain { seq: u64 },

    #[error("Audit log lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<AuditError> for NetwardenError {
    fn from(e: AuditError) -> Self {
        NetwardenError::Persistence(e.to_string())
    }
}

/// One persisted audit event with its position in the hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    pub event: AuditEvent,
    /// Hash of the preceding record (`None` for the first).
    pub prev_hash: Option<String>,
    /// BLAKE3 hash (hex) of `seq`, `event`, and `prev_hash`.
    pub content_hash: String,
}

impl AuditRecord {
    /// Seal an event into a record that follows `prev_hash`.
    pub fn seal(
        seq: u64,
        event: AuditEvent,
        prev_hash: Option<String>,
    ) -> Result<Self, AuditError> {
        let content_hash = hash::compute_record_hash(seq, &event, &prev_hash)?;
        Ok(Self {
            seq,
            event,
            prev_hash,
            content_hash,
        })
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        hash::compute_record_hash(self.seq, &self.event, &self.prev_hash)
            .is_ok_and(|h| h == self.content_hash)
    }
}

/// Query parameters for reading the audit trail.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    /// Maximum number of records returned.
    pub limit: usize,
    pub hardware_id: Option<HardwareId>,
    pub kind: Option<EventKind>,
    /// Only include events at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include events strictly before this time.
    pub to: Option<DateTime<Utc>>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUERY_LIMIT,
            hardware_id: None,
            kind: None,
            from: None,
            to: None,
        }
    }
}

impl AuditQuery {
    /// Day-granular range: `start` inclusive through the whole of `end`.
    pub fn for_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.from = start.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc());
        self.to = end
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc() + TimeDelta::days(1));
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        let event = &record.event;
        if let Some(id) = &self.hardware_id {
            if &event.hardware_id != id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if &event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &event.timestamp >= to {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first, and truncate to the limit.
    pub fn apply(&self, records: impl IntoIterator<Item = AuditRecord>) -> Vec<AuditRecord> {
        let mut results: Vec<AuditRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        results.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then(b.seq.cmp(&a.seq))
        });
        results.truncate(self.limit);
        results
    }
}

/// Trait for audit log persistence backends.
///
/// Implementations must be safe for concurrent appends from the scanner loop
/// and operator actions.
pub trait AuditLog: Send + Sync {
    /// Append an event. Persistence failures are returned, never swallowed.
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError>;

    /// Records matching the query, newest first.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError>;

    /// Walk the whole chain oldest-first and return the number of records verified.
    fn verify_chain(&self) -> Result<u64, AuditError>;
}

/// Check sequence continuity, per-record hashes, and links of records in seq order.
pub(crate) fn verify_records(records: &[AuditRecord]) -> Result<u64, AuditError> {
    let mut prev: Option<&AuditRecord> = None;
    for record in records {
        if !record.verify_integrity() {
            return Err(AuditError::IntegrityViolation { seq: record.seq });
        }
        let expected_seq = prev.map_or(1, |p| p.seq + 1);
        let expected_prev = prev.map(|p| p.content_hash.as_str());
        if record.seq != expected_seq || record.prev_hash.as_deref() != expected_prev {
            return Err(AuditError::BrokenChain { seq: record.seq });
        }
        prev = Some(record);
    }
    Ok(records.len() as u64)
}
