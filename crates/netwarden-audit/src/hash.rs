//! BLAKE3 content hashing for tamper evidence.
//!
//! Each record's hash covers its sequence number, the event, and the hash of
//! the previous record, so editing or removing any line breaks the chain.

use netwarden_core::AuditEvent;
use serde::Serialize;

/// Hashable representation of a record (excludes content_hash).
#[derive(Serialize)]
struct HashableRecord<'a> {
    seq: u64,
    event: &'a AuditEvent,
    prev_hash: &'a Option<String>,
}

/// Compute the hex-encoded BLAKE3 hash of a record's content.
pub fn compute_record_hash(
    seq: u64,
    event: &AuditEvent,
    prev_hash: &Option<String>,
) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(&HashableRecord {
        seq,
        event,
        prev_hash,
    })?;
    Ok(blake3::hash(&json).to_hex().to_string())
}
