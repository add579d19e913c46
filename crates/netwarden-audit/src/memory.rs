//! In-memory audit log for tests and ephemeral runs.

use std::sync::Mutex;

use netwarden_core::AuditEvent;

use crate::{verify_records, AuditError, AuditLog, AuditQuery, AuditRecord};

#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let mut records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        let (seq, prev_hash) = records
            .last()
            .map_or((1, None), |r| (r.seq + 1, Some(r.content_hash.clone())));
        let record = AuditRecord::seal(seq, event, prev_hash)?;
        records.push(record.clone());
        Ok(record)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(query.apply(records.iter().cloned()))
    }

    fn verify_chain(&self) -> Result<u64, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        verify_records(&records)
    }
}
