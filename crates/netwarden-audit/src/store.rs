//! File-backed audit log.
//!
//! Records are appended as JSON lines to one file per day:
//! ```text
//! {root}/
//!   2025/
//!     10/
//!       09.jsonl
//! ```
//!
//! Files are only ever opened in append mode. On open, existing files are
//! replayed to recover the next sequence number and the chain head. A torn
//! final line left by a crash or a full disk is truncated away first.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use netwarden_core::AuditEvent;

use crate::{verify_records, AuditError, AuditLog, AuditQuery, AuditRecord};

/// Position of the newest record in the chain.
#[derive(Debug, Default)]
struct ChainHead {
    last_seq: u64,
    last_hash: Option<String>,
}

/// Append-only JSONL audit log rooted at a directory.
pub struct FileAuditLog {
    root: PathBuf,
    head: Mutex<ChainHead>,
}

impl FileAuditLog {
    /// Open (or create) a log rooted at the given directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        repair_torn_tails(&root)?;

        let mut records = Vec::new();
        collect_records_recursive(&root, &mut records)?;
        let head = records
            .iter()
            .max_by_key(|r| r.seq)
            .map(|r| ChainHead {
                last_seq: r.seq,
                last_hash: Some(r.content_hash.clone()),
            })
            .unwrap_or_default();

        tracing::debug!(
            root = %root.display(),
            records = records.len(),
            last_seq = head.last_seq,
            "Audit log opened"
        );

        Ok(Self {
            root,
            head: Mutex::new(head),
        })
    }

    /// Build the file path for an event based on its timestamp.
    fn day_path(&self, event: &AuditEvent) -> PathBuf {
        let date = event.timestamp.format("%Y/%m/%d");
        self.root.join(format!("{date}.jsonl"))
    }

    fn read_all(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = Vec::new();
        collect_records_recursive(&self.root, &mut records)?;
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}

impl AuditLog for FileAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let mut head = self.head.lock().map_err(|_| AuditError::Poisoned)?;

        let record = AuditRecord::seal(head.last_seq + 1, event, head.last_hash.clone())?;
        let path = self.day_path(&record.event);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        write_record(&mut file, line.as_bytes(), &mut head, &record)?;

        tracing::debug!(
            seq = record.seq,
            hardware_id = %record.event.hardware_id,
            kind = %record.event.kind,
            "Audit event appended"
        );

        Ok(record)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(query.apply(self.read_all()?))
    }

    fn verify_chain(&self) -> Result<u64, AuditError> {
        // Hold the head so no append interleaves with the walk.
        let _head = self.head.lock().map_err(|_| AuditError::Poisoned)?;
        verify_records(&self.read_all()?)
    }
}

/// What an append needs from a day file.
trait DayFile: Write {
    fn position(&self) -> io::Result<u64>;
    fn rollback(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl DayFile for fs::File {
    fn position(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn rollback(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write one record line. A failed write is rolled back so no torn line is
/// left behind. Once the bytes are written the head advances, even if the
/// sync that follows fails, so a sequence number is never handed out twice.
fn write_record(
    file: &mut impl DayFile,
    line: &[u8],
    head: &mut ChainHead,
    record: &AuditRecord,
) -> Result<(), AuditError> {
    let len = file.position()?;
    if let Err(e) = file.write_all(line) {
        if let Err(rollback) = file.rollback(len) {
            tracing::error!(seq = record.seq, error = %rollback, "Failed to roll back partial audit write");
        }
        return Err(e.into());
    }

    head.last_seq = record.seq;
    head.last_hash = Some(record.content_hash.clone());
    file.sync()?;
    Ok(())
}

/// Truncate any day file whose last line is missing its terminator.
fn repair_torn_tails(dir: &Path) -> Result<(), AuditError> {
    for path in day_files(dir)? {
        let contents = fs::read(&path)?;
        if contents.is_empty() || contents.ends_with(b"\n") {
            continue;
        }

        let keep = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = contents.len() - keep,
            "Truncating torn audit record"
        );
        OpenOptions::new().write(true).open(&path)?.set_len(keep as u64)?;
    }
    Ok(())
}

/// Every `.jsonl` file under `dir`.
fn day_files(dir: &Path) -> Result<Vec<PathBuf>, AuditError> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(day_files(&path)?);
        } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Recursively collect every record under `dir`.
///
/// An unterminated final line is an append in progress or a torn write and
/// is skipped.
fn collect_records_recursive(dir: &Path, results: &mut Vec<AuditRecord>) -> Result<(), AuditError> {
    for path in day_files(dir)? {
        let contents = fs::read_to_string(&path)?;
        for line in contents.split_inclusive('\n') {
            if !line.ends_with('\n') {
                tracing::warn!(path = %path.display(), "Skipping unterminated audit record");
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            results.push(serde_json::from_str(line)?);
        }
    }

    Ok(())
}
