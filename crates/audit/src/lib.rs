//! Audit logging — one immutable record per command invocation.
//!
//! Records are newline-delimited JSON, durably flushed as they are
//! written. Rotation is an explicit operator action, never automatic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use rcc_core::ErrorKind;

/// A single audit record. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub user: String,

    #[serde(rename = "radioId")]
    pub radio_id: String,

    pub action: String,
    pub params: serde_json::Value,
    pub outcome: String,
    pub code: String,
}

impl AuditRecord {
    /// Build a record for a completed operation. `error` is `None` on
    /// success; otherwise the normalized kind the caller returned.
    pub fn new(
        user: impl Into<String>,
        radio_id: impl Into<String>,
        action: impl Into<String>,
        params: serde_json::Value,
        error: Option<ErrorKind>,
    ) -> Self {
        let (outcome, code) = match error {
            None => ("success".to_string(), "SUCCESS".to_string()),
            Some(kind) => (kind.outcome().to_string(), kind.as_code().to_string()),
        };
        Self {
            ts: Utc::now(),
            user: user.into(),
            radio_id: radio_id.into(),
            action: action.into(),
            params,
            outcome,
            code,
        }
    }
}

/// Where audit records are written.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only NDJSON file sink. Each record is written as one line
/// and fsynced before `append` returns.
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Open (creating if needed) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn open_file(path: &Path) -> Result<File, AuditError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Rotate the log: close the current file, rename it with a UTC
    /// timestamp suffix, and open a fresh one at the original path.
    pub fn rotate(&self) -> Result<PathBuf, AuditError> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        guard.flush()?;

        let suffix = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(format!(".{suffix}"));
        let rotated = PathBuf::from(rotated);

        std::fs::rename(&self.path, &rotated)?;
        *guard = Self::open_file(&self.path)?;

        tracing::info!(rotated = %rotated.display(), "audit log rotated");
        Ok(rotated)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(&line)?;
        guard.flush()?;
        guard.sync_data()?;
        Ok(())
    }
}

/// In-memory sink for tests and small deployments.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
