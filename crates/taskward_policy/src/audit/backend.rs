//! Audit record destinations.

use super::{AuditRecord, Severity};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use taskward_error::{AuditError, AuditErrorKind};
use tokio::io::AsyncWriteExt;

/// Destination for audit records.
///
/// Writes happen on the sink's worker task, never on the request path.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Persist one record.
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Emits records as structured `tracing` events under the `taskward::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBackend;

#[async_trait]
impl AuditBackend for TracingBackend {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let fields = serde_json::to_string(record.fields()).map_err(|e| {
            AuditError::new(AuditErrorKind::Serialization(e.to_string()))
        })?;
        let kind = record.kind().to_string();
        let mode = record.mode().to_string();
        match record.severity() {
            Severity::Info => tracing::info!(
                target: "taskward::audit",
                record_id = %record.id(),
                kind = %kind,
                mode = %mode,
                fields = %fields,
                "audit"
            ),
            Severity::Warning => tracing::warn!(
                target: "taskward::audit",
                record_id = %record.id(),
                kind = %kind,
                mode = %mode,
                fields = %fields,
                "audit"
            ),
            Severity::Critical => tracing::error!(
                target: "taskward::audit",
                record_id = %record.id(),
                kind = %kind,
                mode = %mode,
                fields = %fields,
                "alert"
            ),
        }
        Ok(())
    }
}

/// Keeps records in memory. Can simulate an outage.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    available: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty, available backend.
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Snapshot of stored records, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Toggle availability; writes fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditBackend for MemoryBackend {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::new(AuditErrorKind::Unavailable(
                "memory backend offline".to_string(),
            )));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Appends records as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesBackend {
    path: PathBuf,
}

impl JsonLinesBackend {
    /// Append to `path`, creating it on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditBackend for JsonLinesBackend {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| AuditError::new(AuditErrorKind::Serialization(e.to_string())))?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::new(AuditErrorKind::Io(e.to_string())))?;
        file.write_all(&line)
            .await
            .map_err(|e| AuditError::new(AuditErrorKind::Io(e.to_string())))?;
        file.flush()
            .await
            .map_err(|e| AuditError::new(AuditErrorKind::Io(e.to_string())))?;
        Ok(())
    }
}
