//! Non-blocking audit delivery with a fallback buffer.
//!
//! Records are handed to a worker task over an unbounded channel, so
//! submitting never waits on I/O. When the backend fails, or the worker is
//! gone, records are parked in a shared fallback buffer and retried ahead of
//! newer records. Nothing is dropped.

use super::{AuditBackend, AuditRecord};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use taskward_error::{AuditError, AuditErrorKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, warn};

/// Fallback size past which every parked record is reported.
const FALLBACK_WARN_LEN: usize = 10_000;

enum AuditCommand {
    Record(AuditRecord),
    Flush(oneshot::Sender<usize>),
}

type Fallback = Arc<Mutex<VecDeque<AuditRecord>>>;

/// Handle for submitting audit records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditCommand>,
    fallback: Fallback,
}

impl std::fmt::Debug for AuditCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(record) => f.debug_tuple("Record").field(record.id()).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl AuditSink {
    /// Start a worker on the current tokio runtime writing to `backend`.
    ///
    /// # Errors
    ///
    /// `Unavailable` when called outside a tokio runtime.
    #[instrument(skip(backend))]
    pub fn spawn(backend: Arc<dyn AuditBackend>) -> Result<Self, AuditError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            AuditError::new(AuditErrorKind::Unavailable(format!(
                "audit worker needs a tokio runtime: {}",
                e
            )))
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let fallback: Fallback = Arc::new(Mutex::new(VecDeque::new()));
        handle.spawn(run_worker(rx, backend, Arc::clone(&fallback)));
        debug!("Audit worker started");
        Ok(Self { tx, fallback })
    }

    /// Submit a record. Never blocks and never drops.
    pub fn record(&self, record: AuditRecord) {
        if let Err(mpsc::error::SendError(AuditCommand::Record(record))) =
            self.tx.send(AuditCommand::Record(record))
        {
            error!(record_id = %record.id(), "Audit worker gone, parking record in fallback buffer");
            park(&self.fallback, record);
        }
    }

    /// Wait until every record submitted so far has been handled.
    ///
    /// Returns how many records remain parked in the fallback buffer.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the worker has stopped.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx.send(AuditCommand::Flush(done_tx)).map_err(|_| {
            AuditError::new(AuditErrorKind::Unavailable(
                "audit worker stopped".to_string(),
            ))
        })?;
        done_rx.await.map_err(|_| {
            AuditError::new(AuditErrorKind::Unavailable(
                "audit worker stopped before flushing".to_string(),
            ))
        })
    }

    /// Records currently parked in the fallback buffer.
    pub fn buffered(&self) -> usize {
        self.fallback.lock().len()
    }
}

fn park(fallback: &Fallback, record: AuditRecord) {
    let mut buffer = fallback.lock();
    buffer.push_back(record);
    if buffer.len() >= FALLBACK_WARN_LEN {
        warn!(buffered = buffer.len(), "Audit fallback buffer growing");
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<AuditCommand>,
    backend: Arc<dyn AuditBackend>,
    fallback: Fallback,
) {
    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Record(record) => {
                if !drain(backend.as_ref(), &fallback).await {
                    park(&fallback, record);
                    continue;
                }
                if let Err(e) = backend.write(&record).await {
                    warn!(error = %e, record_id = %record.id(), "Audit backend write failed, buffering");
                    park(&fallback, record);
                }
            }
            AuditCommand::Flush(done) => {
                drain(backend.as_ref(), &fallback).await;
                let _ = done.send(fallback.lock().len());
            }
        }
    }
    debug!("Audit worker stopped");
}

/// Retry parked records in order. Returns whether the buffer is empty.
async fn drain(backend: &dyn AuditBackend, fallback: &Fallback) -> bool {
    loop {
        let next = fallback.lock().pop_front();
        let Some(record) = next else {
            return true;
        };
        if let Err(e) = backend.write(&record).await {
            debug!(error = %e, "Audit backend still unavailable");
            fallback.lock().push_front(record);
            return false;
        }
    }
}
