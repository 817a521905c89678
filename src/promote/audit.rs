//! Buffered audit trail. Entries accumulate in memory and flush in fixed
//! batches; a failed flush is logged and dropped rather than aborting the
//! promotion that produced it.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::domain::AuditEntry;
use crate::storage::Storage;

const FLUSH_BATCH: usize = 50;

pub struct AuditLogger {
    storage: Arc<dyn Storage>,
    buffer: Mutex<Vec<AuditEntry>>,
    dry_run: bool,
}

impl AuditLogger {
    pub fn new(storage: Arc<dyn Storage>, dry_run: bool) -> Self {
        Self {
            storage,
            buffer: Mutex::new(Vec::new()),
            dry_run,
        }
    }

    /// Buffer an entry, flushing when the batch size is reached.
    pub async fn record(&self, entry: AuditEntry) {
        let should_flush = {
            let Ok(mut buffer) = self.buffer.lock() else {
                return;
            };
            buffer.push(entry);
            buffer.len() >= FLUSH_BATCH
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Drain the buffer. Write failures are swallowed: the audit log is a
    /// non-critical path.
    pub async fn flush(&self) {
        let drained: Vec<AuditEntry> = {
            let Ok(mut buffer) = self.buffer.lock() else {
                return;
            };
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return;
        }
        if self.dry_run {
            debug!(count = drained.len(), "dry run: discarding audit entries");
            return;
        }
        for chunk in drained.chunks(FLUSH_BATCH) {
            if let Err(e) = self.storage.append_audit(chunk).await {
                warn!(error = %e, dropped = chunk.len(), "audit flush failed");
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn flush_drains_the_buffer() {
        let storage = Arc::new(MemoryStorage::new());
        let logger = AuditLogger::new(storage.clone(), false);
        logger.record(AuditEntry::new("create", "teams", None)).await;
        logger.record(AuditEntry::new("create", "matches", None)).await;
        assert_eq!(logger.pending(), 2);

        logger.flush().await;
        assert_eq!(logger.pending(), 0);
        assert_eq!(storage.audit_entries().len(), 2);
    }

    #[tokio::test]
    async fn failed_flush_is_swallowed() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_audit_writes(true);
        let logger = AuditLogger::new(storage.clone(), false);
        logger.record(AuditEntry::new("create", "teams", None)).await;
        // no panic, no error surfaced; the entries are dropped
        logger.flush().await;
        assert_eq!(logger.pending(), 0);
        assert!(storage.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        let storage = Arc::new(MemoryStorage::new());
        let logger = AuditLogger::new(storage.clone(), true);
        logger.record(AuditEntry::new("create", "teams", None)).await;
        logger.flush().await;
        assert!(storage.audit_entries().is_empty());
    }
}
