//! Completion detection for drained OCR runs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::CompletionRecord;
use crate::repository::PageStore;

/// Writes a one-shot summary record when a processing run fully drains.
///
/// The pending check is advisory: a page enqueued concurrently can slip
/// past it, producing an occasional extra or missed completion banner.
/// That is accepted; the alternative is locking around a UI notification.
pub struct CompletionTracker {
    store: Arc<dyn PageStore>,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self { store }
    }

    /// Called when the queue loop transitions from running to idle.
    ///
    /// Returns the created record, or `None` when pages are still durably
    /// pending (e.g. never enqueued in this process's lifetime) or the
    /// session touched nothing.
    pub async fn on_drained(&self, completed: u32, failed: u32) -> Option<CompletionRecord> {
        if completed + failed == 0 {
            return None;
        }

        match self.store.list_pending().await {
            Ok(pending) if !pending.is_empty() => {
                debug!(
                    pending = pending.len(),
                    "backlog drained but pages remain pending, skipping completion record"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "pending check failed, skipping completion record");
                return None;
            }
        }

        let record = CompletionRecord::new(completed, failed, Utc::now());
        if let Err(e) = self.store.create_completion_record(&record).await {
            warn!(error = %e, "failed to persist completion record");
            return None;
        }

        info!(
            total = record.total_pages,
            completed = record.completed,
            failed = record.failed,
            "OCR run complete"
        );
        Some(record)
    }
}
