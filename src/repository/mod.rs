//! Persistence gateway for pages, text blocks, and completion records.
//!
//! The OCR queue only sees the [`PageStore`] trait; the SQLite
//! implementation lives in [`sqlite`]. Status writes are last-writer-wins
//! per page, which is safe because a page is never owned by more than one
//! loop iteration at a time.

mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CompletionRecord, ImageSize, Page, PageStatus, TextBlock};

pub use sqlite::SqlitePageStore;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Invalid status value in database: {0}")]
    InvalidStatus(String),
}

/// Durable store for page records and recognition output.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Insert a new page record (status `pending`).
    async fn insert_page(&self, page: &Page) -> Result<(), StoreError>;

    /// Fetch a single page by id.
    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError>;

    /// List all pages still durably pending, in reading order.
    async fn list_pending(&self) -> Result<Vec<Page>, StoreError>;

    /// Flip stale `processing` rows back to `pending`.
    ///
    /// Run once at startup: any page found `processing` was orphaned by a
    /// previous process and is a re-enqueue candidate, not owned work.
    async fn reset_processing(&self) -> Result<usize, StoreError>;

    /// Mark a page `processing` with a start timestamp.
    async fn mark_processing(
        &self,
        page_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Mark a page `completed` with detected image dimensions.
    async fn mark_completed(
        &self,
        page_id: &str,
        finished_at: DateTime<Utc>,
        size: ImageSize,
    ) -> Result<(), StoreError>;

    /// Mark a page `failed`.
    async fn mark_failed(&self, page_id: &str, finished_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Replace a page's text blocks with a fresh detection result.
    async fn replace_text_blocks(
        &self,
        page_id: &str,
        blocks: &[TextBlock],
    ) -> Result<(), StoreError>;

    /// Fetch a page's text blocks in detection order.
    async fn list_text_blocks(&self, page_id: &str) -> Result<Vec<TextBlock>, StoreError>;

    /// Count pages per status, restricted to the given statuses.
    async fn count_by_status(
        &self,
        statuses: &[PageStatus],
    ) -> Result<HashMap<PageStatus, u64>, StoreError>;

    /// Persist a completion record.
    async fn create_completion_record(&self, record: &CompletionRecord) -> Result<(), StoreError>;

    /// Most recent completion record, if any.
    async fn latest_completion_record(&self) -> Result<Option<CompletionRecord>, StoreError>;

    /// Mark a completion record dismissed. Returns false if unknown id.
    async fn dismiss_completion_record(&self, id: &str) -> Result<bool, StoreError>;
}
