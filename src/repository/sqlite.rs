//! SQLite implementation of the page store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::models::{CompletionRecord, CompletionState, ImageSize, Page, PageStatus, TextBlock};

use super::{PageStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    manga_id TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    ocr_status TEXT NOT NULL DEFAULT 'pending',
    ocr_started_at TEXT,
    ocr_completed_at TEXT,
    image_width INTEGER,
    image_height INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(ocr_status);
CREATE INDEX IF NOT EXISTS idx_pages_manga ON pages(manga_id, page_number);

CREATE TABLE IF NOT EXISTS text_blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    block_index INTEGER NOT NULL,
    x1 INTEGER NOT NULL,
    y1 INTEGER NOT NULL,
    x2 INTEGER NOT NULL,
    y2 INTEGER NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    vertical INTEGER NOT NULL,
    font_size REAL,
    line_count INTEGER NOT NULL,
    confidence REAL NOT NULL,
    text TEXT NOT NULL,
    text_lines TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_text_blocks_page ON text_blocks(page_id, block_index);

CREATE TABLE IF NOT EXISTS ocr_completions (
    id TEXT PRIMARY KEY,
    total_pages INTEGER NOT NULL,
    completed INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    finished_at TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'unread'
);
"#;

/// Page store backed by a single SQLite database.
pub struct SqlitePageStore {
    conn: Mutex<Connection>,
}

impl SqlitePageStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened page database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-write; the
        // connection itself is still usable for our single-statement calls.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_status(s: &str) -> Result<PageStatus, StoreError> {
    PageStatus::from_str(s).ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Row image of `pages` before status/timestamp parsing.
struct RawPage {
    id: String,
    manga_id: String,
    page_number: u32,
    image_path: String,
    ocr_status: String,
    ocr_started_at: Option<String>,
    ocr_completed_at: Option<String>,
    image_width: Option<u32>,
    image_height: Option<u32>,
    created_at: String,
}

impl RawPage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            manga_id: row.get(1)?,
            page_number: row.get(2)?,
            image_path: row.get(3)?,
            ocr_status: row.get(4)?,
            ocr_started_at: row.get(5)?,
            ocr_completed_at: row.get(6)?,
            image_width: row.get(7)?,
            image_height: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_page(self) -> Result<Page, StoreError> {
        let image_size = match (self.image_width, self.image_height) {
            (Some(width), Some(height)) => Some(ImageSize { width, height }),
            _ => None,
        };
        Ok(Page {
            id: self.id,
            manga_id: self.manga_id,
            page_number: self.page_number,
            image_path: self.image_path,
            ocr_status: parse_status(&self.ocr_status)?,
            ocr_started_at: self.ocr_started_at.as_deref().map(parse_ts),
            ocr_completed_at: self.ocr_completed_at.as_deref().map(parse_ts),
            image_size,
            created_at: parse_ts(&self.created_at),
        })
    }
}

const PAGE_COLUMNS: &str = "id, manga_id, page_number, image_path, ocr_status, \
     ocr_started_at, ocr_completed_at, image_width, image_height, created_at";

#[async_trait]
impl PageStore for SqlitePageStore {
    async fn insert_page(&self, page: &Page) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO pages (id, manga_id, page_number, image_path, ocr_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                page.id,
                page.manga_id,
                page.page_number,
                page.image_path,
                page.ocr_status.as_str(),
                page.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
                params![page_id],
                RawPage::from_row,
            )
            .optional()?;
        raw.map(RawPage::into_page).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<Page>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE ocr_status = 'pending'
             ORDER BY manga_id, page_number"
        ))?;
        let rows = stmt
            .query_map([], RawPage::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawPage::into_page).collect()
    }

    async fn reset_processing(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let reset = conn.execute(
            "UPDATE pages SET ocr_status = 'pending', ocr_started_at = NULL
             WHERE ocr_status = 'processing'",
            [],
        )?;
        if reset > 0 {
            info!(pages = reset, "reset stale processing pages to pending");
        }
        Ok(reset)
    }

    async fn mark_processing(
        &self,
        page_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE pages SET ocr_status = 'processing', ocr_started_at = ?2,
             ocr_completed_at = NULL WHERE id = ?1",
            params![page_id, started_at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::PageNotFound(page_id.to_string()));
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        page_id: &str,
        finished_at: DateTime<Utc>,
        size: ImageSize,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE pages SET ocr_status = 'completed', ocr_completed_at = ?2,
             image_width = ?3, image_height = ?4 WHERE id = ?1",
            params![page_id, finished_at.to_rfc3339(), size.width, size.height],
        )?;
        if updated == 0 {
            return Err(StoreError::PageNotFound(page_id.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        page_id: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE pages SET ocr_status = 'failed', ocr_completed_at = ?2 WHERE id = ?1",
            params![page_id, finished_at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::PageNotFound(page_id.to_string()));
        }
        Ok(())
    }

    async fn replace_text_blocks(
        &self,
        page_id: &str,
        blocks: &[TextBlock],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM text_blocks WHERE page_id = ?1", params![page_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO text_blocks (page_id, block_index, x1, y1, x2, y2, width, height,
                 vertical, font_size, line_count, confidence, text, text_lines)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for (index, block) in blocks.iter().enumerate() {
                stmt.execute(params![
                    page_id,
                    index as i64,
                    block.bbox[0],
                    block.bbox[1],
                    block.bbox[2],
                    block.bbox[3],
                    block.width,
                    block.height,
                    block.vertical,
                    block.font_size,
                    block.lines,
                    block.confidence,
                    block.text,
                    serde_json::to_string(&block.text_lines)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_text_blocks(&self, page_id: &str) -> Result<Vec<TextBlock>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT x1, y1, x2, y2, width, height, vertical, font_size, line_count,
             confidence, text, text_lines
             FROM text_blocks WHERE page_id = ?1 ORDER BY block_index",
        )?;
        let rows = stmt
            .query_map(params![page_id], |row| {
                Ok((
                    [
                        row.get::<_, i32>(0)?,
                        row.get::<_, i32>(1)?,
                        row.get::<_, i32>(2)?,
                        row.get::<_, i32>(3)?,
                    ],
                    row.get::<_, i32>(4)?,
                    row.get::<_, i32>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, Option<f32>>(7)?,
                    row.get::<_, u32>(8)?,
                    row.get::<_, f32>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(bbox, width, height, vertical, font_size, lines, confidence, text, raw_lines)| {
                    Ok(TextBlock {
                        bbox,
                        width,
                        height,
                        vertical,
                        font_size,
                        lines,
                        confidence,
                        text,
                        text_lines: serde_json::from_str(&raw_lines)?,
                    })
                },
            )
            .collect()
    }

    async fn count_by_status(
        &self,
        statuses: &[PageStatus],
    ) -> Result<HashMap<PageStatus, u64>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT ocr_status, COUNT(*) FROM pages GROUP BY ocr_status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = HashMap::new();
        for (raw, count) in rows {
            let status = parse_status(&raw)?;
            if statuses.contains(&status) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    async fn create_completion_record(&self, record: &CompletionRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO ocr_completions (id, total_pages, completed, failed, finished_at, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.total_pages,
                record.completed,
                record.failed,
                record.finished_at.to_rfc3339(),
                record.state.as_str(),
            ],
        )?;
        Ok(())
    }

    async fn latest_completion_record(&self) -> Result<Option<CompletionRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, total_pages, completed, failed, finished_at, state
                 FROM ocr_completions ORDER BY finished_at DESC, rowid DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, total_pages, completed, failed, finished_at, state)| {
            CompletionRecord {
                id,
                total_pages,
                completed,
                failed,
                finished_at: parse_ts(&finished_at),
                state: CompletionState::from_str(&state).unwrap_or(CompletionState::Unread),
            }
        }))
    }

    async fn dismiss_completion_record(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE ocr_completions SET state = 'dismissed' WHERE id = ?1",
            params![id],
        )?;
        Ok(updated > 0)
    }
}
