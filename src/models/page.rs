//! Page models for manga OCR processing.
//!
//! A page's recognition state is a small state machine driven by the
//! OCR queue: `Pending → Processing → {Completed, Failed}`. `Failed` is
//! not terminal; a failed page may be re-enqueued and becomes `Pending`
//! again from the queue's point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognition status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the queue may pick this page up (directly or via re-enqueue).
    pub fn is_enqueueable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Pixel dimensions of a page image, as reported by the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// One detected text region on a page.
///
/// Field names follow the inference service wire format, which is also
/// what the frontend overlay consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Bounding box as `[x1, y1, x2, y2]` in image pixels.
    pub bbox: [i32; 4],
    /// Box width in pixels.
    pub width: i32,
    /// Box height in pixels.
    pub height: i32,
    /// Whether the text runs vertically (typical for manga dialogue).
    pub vertical: bool,
    /// Estimated font size, when the detector could derive one.
    pub font_size: Option<f32>,
    /// Number of text lines in the block.
    pub lines: u32,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Consolidated text for the whole block.
    pub text: String,
    /// Per-line text segments, in reading order.
    pub text_lines: Vec<String>,
}

/// A manga page as stored durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Unique page identifier.
    pub id: String,
    /// Owning manga/volume identifier.
    pub manga_id: String,
    /// 1-based position within the manga.
    pub page_number: u32,
    /// Path to the page image on disk.
    pub image_path: String,
    /// Current recognition status.
    pub ocr_status: PageStatus,
    /// When recognition last started.
    pub ocr_started_at: Option<DateTime<Utc>>,
    /// When recognition last finished (success or failure).
    pub ocr_completed_at: Option<DateTime<Utc>>,
    /// Image dimensions detected during recognition.
    pub image_size: Option<ImageSize>,
    /// When the page record was created.
    pub created_at: DateTime<Utc>,
}

impl Page {
    /// Create a new pending page record.
    pub fn new(id: String, manga_id: String, page_number: u32, image_path: String) -> Self {
        Self {
            id,
            manga_id,
            page_number,
            image_path,
            ocr_status: PageStatus::Pending,
            ocr_started_at: None,
            ocr_completed_at: None,
            image_size: None,
            created_at: Utc::now(),
        }
    }
}
