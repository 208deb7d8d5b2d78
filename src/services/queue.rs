//! Background OCR processing queue.
//!
//! Maintains the ordered backlog of pages awaiting recognition, drains it
//! one page at a time through the inference service, persists results,
//! and broadcasts progress after every state change.
//!
//! The backlog is a stable two-tier FIFO: high-priority pages (the page a
//! reader is currently looking at) run ahead of normal ones, and arrival
//! order is preserved within each tier. Processing is deliberately
//! single-flight; the inference backend is one GPU-bound model server, so
//! concurrent requests would only queue inside it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::inference::{OcrClientError, Recognizer};
use crate::models::{CompletionRecord, Page};
use crate::repository::{PageStore, StoreError};

use super::completion::CompletionTracker;

/// Scheduling priority of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

/// One page awaiting recognition. Transient; durable status lives in the
/// page store.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub page_id: String,
    pub manga_id: String,
    pub page_number: u32,
    pub image_path: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    fn from_page(page: &Page, priority: Priority) -> Self {
        Self {
            page_id: page.id.clone(),
            manga_id: page.manga_id.clone(),
            page_number: page.page_number,
            image_path: page.image_path.clone(),
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// The page currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentPage {
    pub page_id: String,
    pub manga_id: String,
    pub page_number: u32,
}

/// Point-in-time view of queue health, broadcast to subscribers.
///
/// `total_pages` is session-relative (backlog + processed + in-flight);
/// it resets implicitly when the backlog empties and new work arrives.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub current_page: Option<CurrentPage>,
    pub processing: bool,
    pub paused: bool,
    pub eta_seconds: Option<f64>,
}

/// Events published on the progress channel.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Progress(ProgressSnapshot),
    Completion(CompletionRecord),
}

/// Per-item failure, logged and converted to a `failed` page status. A
/// single bad page never stops the queue.
#[derive(Debug, Error)]
enum ItemError {
    #[error("Image not readable: {0}")]
    Image(#[from] std::io::Error),

    #[error("Recognition failed: {0}")]
    Recognition(#[from] OcrClientError),

    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<WorkItem>,
    normal: VecDeque<WorkItem>,
    current: Option<CurrentPage>,
    paused: bool,
    running: bool,
    processed: usize,
    completed: usize,
    failed: usize,
    session_total: usize,
    run_started: Option<Instant>,
}

impl QueueState {
    fn backlog_len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn in_flight(&self, page_id: &str) -> bool {
        self.current.as_ref().is_some_and(|c| c.page_id == page_id)
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let in_flight = usize::from(self.current.is_some());
        let remaining = self.backlog_len() + in_flight;

        // ETA only makes sense mid-run, after at least one item finished.
        let eta_seconds = match (self.run_started, self.processed) {
            (Some(start), n) if n > 0 && self.running => {
                let per_item = start.elapsed().as_secs_f64() / n as f64;
                Some(per_item * remaining as f64)
            }
            _ => None,
        };

        ProgressSnapshot {
            total_pages: self.backlog_len() + self.processed + in_flight,
            processed_pages: self.processed,
            current_page: self.current.clone(),
            processing: self.running,
            paused: self.paused,
            eta_seconds,
        }
    }
}

/// Counters captured when a run drains, before the session resets.
struct SessionStats {
    completed: u32,
    failed: u32,
}

enum Step {
    Item(WorkItem),
    Drained(SessionStats),
    Idle,
}

/// The OCR queue core.
///
/// Constructed once, started with [`OcrQueue::start`], and shared with
/// the HTTP layer behind an `Arc`. Enqueue and the other control calls
/// are synchronous, non-blocking mutations of in-memory state and may be
/// made at any time, including while the loop is mid-item.
pub struct OcrQueue {
    store: Arc<dyn PageStore>,
    recognizer: Arc<dyn Recognizer>,
    tracker: CompletionTracker,
    state: Mutex<QueueState>,
    wake: Notify,
    stopping: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl OcrQueue {
    const EVENT_CAPACITY: usize = 256;

    pub fn new(store: Arc<dyn PageStore>, recognizer: Arc<dyn Recognizer>) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            tracker: CompletionTracker::new(store.clone()),
            store,
            recognizer,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            stopping: AtomicBool::new(false),
            events,
        }
    }

    /// Spawn the processing loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run().await })
    }

    /// Signal the loop to exit after the in-flight item (if any) finishes.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Add a page to the backlog.
    ///
    /// Idempotent per page id: re-adding a queued page is a no-op, except
    /// that a `high` re-enqueue of a `normal` entry promotes it into the
    /// high tier. A page currently in flight is never re-queued. Returns
    /// true if the backlog gained a new entry.
    ///
    /// Durable status is not touched here; callers ensure the page is
    /// `pending` or `failed` before enqueueing.
    pub fn enqueue(&self, page: &Page, priority: Priority) -> bool {
        let mut state = self.lock_state();

        if state.in_flight(&page.id) || state.high.iter().any(|i| i.page_id == page.id) {
            return false;
        }

        if let Some(pos) = state.normal.iter().position(|i| i.page_id == page.id) {
            if priority == Priority::High {
                if let Some(mut item) = state.normal.remove(pos) {
                    item.priority = Priority::High;
                    state.high.push_back(item);
                    debug!(page_id = %page.id, "promoted queued page to high priority");
                    self.emit_progress(&state);
                }
            }
            return false;
        }

        let item = WorkItem::from_page(page, priority);
        match priority {
            Priority::High => state.high.push_back(item),
            Priority::Normal => state.normal.push_back(item),
        }
        state.session_total += 1;
        debug!(page_id = %page.id, ?priority, backlog = state.backlog_len(), "page enqueued");
        self.emit_progress(&state);
        drop(state);

        self.wake.notify_one();
        true
    }

    /// Promote an already-queued page to the high tier.
    ///
    /// Used when a reader is actively viewing a page whose recognition
    /// has not started. No-op if the page is not in the backlog.
    pub fn prioritize(&self, page_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(pos) = state.normal.iter().position(|i| i.page_id == page_id) else {
            return false;
        };
        if let Some(mut item) = state.normal.remove(pos) {
            item.priority = Priority::High;
            state.high.push_back(item);
            self.emit_progress(&state);
            return true;
        }
        false
    }

    /// Stop dequeuing. The in-flight item, if any, still completes.
    pub fn pause(&self) {
        let mut state = self.lock_state();
        if !state.paused {
            state.paused = true;
            info!("OCR queue paused");
            self.emit_progress(&state);
        }
    }

    /// Clear the paused flag and restart the loop if backlog remains.
    pub fn resume(&self) {
        let mut state = self.lock_state();
        if state.paused {
            state.paused = false;
            info!("OCR queue resumed");
            self.emit_progress(&state);
            drop(state);
            self.wake.notify_one();
        }
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> ProgressSnapshot {
        self.lock_state().snapshot()
    }

    /// Subscribe to queue events.
    ///
    /// The returned snapshot reflects the state at subscription time, so
    /// new subscribers render immediately instead of waiting for the next
    /// transition. Taken under the state lock, so no event between the
    /// snapshot and the receiver can be missed.
    pub fn subscribe(&self) -> (ProgressSnapshot, broadcast::Receiver<QueueEvent>) {
        let state = self.lock_state();
        (state.snapshot(), self.events.subscribe())
    }

    /// Startup reconciliation: flip stale `processing` rows back to
    /// `pending`, then enqueue everything durably pending.
    pub async fn recover_pending(&self) -> Result<usize, StoreError> {
        self.store.reset_processing().await?;
        let pending = self.store.list_pending().await?;
        let mut queued = 0;
        for page in &pending {
            if self.enqueue(page, Priority::Normal) {
                queued += 1;
            }
        }
        if queued > 0 {
            info!(pages = queued, "recovered pending pages into OCR queue");
        }
        Ok(queued)
    }

    async fn run(&self) {
        info!("OCR queue started");
        loop {
            self.drain().await;
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.wake.notified().await;
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
        }
        info!("OCR queue stopped");
    }

    /// Process backlog items until it empties, pauses, or stop is signalled.
    async fn drain(&self) {
        loop {
            match self.next_step() {
                Step::Item(item) => self.process_item(item).await,
                Step::Drained(stats) => {
                    if let Some(record) =
                        self.tracker.on_drained(stats.completed, stats.failed).await
                    {
                        let _ = self.events.send(QueueEvent::Completion(record));
                    }
                    return;
                }
                Step::Idle => return,
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut state = self.lock_state();

        if state.paused || self.stopping.load(Ordering::SeqCst) {
            if state.running {
                state.running = false;
                self.emit_progress(&state);
            }
            return Step::Idle;
        }

        if let Some(item) = {
            let high = state.high.pop_front();
            high.or_else(|| state.normal.pop_front())
        } {
            if !state.running {
                state.running = true;
                if state.run_started.is_none() {
                    state.run_started = Some(Instant::now());
                }
            }
            state.current = Some(CurrentPage {
                page_id: item.page_id.clone(),
                manga_id: item.manga_id.clone(),
                page_number: item.page_number,
            });
            self.emit_progress(&state);
            return Step::Item(item);
        }

        if state.running {
            // Natural drain: capture session tallies, then reset so the
            // next enqueue starts a fresh session.
            state.running = false;
            debug!(pages = state.session_total, "processing run drained");
            let stats = SessionStats {
                completed: state.completed as u32,
                failed: state.failed as u32,
            };
            state.processed = 0;
            state.completed = 0;
            state.failed = 0;
            state.session_total = 0;
            state.run_started = None;
            self.emit_progress(&state);
            return Step::Drained(stats);
        }

        Step::Idle
    }

    async fn process_item(&self, item: WorkItem) {
        let succeeded = match self.recognize_page(&item).await {
            Ok(()) => true,
            Err(e) => {
                warn!(page_id = %item.page_id, error = %e, "page recognition failed");
                if let Err(e) = self.store.mark_failed(&item.page_id, Utc::now()).await {
                    warn!(page_id = %item.page_id, error = %e, "failed to record failure status");
                }
                false
            }
        };

        let mut state = self.lock_state();
        state.processed += 1;
        if succeeded {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        state.current = None;
        self.emit_progress(&state);
    }

    async fn recognize_page(&self, item: &WorkItem) -> Result<(), ItemError> {
        self.store.mark_processing(&item.page_id, Utc::now()).await?;

        let image = tokio::fs::read(&item.image_path).await?;
        let detection = self
            .recognizer
            .detect_text(image, &item.image_path)
            .await?;

        self.store
            .replace_text_blocks(&item.page_id, &detection.blocks)
            .await?;
        self.store
            .mark_completed(&item.page_id, Utc::now(), detection.image_size)
            .await?;

        debug!(
            page_id = %item.page_id,
            blocks = detection.blocks.len(),
            "page recognition complete"
        );
        Ok(())
    }

    /// Send a progress event while holding the state lock, so events are
    /// delivered in the order of the transitions that produced them.
    fn emit_progress(&self, state: &QueueState) {
        let _ = self.events.send(QueueEvent::Progress(state.snapshot()));
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn backlog_ids(&self) -> Vec<String> {
        let state = self.lock_state();
        state
            .high
            .iter()
            .chain(state.normal.iter())
            .map(|i| i.page_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::inference::Detection;
    use crate::models::{
        CompletionRecord, ImageSize, PageStatus, TextBlock,
    };

    use super::*;

    struct MockStore {
        pages: Mutex<HashMap<String, (Page, PageStatus)>>,
        completions: Mutex<Vec<CompletionRecord>>,
        blocks: Mutex<HashMap<String, usize>>,
    }

    impl MockStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(HashMap::new()),
                completions: Mutex::new(Vec::new()),
                blocks: Mutex::new(HashMap::new()),
            })
        }

        fn seed(&self, page: Page) {
            self.pages
                .lock()
                .unwrap()
                .insert(page.id.clone(), (page, PageStatus::Pending));
        }

        fn status(&self, page_id: &str) -> PageStatus {
            self.pages.lock().unwrap()[page_id].1
        }

        fn completions(&self) -> Vec<CompletionRecord> {
            self.completions.lock().unwrap().clone()
        }

        fn set_status(&self, page_id: &str, status: PageStatus) -> Result<(), StoreError> {
            let mut pages = self.pages.lock().unwrap();
            let entry = pages
                .get_mut(page_id)
                .ok_or_else(|| StoreError::PageNotFound(page_id.to_string()))?;
            entry.1 = status;
            Ok(())
        }
    }

    #[async_trait]
    impl PageStore for MockStore {
        async fn insert_page(&self, page: &Page) -> Result<(), StoreError> {
            self.seed(page.clone());
            Ok(())
        }

        async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError> {
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(page_id)
                .map(|(p, _)| p.clone()))
        }

        async fn list_pending(&self) -> Result<Vec<Page>, StoreError> {
            let mut pending: Vec<Page> = self
                .pages
                .lock()
                .unwrap()
                .values()
                .filter(|(_, s)| *s == PageStatus::Pending)
                .map(|(p, _)| p.clone())
                .collect();
            pending.sort_by_key(|p| p.page_number);
            Ok(pending)
        }

        async fn reset_processing(&self) -> Result<usize, StoreError> {
            let mut reset = 0;
            for entry in self.pages.lock().unwrap().values_mut() {
                if entry.1 == PageStatus::Processing {
                    entry.1 = PageStatus::Pending;
                    reset += 1;
                }
            }
            Ok(reset)
        }

        async fn mark_processing(
            &self,
            page_id: &str,
            _started_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.set_status(page_id, PageStatus::Processing)
        }

        async fn mark_completed(
            &self,
            page_id: &str,
            _finished_at: DateTime<Utc>,
            _size: ImageSize,
        ) -> Result<(), StoreError> {
            self.set_status(page_id, PageStatus::Completed)
        }

        async fn mark_failed(
            &self,
            page_id: &str,
            _finished_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.set_status(page_id, PageStatus::Failed)
        }

        async fn replace_text_blocks(
            &self,
            page_id: &str,
            blocks: &[TextBlock],
        ) -> Result<(), StoreError> {
            self.blocks
                .lock()
                .unwrap()
                .insert(page_id.to_string(), blocks.len());
            Ok(())
        }

        async fn list_text_blocks(&self, _page_id: &str) -> Result<Vec<TextBlock>, StoreError> {
            Ok(Vec::new())
        }

        async fn count_by_status(
            &self,
            _statuses: &[PageStatus],
        ) -> Result<HashMap<PageStatus, u64>, StoreError> {
            Ok(HashMap::new())
        }

        async fn create_completion_record(
            &self,
            record: &CompletionRecord,
        ) -> Result<(), StoreError> {
            self.completions.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn latest_completion_record(&self) -> Result<Option<CompletionRecord>, StoreError> {
            Ok(self.completions.lock().unwrap().last().cloned())
        }

        async fn dismiss_completion_record(&self, _id: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    struct MockRecognizer {
        fail_paths: HashSet<String>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl MockRecognizer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_paths: HashSet::new(),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(paths: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_paths: paths.iter().map(|p| p.to_string()).collect(),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail_paths: HashSet::new(),
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Recognizer for MockRecognizer {
        async fn detect_text(
            &self,
            _image: Vec<u8>,
            path_hint: &str,
        ) -> Result<Detection, OcrClientError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.lock().unwrap().push(path_hint.to_string());
            if self.fail_paths.contains(path_hint) {
                return Err(OcrClientError::Api("scripted failure".to_string()));
            }
            Ok(Detection {
                blocks: vec![TextBlock {
                    bbox: [0, 0, 50, 100],
                    width: 50,
                    height: 100,
                    vertical: true,
                    font_size: None,
                    lines: 1,
                    confidence: 1.0,
                    text: "テスト".to_string(),
                    text_lines: vec!["テスト".to_string()],
                }],
                image_size: ImageSize {
                    width: 800,
                    height: 1200,
                },
            })
        }
    }

    /// Pages whose image files exist under `dir`.
    fn page_on_disk(dir: &std::path::Path, id: &str, number: u32) -> Page {
        let path = dir.join(format!("{id}.jpg"));
        std::fs::write(&path, b"jpeg bytes").unwrap();
        Page::new(
            id.to_string(),
            "manga-1".to_string(),
            number,
            path.to_string_lossy().into_owned(),
        )
    }

    async fn wait_idle(queue: &OcrQueue) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snap = queue.progress();
            if !snap.processing && snap.current_page.is_none() && snap.total_pages == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "queue did not drain in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_idempotent_enqueue() {
        let store = MockStore::new();
        let queue = OcrQueue::new(store, MockRecognizer::new());
        let page = Page::new("p1".into(), "m1".into(), 1, "/x/p1.jpg".into());

        assert!(queue.enqueue(&page, Priority::Normal));
        assert!(!queue.enqueue(&page, Priority::Normal));
        assert_eq!(queue.backlog_ids(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_priority_promotion() {
        let store = MockStore::new();
        let queue = OcrQueue::new(store, MockRecognizer::new());
        let p1 = Page::new("p1".into(), "m1".into(), 1, "/x/p1.jpg".into());
        let p2 = Page::new("p2".into(), "m1".into(), 2, "/x/p2.jpg".into());

        queue.enqueue(&p1, Priority::Normal);
        queue.enqueue(&p2, Priority::Normal);
        assert_eq!(queue.backlog_ids(), vec!["p1", "p2"]);

        // High re-enqueue of a queued normal item promotes it.
        assert!(!queue.enqueue(&p2, Priority::High));
        assert_eq!(queue.backlog_ids(), vec!["p2", "p1"]);

        // High re-enqueue of a high item does not duplicate it.
        assert!(!queue.enqueue(&p2, Priority::High));
        assert_eq!(queue.backlog_ids(), vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn test_high_tier_is_fifo() {
        let store = MockStore::new();
        let queue = OcrQueue::new(store, MockRecognizer::new());
        let n1 = Page::new("n1".into(), "m1".into(), 1, "/x/n1.jpg".into());
        let h1 = Page::new("h1".into(), "m1".into(), 2, "/x/h1.jpg".into());
        let h2 = Page::new("h2".into(), "m1".into(), 3, "/x/h2.jpg".into());

        queue.enqueue(&n1, Priority::Normal);
        queue.enqueue(&h1, Priority::High);
        queue.enqueue(&h2, Priority::High);
        assert_eq!(queue.backlog_ids(), vec!["h1", "h2", "n1"]);
    }

    #[tokio::test]
    async fn test_prioritize_only_affects_backlog() {
        let store = MockStore::new();
        let queue = OcrQueue::new(store, MockRecognizer::new());
        let p1 = Page::new("p1".into(), "m1".into(), 1, "/x/p1.jpg".into());
        let p2 = Page::new("p2".into(), "m1".into(), 2, "/x/p2.jpg".into());

        queue.enqueue(&p1, Priority::Normal);
        queue.enqueue(&p2, Priority::Normal);
        assert!(queue.prioritize("p2"));
        assert!(!queue.prioritize("p2"));
        assert!(!queue.prioritize("missing"));
        assert_eq!(queue.backlog_ids(), vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn test_drain_priority_order_and_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let recognizer = MockRecognizer::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        let p2 = page_on_disk(dir.path(), "p2", 2);
        store.seed(p1.clone());
        store.seed(p2.clone());

        let queue = Arc::new(OcrQueue::new(store.clone(), recognizer.clone()));
        queue.pause();
        queue.enqueue(&p1, Priority::Normal);
        queue.enqueue(&p2, Priority::High);
        let handle = queue.start();
        queue.resume();
        wait_idle(&queue).await;

        assert_eq!(
            recognizer.calls(),
            vec![p2.image_path.clone(), p1.image_path.clone()]
        );
        assert_eq!(store.status("p1"), PageStatus::Completed);
        assert_eq!(store.status("p2"), PageStatus::Completed);

        let completions = store.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].total_pages, 2);
        assert_eq!(completions[0].completed, 2);
        assert_eq!(completions[0].failed, 0);

        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        let p2 = page_on_disk(dir.path(), "p2", 2);
        let p3 = page_on_disk(dir.path(), "p3", 3);
        for p in [&p1, &p2, &p3] {
            store.seed(p.clone());
        }
        let recognizer = MockRecognizer::failing(&[&p2.image_path]);

        let queue = Arc::new(OcrQueue::new(store.clone(), recognizer));
        queue.pause();
        for p in [&p1, &p2, &p3] {
            queue.enqueue(p, Priority::Normal);
        }
        let handle = queue.start();
        queue.resume();
        wait_idle(&queue).await;

        assert_eq!(store.status("p1"), PageStatus::Completed);
        assert_eq!(store.status("p2"), PageStatus::Failed);
        assert_eq!(store.status("p3"), PageStatus::Completed);

        let completions = store.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].completed, 2);
        assert_eq!(completions[0].failed, 1);

        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_missing_image_fails_page() {
        let store = MockStore::new();
        let page = Page::new(
            "p1".into(),
            "m1".into(),
            1,
            "/nonexistent/path/p1.jpg".into(),
        );
        store.seed(page.clone());

        let queue = Arc::new(OcrQueue::new(store.clone(), MockRecognizer::new()));
        let handle = queue.start();
        queue.enqueue(&page, Priority::Normal);
        wait_idle(&queue).await;

        assert_eq!(store.status("p1"), PageStatus::Failed);
        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_completion_gated_on_durable_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        store.seed(p1.clone());
        // A pending page that was never enqueued in this session.
        store.seed(Page::new("p9".into(), "m1".into(), 9, "/x/p9.jpg".into()));

        let queue = Arc::new(OcrQueue::new(store.clone(), MockRecognizer::new()));
        let handle = queue.start();
        queue.enqueue(&p1, Priority::Normal);
        wait_idle(&queue).await;

        assert_eq!(store.status("p1"), PageStatus::Completed);
        assert!(store.completions().is_empty());

        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_pause_lets_in_flight_item_finish() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        let p2 = page_on_disk(dir.path(), "p2", 2);
        store.seed(p1.clone());
        store.seed(p2.clone());
        let recognizer = MockRecognizer::slow(Duration::from_millis(150));

        let queue = Arc::new(OcrQueue::new(store.clone(), recognizer));
        let handle = queue.start();
        queue.enqueue(&p1, Priority::Normal);
        queue.enqueue(&p2, Priority::Normal);

        // Wait for p1 to go in flight, then pause mid-item.
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.progress().current_page.is_none() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.pause();

        // The in-flight page finishes; the next one is never dequeued.
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.progress().current_page.is_some() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.status("p1"), PageStatus::Completed);
        assert_eq!(store.status("p2"), PageStatus::Pending);
        let snap = queue.progress();
        assert!(snap.paused);
        assert!(!snap.processing);
        assert_eq!(snap.total_pages, 2);

        queue.resume();
        wait_idle(&queue).await;
        assert_eq!(store.status("p2"), PageStatus::Completed);

        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_in_flight_page_cannot_be_reenqueued() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        store.seed(p1.clone());
        let recognizer = MockRecognizer::slow(Duration::from_millis(150));

        let queue = Arc::new(OcrQueue::new(store.clone(), recognizer));
        let handle = queue.start();
        queue.enqueue(&p1, Priority::Normal);

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.progress().current_page.is_none() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The in-flight page must not re-enter the backlog at any tier.
        assert!(!queue.enqueue(&p1, Priority::Normal));
        assert!(!queue.enqueue(&p1, Priority::High));
        assert!(queue.backlog_ids().is_empty());

        wait_idle(&queue).await;
        assert_eq!(store.status("p1"), PageStatus::Completed);

        queue.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_events_end_with_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::new();
        let p1 = page_on_disk(dir.path(), "p1", 1);
        store.seed(p1.clone());

        let queue = Arc::new(OcrQueue::new(store.clone(), MockRecognizer::new()));
        let (snapshot, mut rx) = queue.subscribe();
        assert_eq!(snapshot.total_pages, 0);

        let handle = queue.start();
        queue.enqueue(&p1, Priority::Normal);

        let mut progress_events = 0;
        let completion = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event stream stalled")
                .expect("event channel closed");
            match event {
                QueueEvent::Progress(_) => progress_events += 1,
                QueueEvent::Completion(record) => break record,
            }
        };

        // Enqueue, dequeue, post-item, and drained transitions at minimum.
        assert!(progress_events >= 4);
        assert_eq!(completion.total_pages, 1);

        queue.stop();
        let _ = handle.await;
    }

    #[test]
    fn test_eta_absent_before_first_completion() {
        let mut state = QueueState {
            running: true,
            run_started: Some(Instant::now()),
            ..Default::default()
        };
        state.normal.push_back(WorkItem {
            page_id: "p1".into(),
            manga_id: "m1".into(),
            page_number: 1,
            image_path: "/x/p1.jpg".into(),
            priority: Priority::Normal,
            enqueued_at: Utc::now(),
        });

        assert_eq!(state.snapshot().eta_seconds, None);

        state.processed = 1;
        let eta = state.snapshot().eta_seconds.unwrap();
        assert!(eta >= 0.0);
    }

    #[test]
    fn test_total_counts_backlog_processed_and_in_flight() {
        let mut state = QueueState::default();
        state.processed = 3;
        state.current = Some(CurrentPage {
            page_id: "p4".into(),
            manga_id: "m1".into(),
            page_number: 4,
        });
        state.normal.push_back(WorkItem {
            page_id: "p5".into(),
            manga_id: "m1".into(),
            page_number: 5,
            image_path: "/x/p5.jpg".into(),
            priority: Priority::Normal,
            enqueued_at: Utc::now(),
        });

        let snap = state.snapshot();
        assert_eq!(snap.total_pages, 5);
        assert_eq!(snap.processed_pages, 3);
    }
}
