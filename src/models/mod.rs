//! Data models shared across the repository, queue, and server layers.

mod completion;
mod page;

pub use completion::{CompletionRecord, CompletionState};
pub use page::{ImageSize, Page, PageStatus, TextBlock};
