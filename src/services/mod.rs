//! Service layer for manga processing business logic.
//!
//! Domain logic separated from HTTP concerns. Services are constructed
//! explicitly and handed to the server as shared state.

pub mod completion;
pub mod queue;

pub use completion::CompletionTracker;
pub use queue::{OcrQueue, Priority, ProgressSnapshot, QueueEvent, WorkItem};
