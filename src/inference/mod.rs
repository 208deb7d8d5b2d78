//! Client for the external inference service.
//!
//! Recognition is performed out-of-process by the Python inference
//! service (comic-text-detector + manga-ocr behind FastAPI). This module
//! only speaks its HTTP API; it never runs models locally.

mod client;

pub use client::{Detection, InferenceClient, OcrClientError, Recognizer};
