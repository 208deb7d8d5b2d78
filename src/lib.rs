//! yomu - manga reader backend with background OCR text extraction.
//!
//! Pages are ingested into a SQLite store and recognized in the
//! background by the [`services::OcrQueue`], which drives the external
//! inference service and publishes live progress to the web layer.

pub mod cli;
pub mod config;
pub mod inference;
pub mod models;
pub mod repository;
pub mod server;
pub mod services;
