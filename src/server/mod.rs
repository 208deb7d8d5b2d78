//! Web server exposing the OCR queue control surface.
//!
//! The queue is constructed and started here, then shared with the
//! handlers through [`AppState`]. Everything else the frontend needs
//! (manga browsing, page images) is served separately.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::inference::{InferenceClient, Recognizer};
use crate::repository::{PageStore, SqlitePageStore};
use crate::services::OcrQueue;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PageStore>,
    pub queue: Arc<OcrQueue>,
}

/// Start the web server and the background OCR queue.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let store: Arc<dyn PageStore> = Arc::new(SqlitePageStore::open(&settings.database_path)?);

    let client = InferenceClient::new(
        settings.inference.endpoint.as_str(),
        settings.inference.timeout(),
    )?;
    if !client.is_available().await {
        warn!(
            endpoint = %settings.inference.endpoint,
            "inference service not reachable; queued pages will fail until it comes up"
        );
    }
    let recognizer: Arc<dyn Recognizer> = Arc::new(client);

    let queue = Arc::new(OcrQueue::new(store.clone(), recognizer));
    let recovered = queue.recover_pending().await?;
    if recovered > 0 {
        info!(pages = recovered, "resuming recognition of pending pages");
    }
    let worker = queue.start();

    let app = create_router(AppState {
        store,
        queue: queue.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    queue.stop();
    let _ = worker.await;
    Ok(())
}
