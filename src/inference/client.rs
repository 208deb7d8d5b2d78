//! HTTP client for the manga inference service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{ImageSize, TextBlock};

/// Errors from the inference service client.
#[derive(Debug, Error)]
pub enum OcrClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Inference service error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Text regions detected on a single page image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub blocks: Vec<TextBlock>,
    pub image_size: ImageSize,
}

/// Seam between the OCR queue and the recognition backend.
///
/// The queue only depends on this trait; tests substitute scripted fakes.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Detect and extract text regions from a page image.
    ///
    /// `path_hint` is the page's original on-disk path; the service uses
    /// it to place debug overlay images next to the source file.
    async fn detect_text(&self, image: Vec<u8>, path_hint: &str)
        -> Result<Detection, OcrClientError>;
}

/// Wire format of `POST /ocr/detect`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectResponse {
    success: bool,
    #[serde(default)]
    text_blocks: Vec<TextBlock>,
    image_size: ImageSize,
}

/// FastAPI error envelope.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: String,
}

/// Client for the inference service HTTP API.
pub struct InferenceClient {
    endpoint: String,
    timeout: Duration,
    client: Client,
}

impl InferenceClient {
    /// Create a new client with a bounded per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OcrClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrClientError::Connection(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    /// Check if the inference service is reachable and healthy.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> OcrClientError {
        if e.is_timeout() {
            OcrClientError::Timeout(self.timeout)
        } else {
            OcrClientError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl Recognizer for InferenceClient {
    async fn detect_text(
        &self,
        image: Vec<u8>,
        path_hint: &str,
    ) -> Result<Detection, OcrClientError> {
        let file_name = Path::new(path_hint)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.jpg".to_string());
        let mime = mime_guess::from_path(path_hint).first_or_octet_stream();

        let part = Part::bytes(image)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|e| OcrClientError::Parse(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("original_path", path_hint.to_string());

        let url = format!("{}/ocr/detect", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<ErrorResponse>()
                .await
                .map(|e| e.detail)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(OcrClientError::Api(detail));
        }

        let body: DetectResponse = resp
            .json()
            .await
            .map_err(|e| OcrClientError::Parse(e.to_string()))?;

        if !body.success {
            return Err(OcrClientError::Api(
                "inference service reported failure".to_string(),
            ));
        }

        debug!(
            blocks = body.text_blocks.len(),
            width = body.image_size.width,
            height = body.image_size.height,
            "text detection complete"
        );

        Ok(Detection {
            blocks: body.text_blocks,
            image_size: body.image_size,
        })
    }
}
