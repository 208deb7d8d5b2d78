//! Configuration for the yomu server.
//!
//! Settings come from an optional TOML file with environment variable
//! overrides on top (`YOMU_*`), so container deployments can skip the
//! file entirely.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default inference service port, matching the Python service.
const DEFAULT_INFERENCE_PORT: u16 = 8847;
/// Default backend port.
const DEFAULT_SERVER_PORT: u16 = 3847;

/// Inference service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Base URL of the inference service.
    pub endpoint: String,
    /// Per-request timeout in seconds. Recognition of a dense page can
    /// take a while on CPU, so this is generous by default.
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: format!("http://localhost:{DEFAULT_INFERENCE_PORT}"),
            timeout_secs: 120,
        }
    }
}

impl InferenceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Web server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database location.
    pub database_path: PathBuf,
    pub inference: InferenceSettings,
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("yomu.db"),
            inference: InferenceSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or `yomu.toml` if it exists,
    /// or defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new("yomu.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env();
        Ok(settings)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("YOMU_DATABASE") {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(url) = std::env::var("YOMU_INFERENCE_URL") {
            self.inference.endpoint = url;
        }
        if let Ok(host) = std::env::var("YOMU_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("YOMU_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }
}
