//! Configuration loading and management
//!
//! Defaults, then an optional JSON file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{SessionOutcome, UploadOutcome};
use crate::registry::{ActionRegistry, CommandsConfig, RegistryError};

pub const CONFIG_ENV: &str = "HANDSFREE_CONFIG";
pub const UPLOAD_URL_ENV: &str = "HANDSFREE_UPLOAD_URL";
pub const CAPTURE_FIXTURE_ENV: &str = "HANDSFREE_CAPTURE_FIXTURE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Commands(#[from] RegistryError),
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub upload: UploadConfig,
    pub timing: TimingConfig,
    pub prompts: Prompts,
    pub commands: CommandsConfig,

    /// Image served by the file-backed camera
    pub capture_fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub url: String,
    pub field_name: String,
    pub file_name: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Total attempts per session, including the first
    pub max_attempts: u32,
    /// Error text the server uses when it found nothing to read
    pub recognition_marker: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/api/receipt/process-receipt".to_string(),
            field_name: "image".to_string(),
            file_name: "receipt.jpg".to_string(),
            connect_timeout_ms: 180_000,
            read_timeout_ms: 180_000,
            write_timeout_ms: 180_000,
            max_attempts: 3,
            recognition_marker: "OCR failed".to_string(),
        }
    }
}

impl UploadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Longest wait for the next chunk of the response
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Cap on a whole request: sending the image, then reading the answer
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.saturating_add(self.read_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after a prompt before the recognizer opens
    pub listen_delay_ms: u64,
    /// Countdown between the notice and the shutter
    pub capture_delay_ms: u64,
    /// How long an upload may run before "please wait" is spoken
    pub wait_notice_ms: u64,
    /// Simulated speaking rate of the logging speech engine
    pub speech_ms_per_char: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            listen_delay_ms: 500,
            capture_delay_ms: 3000,
            wait_notice_ms: 3000,
            speech_ms_per_char: 40,
        }
    }
}

impl TimingConfig {
    pub fn listen_delay(&self) -> Duration {
        Duration::from_millis(self.listen_delay_ms)
    }

    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }

    pub fn wait_notice(&self) -> Duration {
        Duration::from_millis(self.wait_notice_ms)
    }
}

/// Everything the daemon says out loud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub intro: String,
    pub not_understood: String,
    pub countdown: String,
    pub capture_complete: String,
    pub please_wait: String,
    pub retry_network: String,
    pub retry_server: String,
    /// `{price}` is replaced with the total
    pub success: String,
    pub content_missing: String,
    pub recognition_failed: String,
    /// `{code}` is replaced with the status code
    pub server_error: String,
    pub transport_error: String,
    pub camera_not_ready: String,
    pub capture_failed: String,
    pub encode_failed: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            intro: "Welcome. To read a receipt, double-tap the screen or say capture. \
                    For navigation, swipe right or say navigation. \
                    To hear this again, swipe left or say repeat."
                .to_string(),
            not_understood: "Sorry, I did not understand the command. Please say it again."
                .to_string(),
            countdown: "Taking the picture in 3 seconds.".to_string(),
            capture_complete: "Picture taken.".to_string(),
            please_wait: "Please wait a moment.".to_string(),
            retry_network: "A network error occurred. Trying again.".to_string(),
            retry_server: "The server reported an error. Trying again.".to_string(),
            success: "The total is {price} won. To capture again, double-tap the screen \
                      or say capture."
                .to_string(),
            content_missing: "Could not find a total on the receipt. Please take the picture again."
                .to_string(),
            recognition_failed: "No text was found on the receipt. Please take the picture again."
                .to_string(),
            server_error: "The server could not process the receipt (error code {code}). \
                           Please try again."
                .to_string(),
            transport_error: "Could not connect to the server. Please check the network \
                              and try again."
                .to_string(),
            camera_not_ready: "The camera is not ready. Please try again.".to_string(),
            capture_failed: "Taking the picture failed. Please try again.".to_string(),
            encode_failed: "The image could not be converted. Please try again.".to_string(),
        }
    }
}

impl Prompts {
    /// Final message for a finished capture session
    pub fn report(&self, outcome: &SessionOutcome) -> String {
        use crate::capture::CaptureError;

        match outcome {
            SessionOutcome::CaptureFailed {
                error: CaptureError::EngineNotReady,
            } => self.camera_not_ready.clone(),
            SessionOutcome::CaptureFailed { .. } => self.capture_failed.clone(),
            SessionOutcome::EncodeFailed { .. } => self.encode_failed.clone(),
            SessionOutcome::Uploaded { outcome } => match outcome {
                UploadOutcome::Success { total_price } => self.success.replace("{price}", total_price),
                UploadOutcome::ContentMissing => self.content_missing.clone(),
                UploadOutcome::RecognitionFailed => self.recognition_failed.clone(),
                UploadOutcome::ServerError { code } => {
                    self.server_error.replace("{code}", &code.to_string())
                }
                UploadOutcome::TransportError => self.transport_error.clone(),
            },
        }
    }

    /// Notice spoken before another attempt
    pub fn retry_notice(&self, outcome: &UploadOutcome) -> &str {
        match outcome {
            UploadOutcome::TransportError => &self.retry_network,
            _ => &self.retry_server,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".local")
        .join("share")
        .join("handsfree")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            upload: UploadConfig::default(),
            timing: TimingConfig::default(),
            prompts: Prompts::default(),
            commands: CommandsConfig::default(),
            capture_fixture: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let path = default_data_dir().join("config.json");
                path.exists().then_some(path)
            }
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment-style overrides looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(UPLOAD_URL_ENV) {
            self.upload.url = url;
        }
        if let Some(path) = var(CAPTURE_FIXTURE_ENV) {
            self.capture_fixture = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::Invalid("upload.max_attempts must be at least 1".into()));
        }
        if self.upload.url.trim().is_empty() {
            return Err(ConfigError::Invalid("upload.url must not be empty".into()));
        }
        ActionRegistry::from_config(&self.commands)?;
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
