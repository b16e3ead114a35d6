//! Client configuration.
//!
//! Configuration can be built in code with the `with_*` setters or read from a
//! YAML file.  The `YATRI_API_URL` environment variable overrides the default
//! server location but never a value set explicitly.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use utf8path::Path;

use crate::error::{Error, Result};

/// Server used when neither the configuration nor the environment names one.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Environment variable that overrides [`DEFAULT_API_URL`].
pub const API_URL_ENV: &str = "YATRI_API_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REALTIME_PATH: &str = "events";
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Settings shared by the request gateway, the realtime channel and the
/// session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root URL of the backend, without the `/api` suffix.
    pub api_url: String,

    /// Total timeout of a single REST call, in seconds.
    pub timeout_secs: u64,

    /// Path of the realtime event stream, relative to `<api_url>/api/`.
    pub realtime_path: String,

    /// First reconnect delay of the realtime channel, in milliseconds.
    pub reconnect_initial_ms: u64,

    /// Upper bound of the reconnect delay, in milliseconds.
    pub reconnect_max_ms: u64,

    /// File the session is persisted to.  `None` keeps it in memory only.
    pub session_file: Option<String>,
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            api_url: env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            realtime_path: DEFAULT_REALTIME_PATH.to_string(),
            reconnect_initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            session_file: None,
        }
    }

    /// Reads a YAML configuration file.  Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read config {path}"), err))?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the backend root URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the REST call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the realtime stream path.
    pub fn with_realtime_path(mut self, path: impl Into<String>) -> Self {
        self.realtime_path = path.into();
        self
    }

    /// Sets the reconnect backoff bounds.
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_ms = initial.as_millis() as u64;
        self.reconnect_max_ms = max.as_millis() as u64;
        self
    }

    /// Sets or clears the session persistence file.
    pub fn with_session_file(mut self, path: Option<String>) -> Self {
        self.session_file = path;
        self
    }

    /// Returns the REST call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the first reconnect delay.
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    /// Returns the reconnect delay cap.
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Returns the base URL REST paths are joined onto, `<api_url>/api/`.
    pub fn api_base(&self) -> Result<Url> {
        let root = self.api_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{root}/api/"))?)
    }

    /// Returns the URL of the realtime event stream.
    pub fn realtime_url(&self) -> Result<Url> {
        Ok(self
            .api_base()?
            .join(self.realtime_path.trim_start_matches('/'))?)
    }

    /// Builds an absolute download URL for a server-relative file path.
    pub fn file_url(&self, file_path: &str) -> Result<Url> {
        let root = self.api_url.trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{root}/{}",
            file_path.trim_start_matches('/')
        ))?)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.api_base()?;
        if self.reconnect_initial_ms == 0 {
            return Err(Error::validation(
                "reconnect_initial_ms must be positive",
                Some("reconnect_initial_ms".to_string()),
            ));
        }
        if self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(Error::validation(
                "reconnect_max_ms must not be below reconnect_initial_ms",
                Some("reconnect_max_ms".to_string()),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
