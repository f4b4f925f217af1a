//! Configuration types for background-fetch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard limit the platform grants a periodic-wake invocation
pub const PLATFORM_FETCH_LIMIT: Duration = Duration::from_secs(30);

/// Main configuration for the background refresh
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Document fetched on every refresh
    #[serde(default = "default_document_url")]
    pub document_url: String,

    /// Session identifier, part of every registry key (default: "background-fetch")
    #[serde(default = "default_session_identifier")]
    pub session_identifier: String,

    /// Private directory download files are moved into (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// SQLite file backing the persisted store (default: "./background_fetch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Minimum time between successful fetches (default: 24 hours)
    #[serde(default = "default_success_cooldown", with = "duration_serde")]
    pub success_cooldown: Duration,

    /// Minimum time after a failed fetch before trying again (default: 5 minutes)
    #[serde(default = "default_failure_cooldown", with = "duration_serde")]
    pub failure_cooldown: Duration,

    /// Budget for a periodic-wake invocation (default: 29 seconds)
    ///
    /// Must stay below [`PLATFORM_FETCH_LIMIT`] so the completion is reported before
    /// the platform kills the wake.
    #[serde(default = "default_fetch_deadline", with = "duration_serde")]
    pub fetch_deadline: Duration,

    /// Per-request HTTP timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// HTTP user agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_url: default_document_url(),
            session_identifier: default_session_identifier(),
            temp_dir: default_temp_dir(),
            database_path: default_database_path(),
            success_cooldown: default_success_cooldown(),
            failure_cooldown: default_failure_cooldown(),
            fetch_deadline: default_fetch_deadline(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Fields missing from the file take their default values.
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings for values the refresh cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.session_identifier.is_empty() {
            return Err(invalid("session_identifier", "must not be empty"));
        }
        if url::Url::parse(&self.document_url).is_err() {
            return Err(invalid("document_url", "must be an absolute URL"));
        }
        if self.success_cooldown.is_zero() {
            return Err(invalid("success_cooldown", "must be greater than zero"));
        }
        if self.failure_cooldown.is_zero() {
            return Err(invalid("failure_cooldown", "must be greater than zero"));
        }
        if self.fetch_deadline.is_zero() || self.fetch_deadline >= PLATFORM_FETCH_LIMIT {
            return Err(invalid(
                "fetch_deadline",
                "must be greater than zero and below the 30 second platform limit",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config {
        message: format!("{key} {reason}"),
        key: Some(key.to_string()),
    }
}

fn default_document_url() -> String {
    "https://firebasestorage.googleapis.com/v0/b/sandbox-3dbc9.appspot.com/o/sample%2Fsample01.json?alt=media&token=482849a6-7105-4f88-9bbb-39c32201a846".to_string()
}

fn default_session_identifier() -> String {
    "background-fetch".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./background_fetch.db")
}

fn default_success_cooldown() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_failure_cooldown() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_fetch_deadline() -> Duration {
    Duration::from_secs(29)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    format!("background-fetch/{}", env!("CARGO_PKG_VERSION"))
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
