//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(windows)]
const DEFAULT_EXECUTABLE: &str = r"C:\knime\knime.exe";

#[cfg(not(windows))]
const DEFAULT_EXECUTABLE: &str = "/opt/local/knime_3.6.0/knime";

const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

/// Settings shared by every workflow handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// KNIME executable used for local batch execution.
    pub executable_path: PathBuf,

    /// KNIME Server root URL (e.g. `https://knime.example.com/knime`), used by
    /// `Workflow::join` when no workspace is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// KNIME Server user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// KNIME Server password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Default job timeout forwarded to the server.
    #[serde(with = "duration_ms", default = "default_remote_timeout")]
    pub remote_timeout: Duration,
}

fn default_remote_timeout() -> Duration {
    Duration::from_millis(DEFAULT_REMOTE_TIMEOUT_MS)
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let executable_path = std::env::var("KNIME_EXECUTABLE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_EXECUTABLE));

        let server_url = std::env::var("KNIME_SERVER_URLROOT").ok();
        let username = std::env::var("KNIME_SERVER_USER").ok();
        let password = std::env::var("KNIME_SERVER_PASS").ok();

        let timeout_ms: u64 = std::env::var("KNIME_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);

        Self {
            executable_path,
            server_url,
            username,
            password,
            remote_timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = path.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from(DEFAULT_EXECUTABLE),
            server_url: None,
            username: None,
            password: None,
            remote_timeout: default_remote_timeout(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
