use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the insintesi backend
    pub base_url: String,

    /// HTTP request timeout
    pub http_timeout: Duration,

    /// Path to the SQLite session database.
    /// None means an in-memory session (not persisted across restarts).
    pub session_db: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            http_timeout: Duration::from_secs(10),
            session_db: default_session_db(),
        }
    }
}

impl Config {
    /// Load configuration from the environment with code defaults.
    ///
    /// Recognized variables:
    /// - `INSINTESI_BASE_URL` (default `http://localhost:8000`)
    /// - `INSINTESI_HTTP_TIMEOUT` in seconds (default 10)
    /// - `INSINTESI_SESSION_DB` (default `<data dir>/insintesi/session.db`)
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let base_url = std::env::var("INSINTESI_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let http_timeout = match std::env::var("INSINTESI_HTTP_TIMEOUT") {
            Ok(s) => Duration::from_secs(
                s.parse()
                    .with_context(|| format!("Invalid INSINTESI_HTTP_TIMEOUT: {}", s))?,
            ),
            Err(_) => Duration::from_secs(10),
        };

        let session_db = std::env::var("INSINTESI_SESSION_DB")
            .ok()
            .map(|s| expand_tilde(&s))
            .or_else(default_session_db);

        let config = Config {
            base_url,
            http_timeout,
            session_db,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("base_url must start with http:// or https://");
        }
        if self.http_timeout.is_zero() {
            anyhow::bail!("http_timeout must be greater than zero");
        }
        Ok(())
    }
}

/// Default location for the session database
fn default_session_db() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("insintesi").join("session.db"))
}

/// Expand ~ to the home directory in paths
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
