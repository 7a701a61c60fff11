//! Process configuration

use crate::error::SessionError;
use std::path::PathBuf;
use std::time::Duration;

/// Default staleness window for the package catalog
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(5 * 60);

/// Default HTTP request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Configuration for the backend, token broker and hand-off store
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the REST backend (catalog, wallet, billing)
    pub api_base_url: String,
    /// Bearer token attached to backend calls
    pub api_token: Option<String>,
    /// Token-issuing endpoint; required at session start
    pub token_endpoint: Option<String>,
    /// Routing address used when the token response omits one
    pub routing_fallback: Option<String>,
    /// `SQLite` file holding the transcript hand-off
    pub db_path: PathBuf,
    pub catalog_ttl: Duration,
    pub http_timeout: Duration,
    /// Name presented to the token broker
    pub display_name: Option<String>,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env, test map, ...)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = non_empty("TUTOR_DB_PATH").map_or_else(
            || {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(format!("{home}/.tutor-session/handoff.db"))
            },
            PathBuf::from,
        );

        let secs = |key: &str, default: Duration| {
            non_empty(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(default, Duration::from_secs)
        };

        Self {
            api_base_url: non_empty("TUTOR_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            api_token: non_empty("TUTOR_API_TOKEN"),
            token_endpoint: non_empty("TUTOR_TOKEN_ENDPOINT"),
            routing_fallback: non_empty("TUTOR_ROUTING_FALLBACK"),
            db_path,
            catalog_ttl: secs("TUTOR_CATALOG_TTL_SECS", DEFAULT_CATALOG_TTL),
            http_timeout: secs("TUTOR_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT),
            display_name: non_empty("TUTOR_DISPLAY_NAME"),
        }
    }

    /// The token endpoint, or a configuration error when unset
    pub fn require_token_endpoint(&self) -> Result<&str, SessionError> {
        self.token_endpoint.as_deref().ok_or_else(|| {
            SessionError::configuration("TUTOR_TOKEN_ENDPOINT is not configured")
        })
    }
}
