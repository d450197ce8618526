use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Origin of the Jules REST API.
pub const JULES_BASE_URL: &str = "https://jules.googleapis.com";

/// Header carrying the Jules API key on every outbound request.
pub const JULES_API_KEY_HEADER: &str = "X-Goog-Api-Key";

/// Default per-request timeout (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration of the injected, pre-authenticated HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Fixed base origin every operation path is appended to.
    pub base_url: String,

    /// Static identity header attached to every request.
    pub auth: StaticHeaderAuth,

    /// Extra static headers (also never overridable per call).
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,

    /// Per-request timeout in seconds. `0` disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// TCP connect timeout in seconds.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// `User-Agent` override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Maximum accepted response body size. `None` = unlimited.
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    /// Client configuration for the public Jules API.
    #[must_use]
    pub fn jules(api_key: impl Into<String>) -> Self {
        Self {
            base_url: JULES_BASE_URL.to_string(),
            auth: StaticHeaderAuth {
                name: JULES_API_KEY_HEADER.to_string(),
                value: api_key.into(),
            },
            default_headers: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: None,
            user_agent: None,
            max_response_bytes: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// A single static header used as the service identity (API key).
#[derive(Clone, Deserialize, Serialize)]
pub struct StaticHeaderAuth {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for StaticHeaderAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHeaderAuth")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}
