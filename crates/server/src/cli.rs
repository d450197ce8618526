use crate::EMBEDDED_SPEC;
use crate::error::{Result, ServerError};
use crate::logging::LogFormat;
use clap::{Parser, ValueEnum};
use jules_openapi_tools::config::{DEFAULT_TIMEOUT_SECS, JULES_BASE_URL};
use jules_openapi_tools::{ClientConfig, HashPolicy, SpecPin, SpecSource};
use std::path::PathBuf;

/// Run the Jules MCP server on stdio.
#[derive(Debug, Parser)]
#[command(name = "jules-mcp", version, about)]
pub struct Cli {
    /// API key for the Jules API
    #[arg(long, env = "JULES_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Jules API origin
    #[arg(long, env = "JULES_BASE_URL", default_value = JULES_BASE_URL)]
    pub base_url: String,

    /// OpenAPI document to use instead of the embedded one (JSON or YAML)
    #[arg(long, env = "JULES_OPENAPI_SPEC")]
    pub spec: Option<PathBuf>,

    /// Expected `sha256:<hex>` of the OpenAPI document
    #[arg(long, env = "JULES_OPENAPI_SPEC_SHA256")]
    pub spec_sha256: Option<String>,

    /// What to do when the document does not match --spec-sha256
    #[arg(long, value_enum, default_value_t = SpecHashPolicy::Warn)]
    pub spec_hash_policy: SpecHashPolicy,

    /// Per-request timeout in seconds (0 disables)
    #[arg(long, env = "JULES_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpecHashPolicy {
    Warn,
    Fail,
    Ignore,
}

impl From<SpecHashPolicy> for HashPolicy {
    fn from(p: SpecHashPolicy) -> Self {
        match p {
            SpecHashPolicy::Warn => HashPolicy::Warn,
            SpecHashPolicy::Fail => HashPolicy::Fail,
            SpecHashPolicy::Ignore => HashPolicy::Ignore,
        }
    }
}

impl Cli {
    /// The API key, if one was given and is non-blank.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingApiKey`] otherwise.
    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ServerError::MissingApiKey)
    }

    /// # Errors
    ///
    /// Returns [`ServerError::MissingApiKey`] when no API key is available.
    pub fn client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::jules(self.api_key()?)
            .with_base_url(self.base_url.clone())
            .with_timeout_secs(self.timeout_secs))
    }

    #[must_use]
    pub fn spec_source(&self) -> SpecSource {
        match &self.spec {
            Some(path) => SpecSource::File(path.clone()),
            None => SpecSource::Embedded {
                name: "jules.json",
                content: EMBEDDED_SPEC,
            },
        }
    }

    #[must_use]
    pub fn spec_pin(&self) -> Option<SpecPin> {
        self.spec_sha256.as_ref().map(|expected| SpecPin {
            expected: expected.clone(),
            policy: self.spec_hash_policy.into(),
        })
    }
}
