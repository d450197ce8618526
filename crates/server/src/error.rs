//! Error types for the server binary.

use jules_openapi_tools::{ConfigError, SpecError};
use thiserror::Error;

/// Startup and serving errors. All of them are fatal.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No API key on the command line or in the environment
    #[error("Provide --api-key or set the JULES_API_KEY environment variable.")]
    MissingApiKey,

    /// Invalid client configuration (base URL, API key characters)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed or ambiguous `OpenAPI` document
    #[error("OpenAPI error: {0}")]
    Spec(#[from] SpecError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// MCP session failed to start or ended abnormally
    #[error("MCP transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Process exit code: 2 for usage errors, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            ServerError::MissingApiKey => 2,
            _ => 1,
        }
    }
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
