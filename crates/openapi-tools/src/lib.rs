//! OpenAPI -> MCP tool bridge.
//!
//! The crate turns an `OpenAPI` 3.x document into an immutable [`registry::ToolRegistry`]:
//! - [`loader`] parses the document (embedded or from disk)
//! - [`indexer`] produces one [`indexer::OperationDescriptor`] per operation
//! - [`request`] builds concrete HTTP requests from caller arguments
//! - [`executor`] sends them through an injected, pre-authenticated client
//! - [`response`] maps raw responses into typed invocation results
//!
//! MCP transport and process lifecycle live in the server crate.

pub mod config;
pub mod error;
pub mod executor;
pub mod indexer;
pub mod loader;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod response;

pub use config::ClientConfig;
pub use error::{ConfigError, InvocationError, SpecError};
pub use executor::{HttpTransport, ReqwestTransport};
pub use loader::{HashPolicy, SpecPin, SpecSource, load_document};
pub use registry::{ToolRegistry, ToolSummary};
pub use response::{FailureKind, InvocationResult};
