//! `OpenAPI` document loading.
//!
//! Loading is explicit: every call returns an owned document and nothing is cached
//! process-wide. The caller threads the value into [`crate::indexer`].

use crate::error::{Result, SpecError};
use openapiv3::OpenAPI;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// A parsed `OpenAPI` 3.x document.
pub type ApiDocument = OpenAPI;

/// Where the document comes from.
#[derive(Debug, Clone)]
pub enum SpecSource {
    /// Document compiled into the binary.
    Embedded {
        name: &'static str,
        content: &'static str,
    },
    /// Document read from disk at startup.
    File(PathBuf),
}

impl SpecSource {
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            SpecSource::Embedded { name, .. } => format!("embedded:{name}"),
            SpecSource::File(path) => path.display().to_string(),
        }
    }
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log a warning if the hash doesn't match.
    #[default]
    Warn,
    /// Refuse the document if the hash doesn't match.
    Fail,
    /// Skip verification.
    Ignore,
}

/// Optional content pin (`sha256:<hex>`).
#[derive(Debug, Clone)]
pub struct SpecPin {
    pub expected: String,
    pub policy: HashPolicy,
}

/// Load, verify and parse a document.
///
/// # Errors
///
/// Returns [`SpecError`] if the file cannot be read, the pin check fails under
/// [`HashPolicy::Fail`], the content is not valid JSON/YAML `OpenAPI`, or the document is
/// not `OpenAPI` 3.x.
pub fn load_document(source: &SpecSource, pin: Option<&SpecPin>) -> Result<ApiDocument> {
    let location = source.location();
    let content = match source {
        SpecSource::Embedded { content, .. } => {
            tracing::debug!(location = %location, "using embedded OpenAPI document");
            (*content).to_string()
        }
        SpecSource::File(path) => {
            tracing::info!(location = %location, "loading OpenAPI document");
            std::fs::read_to_string(path).map_err(|e| SpecError::Read {
                path: location.clone(),
                source: e,
            })?
        }
    };

    if let Some(pin) = pin {
        verify_pin(&location, &content, pin)?;
    }

    parse_document(&location, &content)
}

/// Parse document text (JSON or YAML).
///
/// # Errors
///
/// Returns [`SpecError::Parse`] for malformed content and
/// [`SpecError::UnsupportedVersion`] for non-3.x documents.
pub fn parse_document(location: &str, content: &str) -> Result<ApiDocument> {
    // JSON is a valid subset of YAML, so serde_yaml alone is enough.
    let doc: OpenAPI = serde_yaml::from_str(content).map_err(|e| SpecError::Parse {
        location: location.to_string(),
        source: e,
    })?;

    if !doc.openapi.starts_with("3.") {
        return Err(SpecError::UnsupportedVersion {
            location: location.to_string(),
            version: doc.openapi.clone(),
        });
    }

    Ok(doc)
}

/// `sha256:<hex>` digest of document text.
#[must_use]
pub fn content_hash(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

fn verify_pin(location: &str, content: &str, pin: &SpecPin) -> Result<()> {
    if pin.policy == HashPolicy::Ignore {
        return Ok(());
    }

    let actual = content_hash(content);
    if actual.eq_ignore_ascii_case(pin.expected.trim()) {
        return Ok(());
    }

    match pin.policy {
        HashPolicy::Fail => Err(SpecError::HashMismatch {
            location: location.to_string(),
            expected: pin.expected.clone(),
            actual,
        }),
        HashPolicy::Warn => {
            tracing::warn!(
                location = %location,
                expected = %pin.expected,
                actual = %actual,
                "OpenAPI document hash mismatch"
            );
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}
