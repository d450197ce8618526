//! Response translation: raw HTTP answer -> typed invocation outcome.

use crate::error::InvocationError;
use crate::executor::RawResponse;
use crate::indexer::is_json_media_type;
use base64::Engine as _;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// Response headers passed through to the caller on success.
const FORWARDED_HEADERS: &[&str] = &[
    "content-type",
    "location",
    "etag",
    "retry-after",
    "x-request-id",
    "x-goog-request-id",
];

/// Machine-distinguishable failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    ValidationError,
    TransportError,
    ClientError,
    ServerError,
    UnexpectedStatus,
    NotFoundError,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ValidationError => "ValidationError",
            FailureKind::TransportError => "TransportError",
            FailureKind::ClientError => "ClientError",
            FailureKind::ServerError => "ServerError",
            FailureKind::UnexpectedStatus => "UnexpectedStatus",
            FailureKind::NotFoundError => "NotFoundError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary {
        encoding: &'static str,
        #[serde(rename = "mimeType")]
        mime_type: Option<String>,
        data: String,
    },
    /// Serializes as `null`.
    Empty,
}

impl ResponseBody {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Text(s) => Value::String(s.clone()),
            ResponseBody::Empty => Value::Null,
            ResponseBody::Binary { .. } => serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }

    /// Human-readable rendering for MCP text content.
    fn render(&self) -> String {
        match self {
            ResponseBody::Text(s) => s.clone(),
            ResponseBody::Empty => String::new(),
            other => other.to_value().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessPayload {
    pub status: u16,
    pub body: ResponseBody,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Upstream body, preserved verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,
    /// Offending argument, for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Outcome of one tool invocation. Never an `Err`: failures are values.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(SuccessPayload),
    Failure(InvocationFailure),
}

impl InvocationResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success(_))
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            InvocationResult::Success(_) => None,
            InvocationResult::Failure(f) => Some(f.kind),
        }
    }

    /// Upstream status code, when a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            InvocationResult::Success(s) => Some(s.status),
            InvocationResult::Failure(f) => f.status,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        InvocationResult::Failure(InvocationFailure {
            kind: FailureKind::NotFoundError,
            message: format!("unknown tool '{name}'"),
            status: None,
            body: None,
            field: None,
        })
    }

    /// Map to an MCP tool result.
    ///
    /// Structured content is always `{status, body, headers}` on success and
    /// `{kind, message, ...}` on failure; failures set `isError`.
    #[must_use]
    pub fn into_call_tool_result(self) -> CallToolResult {
        match self {
            InvocationResult::Success(payload) => {
                let text = match &payload.body {
                    ResponseBody::Empty => format!("HTTP {} (no content)", payload.status),
                    body => body.render(),
                };
                CallToolResult {
                    content: vec![Content::text(text)],
                    structured_content: Some(json!({
                        "status": payload.status,
                        "body": payload.body.to_value(),
                        "headers": payload.headers,
                    })),
                    is_error: Some(false),
                    meta: None,
                }
            }
            InvocationResult::Failure(failure) => {
                let mut text = format!("{}: {}", failure.kind, failure.message);
                if let Some(body) = failure.body.as_ref().filter(|b| **b != ResponseBody::Empty) {
                    text.push('\n');
                    text.push_str(&body.render());
                }
                let structured = serde_json::to_value(&failure).ok();
                CallToolResult {
                    content: vec![Content::text(text)],
                    structured_content: structured,
                    is_error: Some(true),
                    meta: None,
                }
            }
        }
    }
}

impl From<InvocationError> for InvocationResult {
    fn from(err: InvocationError) -> Self {
        let (kind, field) = match &err {
            InvocationError::Validation { field, .. } => {
                (FailureKind::ValidationError, field.clone())
            }
            InvocationError::Transport(_) => (FailureKind::TransportError, None),
        };
        InvocationResult::Failure(InvocationFailure {
            kind,
            message: err.to_string(),
            status: None,
            body: None,
            field,
        })
    }
}

/// Translate a raw response. Failure statuses become failure values, never errors.
#[must_use]
pub fn translate_response(raw: &RawResponse) -> InvocationResult {
    let body = decode_body(raw);

    if (200..300).contains(&raw.status) {
        let headers = raw
            .headers
            .iter()
            .filter(|(k, _)| FORWARDED_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h)))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        return InvocationResult::Success(SuccessPayload {
            status: raw.status,
            body,
            headers,
        });
    }

    let kind = match raw.status {
        400..=499 => FailureKind::ClientError,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::UnexpectedStatus,
    };
    let reason = reqwest::StatusCode::from_u16(raw.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");

    InvocationResult::Failure(InvocationFailure {
        kind,
        message: format!("upstream returned {} {reason}", raw.status),
        status: Some(raw.status),
        body: Some(body),
        field: None,
    })
}

/// JSON when the content type says so (or is missing) and the bytes parse; UTF-8 text
/// otherwise; base64 as a last resort.
fn decode_body(raw: &RawResponse) -> ResponseBody {
    if raw.body.is_empty() {
        return ResponseBody::Empty;
    }

    let content_type = raw.content_type();
    if content_type.is_none_or(is_json_media_type)
        && let Ok(v) = serde_json::from_slice::<Value>(&raw.body)
    {
        return ResponseBody::Json(v);
    }

    match std::str::from_utf8(&raw.body) {
        Ok(s) => ResponseBody::Text(s.to_string()),
        Err(_) => ResponseBody::Binary {
            encoding: "base64",
            mime_type: content_type.map(str::to_string),
            data: base64::engine::general_purpose::STANDARD.encode(&raw.body),
        },
    }
}
