//! Request building: tool arguments -> concrete HTTP request.
//!
//! Building is pure. Nothing here touches the network, so every validation failure is
//! reported before a byte is sent.

use crate::error::InvocationError;
use crate::indexer::{
    BodyShape, InputField, OperationDescriptor, ParamLocation, QuerySerialization,
    VERBATIM_BODY_FIELD,
};
use openapiv3::QueryStyle;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use rmcp::model::JsonObject;
use serde_json::{Map, Value};

type BuildResult<T> = std::result::Result<T, InvocationError>;

/// One `key=value` query pair (unencoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPair {
    pub key: String,
    pub value: String,
    pub allow_reserved: bool,
}

/// Serialized request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub content_type: String,
    pub value: Value,
}

/// A fully-resolved HTTP request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    /// Percent-encoded path with every placeholder substituted.
    pub path: String,
    pub query: Vec<QueryPair>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestPayload>,
}

impl PreparedRequest {
    /// Encoded query string (without the leading `?`), if any.
    #[must_use]
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        let encoded: Vec<String> = self
            .query
            .iter()
            .map(|p| {
                format!(
                    "{}={}",
                    encode_component(&p.key, false),
                    encode_component(&p.value, p.allow_reserved)
                )
            })
            .collect();
        Some(encoded.join("&"))
    }
}

/// Build a request for `descriptor` from caller-supplied arguments.
///
/// `reserved_headers` are the transport's fixed headers (identity and defaults); a
/// declared header parameter with one of these names is never sent.
///
/// # Errors
///
/// Returns [`InvocationError::Validation`] for unknown arguments, missing required
/// arguments, values that don't match the declared type or enum, and values that
/// cannot be carried in a header.
pub fn build_request(
    descriptor: &OperationDescriptor,
    arguments: &JsonObject,
    reserved_headers: &[String],
) -> BuildResult<PreparedRequest> {
    reject_unknown_arguments(descriptor, arguments)?;

    let mut path = descriptor.path.clone();
    let mut query: Vec<QueryPair> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut cookies: Vec<String> = Vec::new();
    let mut body_fields: Map<String, Value> = Map::new();
    let mut body_payload: Option<Value> = None;

    for field in &descriptor.fields {
        // Explicit null is the same as leaving the argument out.
        let value = arguments.get(&field.name).filter(|v| !v.is_null());

        let Some(value) = value else {
            if field.required {
                return Err(InvocationError::validation(
                    &field.name,
                    format!("missing required field: {}", field.name),
                ));
            }
            continue;
        };

        let value = check_value(field, value)?;

        match field.location {
            ParamLocation::Path => {
                let rendered = value_to_string(&value);
                // URL parsing collapses dot segments, which would change the route.
                if rendered == "." || rendered == ".." {
                    return Err(InvocationError::validation(
                        &field.name,
                        format!("argument '{}' cannot be '{rendered}'", field.name),
                    ));
                }
                let encoded = encode_component(&rendered, false);
                path = path.replace(&format!("{{{}}}", field.name), &encoded);
            }
            ParamLocation::Query => {
                let default_ser = QuerySerialization::default();
                let ser = field.query.as_ref().unwrap_or(&default_ser);
                query.extend(serialize_query_param(
                    &field.name,
                    &value,
                    field.required,
                    ser,
                ));
            }
            ParamLocation::Header => {
                if reserved_headers
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(&field.name))
                {
                    tracing::warn!(
                        tool = %descriptor.name,
                        header = %field.name,
                        "ignoring header argument that would override a fixed client header"
                    );
                    continue;
                }
                let rendered = value_to_string(&value);
                check_header(&field.name, &rendered)?;
                headers.push((field.name.clone(), rendered));
            }
            ParamLocation::Cookie => {
                let rendered = value_to_string(&value);
                check_header("Cookie", &rendered).map_err(|_| {
                    InvocationError::validation(
                        &field.name,
                        format!("cookie '{}' contains invalid characters", field.name),
                    )
                })?;
                cookies.push(format!("{}={}", field.name, rendered));
            }
            ParamLocation::Body => {
                if matches!(descriptor.body, BodyShape::Verbatim { .. })
                    && field.name == VERBATIM_BODY_FIELD
                {
                    body_payload = Some(value);
                } else {
                    body_fields.insert(field.name.clone(), value);
                }
            }
        }
    }

    if !cookies.is_empty() {
        headers.push(("Cookie".to_string(), cookies.join("; ")));
    }

    let body = match &descriptor.body {
        BodyShape::None => None,
        BodyShape::Fields { content_type } => (!body_fields.is_empty()).then(|| RequestPayload {
            content_type: content_type.clone(),
            value: Value::Object(body_fields),
        }),
        BodyShape::Verbatim { content_type } => body_payload.map(|value| RequestPayload {
            content_type: content_type.clone(),
            value,
        }),
    };

    // Substituted values are percent-encoded, so any brace left is an undeclared placeholder.
    if let Some(start) = path.find('{') {
        let placeholder = path[start..].split('}').next().unwrap_or_default();
        return Err(InvocationError::malformed(format!(
            "path template '{}' has no value for placeholder {placeholder}}}",
            descriptor.path
        )));
    }

    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    Ok(PreparedRequest {
        method: descriptor.method.clone(),
        path,
        query,
        headers,
        body,
    })
}

fn reject_unknown_arguments(
    descriptor: &OperationDescriptor,
    arguments: &JsonObject,
) -> BuildResult<()> {
    let known: Vec<&str> = descriptor.fields.iter().map(|f| f.name.as_str()).collect();

    for key in arguments.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        let message = match find_similar_strings(key, &known).first() {
            Some(s) => format!("unknown argument '{key}' (did you mean '{s}'?)"),
            None => format!("unknown argument '{key}'"),
        };
        return Err(InvocationError::validation(key, message));
    }
    Ok(())
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

/// Light type and enum check; scalars for string-typed non-body fields become strings.
fn check_value(field: &InputField, value: &Value) -> BuildResult<Value> {
    let declared = field.schema.get("type").and_then(Value::as_str);

    let value = match (declared, value, field.location) {
        (_, _, ParamLocation::Body) => value.clone(),
        (Some("string"), Value::Number(_) | Value::Bool(_), _) => {
            Value::String(value_to_string(value))
        }
        _ => value.clone(),
    };

    if let Some(expected) = declared
        && !matches_type(expected, &value)
    {
        return Err(InvocationError::validation(
            &field.name,
            format!(
                "argument '{}' must be of type {expected}, got {}",
                field.name,
                json_type_name(&value)
            ),
        ));
    }

    if let Some(allowed) = field.schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(&value)
    {
        let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
        return Err(InvocationError::validation(
            &field.name,
            format!(
                "argument '{}' must be one of [{}]",
                field.name,
                rendered.join(", ")
            ),
        ));
    }

    Ok(value)
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown type keywords are not ours to judge.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_header(name: &str, value: &str) -> BuildResult<()> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
        InvocationError::validation(name, format!("'{name}' is not a valid header name"))
    })?;
    HeaderValue::from_str(value).map_err(|_| {
        InvocationError::validation(
            name,
            format!("value for header '{name}' contains invalid characters"),
        )
    })?;
    Ok(())
}

fn serialize_query_param(
    name: &str,
    value: &Value,
    required: bool,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    let pair = |key: String, value: String| QueryPair {
        key,
        value,
        allow_reserved: ser.allow_reserved,
    };

    if query_value_is_empty(value) {
        return if ser.allow_empty_value || required {
            vec![pair(name.to_string(), String::new())]
        } else {
            Vec::new()
        };
    }

    match value {
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(value_to_string).collect();
            match ser.style {
                QueryStyle::Form if ser.explode => items
                    .into_iter()
                    .map(|v| pair(name.to_string(), v))
                    .collect(),
                QueryStyle::SpaceDelimited => vec![pair(name.to_string(), items.join(" "))],
                QueryStyle::PipeDelimited => vec![pair(name.to_string(), items.join("|"))],
                QueryStyle::Form | QueryStyle::DeepObject => {
                    vec![pair(name.to_string(), items.join(","))]
                }
            }
        }
        Value::Object(map) => match ser.style {
            QueryStyle::DeepObject => map
                .iter()
                .map(|(k, v)| pair(format!("{name}[{k}]"), value_to_string(v)))
                .collect(),
            QueryStyle::Form if ser.explode => map
                .iter()
                .map(|(k, v)| pair(k.clone(), value_to_string(v)))
                .collect(),
            QueryStyle::Form => {
                let flat: Vec<String> = map
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), value_to_string(v)])
                    .collect();
                vec![pair(name.to_string(), flat.join(","))]
            }
            QueryStyle::SpaceDelimited | QueryStyle::PipeDelimited => {
                vec![pair(name.to_string(), value.to_string())]
            }
        },
        _ => vec![pair(name.to_string(), value_to_string(value))],
    }
}

fn query_value_is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Percent-encode everything but RFC 3986 unreserved characters.
///
/// With `allow_reserved`, reserved characters other than `&`, `=` and `#` pass through
/// raw; those three would corrupt the `&`-joined query string.
fn encode_component(s: &str, allow_reserved: bool) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) || (allow_reserved && is_reserved_but_safe_in_pairs(b)) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

fn is_reserved_but_safe_in_pairs(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
    )
}
