//! Operation indexing.
//!
//! Walks a parsed document and produces one immutable [`OperationDescriptor`] per
//! `(path, method)` pair. Descriptors are the only durable artifact of startup: the
//! document itself can be dropped once indexing is done.

use crate::error::{Result, SpecError};
use crate::loader::ApiDocument;
use crate::resolver::DocumentResolver;
use openapiv3::{
    MediaType, Operation, Parameter, ParameterSchemaOrContent, PathItem, QueryStyle, ReferenceOr,
    RequestBody, Response, StatusCode,
};
use regex::Regex;
use reqwest::Method;
use rmcp::model::JsonObject;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// MCP caps tool names at 64 characters.
const MAX_TOOL_NAME_LEN: usize = 64;

/// Name of the single input field used for non-object request bodies.
pub const VERBATIM_BODY_FIELD: &str = "body";

/// Where an input field is placed in the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
            ParamLocation::Body => "body",
        };
        f.write_str(s)
    }
}

/// Query serialization settings (style/explode), for query parameters only.
#[derive(Debug, Clone)]
pub struct QuerySerialization {
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

impl Default for QuerySerialization {
    fn default() -> Self {
        Self {
            style: QueryStyle::Form,
            explode: true,
            allow_reserved: false,
            allow_empty_value: false,
        }
    }
}

/// One named input of a tool, tagged with its origin.
#[derive(Debug, Clone)]
pub struct InputField {
    /// Argument name (also the wire name: parameter name or body property).
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// Self-contained JSON Schema for the value.
    pub schema: Value,
    pub query: Option<QuerySerialization>,
}

/// How body fields are reassembled into a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyShape {
    /// The operation has no request body.
    None,
    /// Object body: each top-level property is its own input field.
    Fields { content_type: String },
    /// Scalar/array/free-form body: the [`VERBATIM_BODY_FIELD`] value is the payload.
    Verbatim { content_type: String },
}

/// Indexed, tool-ready form of one `OpenAPI` operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    /// Unique tool name.
    pub name: String,
    pub operation_id: Option<String>,
    pub method: Method,
    /// Path template (e.g. `/v1alpha/sessions/{sessionId}`).
    pub path: String,
    pub description: String,
    pub deprecated: bool,
    pub fields: Vec<InputField>,
    pub body: BodyShape,
    /// Merged input schema published to clients.
    pub input_schema: JsonObject,
    /// Best-effort schema of the 2xx (or `default`) response body. Informational only.
    pub output_hint: Option<Value>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `METHOD /path`, used in logs and error messages.
    #[must_use]
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Index every operation of a document, in paths-then-methods order.
///
/// # Errors
///
/// Returns [`SpecError`] if two operations resolve to the same tool name, if any `$ref`
/// cannot be resolved, or if an operation's inputs are ambiguous.
pub fn index_document(doc: &ApiDocument) -> Result<Vec<OperationDescriptor>> {
    let resolver = DocumentResolver::new(doc)?;
    let mut descriptors: Vec<OperationDescriptor> = Vec::new();
    let mut names: HashMap<String, String> = HashMap::new();

    for (path, item) in &doc.paths.paths {
        let item: PathItem = resolver.resolve(item, "path item")?;

        let methods = [
            ("get", &item.get),
            ("put", &item.put),
            ("post", &item.post),
            ("delete", &item.delete),
            ("options", &item.options),
            ("head", &item.head),
            ("patch", &item.patch),
            ("trace", &item.trace),
        ];

        for (method, operation) in methods {
            let Some(operation) = operation else {
                continue;
            };

            let descriptor =
                describe_operation(&resolver, path, method, &item.parameters, operation)?;

            let route = descriptor.route();
            if let Some(first) = names.insert(descriptor.name.clone(), route.clone()) {
                return Err(SpecError::DuplicateToolName {
                    name: descriptor.name,
                    first,
                    second: route,
                });
            }

            tracing::debug!(
                tool = %descriptor.name,
                route = %route,
                fields = descriptor.fields.len(),
                "indexed operation"
            );
            descriptors.push(descriptor);
        }
    }

    Ok(descriptors)
}

fn describe_operation(
    resolver: &DocumentResolver,
    path: &str,
    method: &'static str,
    path_item_params: &[ReferenceOr<Parameter>],
    operation: &Operation,
) -> Result<OperationDescriptor> {
    let invalid = |message: String| SpecError::InvalidOperation {
        method: method.to_uppercase(),
        path: path.to_string(),
        message,
    };

    let name = operation
        .operation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| generate_canonical_name(method, path), str::to_string);

    let mut fields: Vec<InputField> = Vec::new();
    for param in merge_parameters(resolver, path_item_params, &operation.parameters)? {
        let field = extract_parameter(resolver, &param)?;
        if let Some(existing) = fields.iter().find(|f| f.name == field.name) {
            return Err(invalid(format!(
                "argument '{}' is declared in both {} and {}",
                field.name, existing.location, field.location
            )));
        }
        fields.push(field);
    }

    let body = match &operation.request_body {
        Some(body_ref) => {
            let body: RequestBody = resolver.resolve(body_ref, "request body")?;
            let (shape, body_fields) = extract_body_fields(resolver, &body)?;
            for bf in body_fields {
                if let Some(existing) = fields.iter().find(|f| f.name == bf.name) {
                    return Err(invalid(format!(
                        "body property '{}' collides with {} parameter '{}'",
                        bf.name, existing.location, existing.name
                    )));
                }
                fields.push(bf);
            }
            shape
        }
        None => BodyShape::None,
    };

    for field in fields.iter().filter(|f| f.location == ParamLocation::Path) {
        if !path.contains(&format!("{{{}}}", field.name)) {
            return Err(invalid(format!(
                "path parameter '{}' does not appear in the path template",
                field.name
            )));
        }
    }

    let output_hint = derive_output_hint(resolver, operation)?;
    let input_schema = build_input_schema(&fields);

    Ok(OperationDescriptor {
        name,
        operation_id: operation.operation_id.clone(),
        method: resolve_http_method(method),
        path: path.to_string(),
        description: tool_description(operation, method, path),
        deprecated: operation.deprecated,
        fields,
        body,
        input_schema,
        output_hint,
    })
}

fn tool_description(operation: &Operation, method: &str, path: &str) -> String {
    let text = match (&operation.summary, &operation.description) {
        (Some(s), Some(d)) if s.trim() != d.trim() => format!("{}\n\n{}", s.trim(), d.trim()),
        (Some(s), _) => s.trim().to_string(),
        (None, Some(d)) => d.trim().to_string(),
        (None, None) => format!("Calls {} {}", method.to_uppercase(), path),
    };
    if operation.deprecated {
        format!("[deprecated] {text}")
    } else {
        text
    }
}

/// Merge path-level and operation-level parameters.
///
/// Operation-level declarations replace path-level ones with the same `(location, name)`,
/// keeping the path-level position.
fn merge_parameters(
    resolver: &DocumentResolver,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> Result<Vec<Parameter>> {
    fn key_for(p: &Parameter) -> (&'static str, String) {
        let loc = match p {
            Parameter::Path { .. } => "path",
            Parameter::Query { .. } => "query",
            Parameter::Header { .. } => "header",
            Parameter::Cookie { .. } => "cookie",
        };
        (loc, p.parameter_data_ref().name.clone())
    }

    let mut merged: Vec<Parameter> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params) {
        let rp: Parameter = resolver.resolve(p, "parameter")?;
        let k = key_for(&rp);
        if let Some(i) = index.get(&k).copied() {
            merged[i] = rp;
        } else {
            index.insert(k, merged.len());
            merged.push(rp);
        }
    }

    Ok(merged)
}

fn extract_parameter(resolver: &DocumentResolver, param: &Parameter) -> Result<InputField> {
    let data = param.parameter_data_ref();
    let (location, required, query) = match param {
        // Path params are always required.
        Parameter::Path { .. } => (ParamLocation::Path, true, None),
        Parameter::Query {
            style,
            allow_reserved,
            allow_empty_value,
            ..
        } => {
            let explode = data
                .explode
                .unwrap_or_else(|| default_query_explode(style));
            (
                ParamLocation::Query,
                data.required,
                Some(QuerySerialization {
                    style: style.clone(),
                    explode,
                    allow_reserved: *allow_reserved,
                    allow_empty_value: allow_empty_value.unwrap_or(false),
                }),
            )
        }
        Parameter::Header { .. } => (ParamLocation::Header, data.required, None),
        Parameter::Cookie { .. } => (ParamLocation::Cookie, data.required, None),
    };

    let mut schema = match &data.format {
        ParameterSchemaOrContent::Schema(s) => resolver.schema_value(s)?,
        ParameterSchemaOrContent::Content(content) => match content.values().next() {
            Some(MediaType {
                schema: Some(s), ..
            }) => resolver.schema_value(s)?,
            _ => json!({ "type": "string" }),
        },
    };

    if let Some(obj) = schema.as_object_mut()
        && !obj.contains_key("description")
        && let Some(desc) = &data.description
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }

    Ok(InputField {
        name: data.name.clone(),
        location,
        required,
        schema,
        query,
    })
}

/// Flatten a request body into input fields.
fn extract_body_fields(
    resolver: &DocumentResolver,
    body: &RequestBody,
) -> Result<(BodyShape, Vec<InputField>)> {
    let Some((content_type, media)) = select_json_media(&body.content)
        .or_else(|| body.content.iter().next())
    else {
        return Ok((BodyShape::None, Vec::new()));
    };

    let schema = match &media.schema {
        Some(s) => resolver.schema_value(s)?,
        None => json!({}),
    };

    // If the requestBody itself is not required, none of its flattened properties are.
    let body_required = body.required;
    let is_json = is_json_media_type(content_type);

    if is_json && let Some((properties, required_props)) = object_shape(&schema) {
        // Server-populated properties are never sent.
        let fields = properties
            .into_iter()
            .filter(|(_, prop_schema)| {
                prop_schema.get("readOnly").and_then(Value::as_bool) != Some(true)
            })
            .map(|(name, prop_schema)| InputField {
                required: body_required && required_props.contains(&name),
                name,
                location: ParamLocation::Body,
                schema: prop_schema,
                query: None,
            })
            .collect();
        return Ok((
            BodyShape::Fields {
                content_type: content_type.clone(),
            },
            fields,
        ));
    }

    let mut schema = schema;
    if let Some(obj) = schema.as_object_mut()
        && !obj.contains_key("description")
        && let Some(desc) = &body.description
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }

    Ok((
        BodyShape::Verbatim {
            content_type: content_type.clone(),
        },
        vec![InputField {
            name: VERBATIM_BODY_FIELD.to_string(),
            location: ParamLocation::Body,
            required: body_required,
            schema,
            query: None,
        }],
    ))
}

/// Top-level properties and required names of an object schema (merging `allOf`).
///
/// Returns `None` for non-object schemas and for free-form objects without properties.
fn object_shape(schema: &Value) -> Option<(Map<String, Value>, Vec<String>)> {
    fn collect(
        schema: &Value,
        properties: &mut Map<String, Value>,
        required: &mut Vec<String>,
        is_object: &mut bool,
    ) {
        if schema.get("type").and_then(Value::as_str) == Some("object")
            || schema.get("properties").is_some()
        {
            *is_object = true;
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (k, v) in props {
                properties.insert(k.clone(), v.clone());
            }
        }
        for name in schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            if !required.iter().any(|r| r == name) {
                required.push(name.to_string());
            }
        }
        for part in schema
            .get("allOf")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            collect(part, properties, required, is_object);
        }
    }

    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut is_object = false;
    collect(schema, &mut properties, &mut required, &mut is_object);

    (is_object && !properties.is_empty()).then_some((properties, required))
}

/// Schema of the first 2xx response (lowest code), else the `2XX` range, else `default`.
fn derive_output_hint(
    resolver: &DocumentResolver,
    operation: &Operation,
) -> Result<Option<Value>> {
    let mut explicit_2xx: Vec<(u16, &ReferenceOr<Response>)> = Vec::new();
    let mut range_2xx: Option<&ReferenceOr<Response>> = None;

    for (code, resp) in &operation.responses.responses {
        match code {
            StatusCode::Code(n) if (200..300).contains(n) => explicit_2xx.push((*n, resp)),
            StatusCode::Range(2) => range_2xx = Some(resp),
            _ => {}
        }
    }
    explicit_2xx.sort_by_key(|(n, _)| *n);

    let resp_ref = explicit_2xx
        .first()
        .map(|(_, r)| *r)
        .or(range_2xx)
        .or(operation.responses.default.as_ref());
    let Some(resp_ref) = resp_ref else {
        return Ok(None);
    };

    let resp: Response = resolver.resolve(resp_ref, "response")?;
    let Some((_, media)) = select_json_media(&resp.content) else {
        return Ok(None);
    };
    let Some(schema_ref) = media.schema.as_ref() else {
        return Ok(None);
    };

    resolver.schema_value(schema_ref).map(Some)
}

fn select_json_media<'a>(
    content: &'a openapiv3::Content,
) -> Option<(&'a String, &'a MediaType)> {
    content
        .get_key_value("application/json")
        .or_else(|| content.iter().find(|(k, _)| is_json_media_type(k)))
}

pub(crate) fn is_json_media_type(content_type: &str) -> bool {
    let Ok(m) = content_type.parse::<mime::Mime>() else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}

/// Build the merged input schema for a tool.
fn build_input_schema(fields: &[InputField]) -> JsonObject {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for field in fields {
        properties.insert(field.name.clone(), field.schema.clone());
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }

    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    // Unknown arguments are rejected at call time.
    schema.insert("additionalProperties".to_string(), Value::Bool(false));
    schema
}

static PATH_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"));

/// Generate a canonical tool name from method and path.
fn generate_canonical_name(method: &str, path: &str) -> String {
    let name = format!("{}_{}", method.to_lowercase(), path);
    let name = PATH_PARAM_RE.replace_all(&name, "_$1");
    let name = NON_ALNUM_RE.replace_all(&name, "_");
    let mut name = name.trim_matches('_').to_string();
    name.truncate(MAX_TOOL_NAME_LEN);
    name
}

fn resolve_http_method(method: &str) -> Method {
    match method {
        "get" => Method::GET,
        "put" => Method::PUT,
        "post" => Method::POST,
        "delete" => Method::DELETE,
        "options" => Method::OPTIONS,
        "head" => Method::HEAD,
        "patch" => Method::PATCH,
        _ => Method::TRACE,
    }
}

fn default_query_explode(style: &QueryStyle) -> bool {
    matches!(style, QueryStyle::Form | QueryStyle::DeepObject)
}
