//! The tool registry: name -> descriptor + bound transport.
//!
//! Built once at startup and read-only afterwards. `invoke` holds no lock and touches no
//! shared mutable state, so any number of calls may run concurrently.

use crate::error::{Result, SpecError};
use crate::executor::HttpTransport;
use crate::indexer::{OperationDescriptor, index_document};
use crate::loader::ApiDocument;
use crate::request::build_request;
use crate::response::{InvocationResult, translate_response};
use reqwest::Method;
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument as _;

/// Public shape of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub input_schema: JsonObject,
}

pub struct ToolRegistry {
    tools: Vec<OperationDescriptor>,
    by_name: HashMap<String, usize>,
    transport: Arc<dyn HttpTransport>,
    reserved_headers: Vec<String>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .field("reserved_headers", &self.reserved_headers)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Bind indexed descriptors to a transport.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateToolName`] if two descriptors share a name.
    pub fn new(
        descriptors: Vec<OperationDescriptor>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            if let Some(prev) = by_name.insert(d.name.clone(), i) {
                return Err(SpecError::DuplicateToolName {
                    name: d.name.clone(),
                    first: descriptors[prev].route(),
                    second: d.route(),
                });
            }
        }

        let reserved_headers = transport.reserved_headers();
        Ok(Self {
            tools: descriptors,
            by_name,
            transport,
            reserved_headers,
        })
    }

    /// Index a document and bind the result to a transport.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] if indexing fails. No partial registry is ever returned.
    pub fn from_document(doc: &ApiDocument, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let registry = Self::new(index_document(doc)?, transport)?;
        tracing::info!(tools = registry.len(), "tool registry ready");
        Ok(registry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&OperationDescriptor> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// All tools in indexer order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|d| ToolSummary {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.clone(),
            })
            .collect()
    }

    /// All tools as MCP `Tool` values.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|d| {
                let mut tool = Tool::new(
                    d.name.clone(),
                    d.description.clone(),
                    Arc::new(d.input_schema.clone()),
                );
                tool.output_schema = Some(Arc::new(output_schema(d.output_hint.as_ref())));
                tool.annotations = Some(annotations_for_method(&d.method));
                tool
            })
            .collect()
    }

    /// Run one call: build, execute, translate.
    ///
    /// Never fails at the Rust level; every failure is an [`InvocationResult::Failure`].
    /// Dropping the returned future abandons the upstream request.
    pub async fn invoke(&self, name: &str, arguments: &JsonObject) -> InvocationResult {
        let Some(descriptor) = self.descriptor(name) else {
            tracing::warn!(tool = %name, "unknown tool");
            return InvocationResult::not_found(name);
        };

        let span = tracing::info_span!("invoke", tool = %descriptor.name);
        self.run(descriptor, arguments).instrument(span).await
    }

    async fn run(&self, descriptor: &OperationDescriptor, arguments: &JsonObject) -> InvocationResult {
        let request = match build_request(descriptor, arguments, &self.reserved_headers) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "rejected tool arguments");
                return e.into();
            }
        };

        tracing::debug!(method = %request.method, path = %request.path, "sending request");
        let started = Instant::now();

        let raw = match self.transport.execute(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "upstream request failed"
                );
                return e.into();
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = translate_response(&raw);
        match result.failure_kind() {
            None => tracing::info!(
                method = %request.method,
                path = %request.path,
                status = raw.status,
                elapsed_ms,
                "tool call completed"
            ),
            Some(kind) => tracing::warn!(
                method = %request.method,
                path = %request.path,
                status = raw.status,
                elapsed_ms,
                kind = %kind,
                "tool call returned an upstream error"
            ),
        }
        result
    }
}

/// `{status, body, headers}`; any body validates, the hint is advisory.
fn output_schema(hint: Option<&Value>) -> JsonObject {
    let body = match hint {
        Some(h) => json!({ "anyOf": [h, {}] }),
        None => json!({}),
    };
    let schema = json!({
        "type": "object",
        "properties": {
            "status": { "type": "integer" },
            "body": body,
            "headers": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            }
        },
        "required": ["status", "body", "headers"]
    });
    match schema {
        Value::Object(obj) => obj,
        _ => JsonObject::new(),
    }
}

/// Behavioural hints from HTTP method semantics. Every tool reaches an external API.
fn annotations_for_method(method: &Method) -> ToolAnnotations {
    let safe = [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];
    let (read_only, destructive, idempotent) = if safe.contains(method) {
        (true, false, Some(true))
    } else if method == Method::POST {
        (false, false, Some(false))
    } else if method == Method::PUT || method == Method::DELETE {
        (false, true, Some(true))
    } else {
        // PATCH may or may not be idempotent.
        (false, true, None)
    };

    ToolAnnotations {
        title: None,
        read_only_hint: Some(read_only),
        destructive_hint: Some(destructive),
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use crate::executor::RawResponse;
    use crate::request::PreparedRequest;
    use crate::response::{FailureKind, ResponseBody};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const SPEC: &str = r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /items/{id}:
    get:
      operationId: getItem
      summary: Fetch an item
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: string }
        - name: verbose
          in: query
          schema: { type: boolean }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { type: object, properties: { id: { type: string } } }
    delete:
      operationId: deleteItem
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: string }
      responses: { "204": { description: gone } }
  /items:
    post:
      operationId: createItem
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties: { name: { type: string } }
      responses: { "200": { description: ok } }
"#;

    /// Echoes the prepared request back as the JSON body. Paths containing `hang` never
    /// answer; the flag records that the pending call was dropped.
    #[derive(Default)]
    struct EchoTransport {
        calls: AtomicUsize,
        hang_started: Notify,
        hang_dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HttpTransport for EchoTransport {
        async fn execute(
            &self,
            request: &PreparedRequest,
        ) -> std::result::Result<RawResponse, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if request.path.contains("hang") {
                let _flag = DropFlag(self.hang_dropped.clone());
                self.hang_started.notify_one();
                return std::future::pending().await;
            }

            // Stagger responses so concurrent calls interleave.
            let delay = request.path.len() as u64 % 7;
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let body = json!({
                "method": request.method.as_str(),
                "path": request.path,
                "query": request.query_string(),
                "headers": request.headers,
                "body": request.body.as_ref().map(|b| b.value.clone()),
            });
            Ok(RawResponse {
                status: 200,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: serde_json::to_vec(&body).unwrap(),
            })
        }

        fn reserved_headers(&self) -> Vec<String> {
            vec!["X-Goog-Api-Key".to_string()]
        }
    }

    fn registry() -> (ToolRegistry, Arc<EchoTransport>) {
        let doc: ApiDocument = serde_yaml::from_str(SPEC).unwrap();
        let transport = Arc::new(EchoTransport::default());
        let registry = ToolRegistry::from_document(&doc, transport.clone()).unwrap();
        (registry, transport)
    }

    fn args(v: Value) -> JsonObject {
        v.as_object().unwrap().clone()
    }

    fn echoed(result: &InvocationResult) -> &Value {
        match result {
            InvocationResult::Success(p) => match &p.body {
                ResponseBody::Json(v) => v,
                other => panic!("expected JSON body, got {other:?}"),
            },
            InvocationResult::Failure(f) => panic!("expected success, got {f:?}"),
        }
    }

    #[test]
    fn lists_every_operation_in_order() {
        let (registry, _) = registry();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["getItem", "deleteItem", "createItem"]);
        assert_eq!(registry.list(), registry.list());
    }

    #[test]
    fn list_tools_carries_schemas_and_annotations() {
        let (registry, _) = registry();
        let tools = registry.list_tools();

        let get = &tools[0];
        assert_eq!(get.description.as_deref(), Some("Fetch an item"));
        assert_eq!(get.input_schema["required"], json!(["id"]));
        let annotations = get.annotations.as_ref().unwrap();
        assert_eq!(annotations.read_only_hint, Some(true));

        let output = get.output_schema.as_ref().unwrap();
        assert_eq!(
            output["properties"]["body"]["anyOf"][0]["properties"]["id"]["type"],
            "string"
        );

        let delete = &tools[1];
        assert_eq!(
            delete.annotations.as_ref().unwrap().destructive_hint,
            Some(true)
        );
        assert_eq!(delete.output_schema.as_ref().unwrap()["properties"]["body"], json!({}));
    }

    #[test]
    fn duplicate_descriptors_are_rejected() {
        let (registry, transport) = registry();
        let mut descriptors = registry.tools.clone();
        descriptors.push(descriptors[0].clone());
        let err = ToolRegistry::new(descriptors, transport).unwrap_err();
        assert!(matches!(err, SpecError::DuplicateToolName { name, .. } if name == "getItem"));
    }

    #[tokio::test]
    async fn path_and_optional_query_parameters() {
        let (registry, _) = registry();

        let result = registry.invoke("getItem", &args(json!({ "id": "42" }))).await;
        assert_eq!(echoed(&result)["path"], "/items/42");
        assert_eq!(echoed(&result)["query"], Value::Null);

        let result = registry
            .invoke("getItem", &args(json!({ "id": "42", "verbose": true })))
            .await;
        assert_eq!(echoed(&result)["query"], "verbose=true");

        let result = registry.invoke("getItem", &JsonObject::new()).await;
        let InvocationResult::Failure(failure) = result else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::ValidationError);
        assert_eq!(failure.field.as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_transport() {
        let (registry, transport) = registry();
        let result = registry
            .invoke("getItem", &args(json!({ "id": "42", "bogus": 1 })))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::ValidationError));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (registry, transport) = registry();
        let result = registry.invoke("nope", &JsonObject::new()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::NotFoundError));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        // The registry keeps serving.
        let result = registry.invoke("getItem", &args(json!({ "id": "1" }))).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_cross_talk() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);

        let calls = (0..40).map(|i| {
            let registry = registry.clone();
            async move {
                let result = if i % 2 == 0 {
                    registry
                        .invoke("getItem", &args(json!({ "id": format!("item-{i}") })))
                        .await
                } else {
                    registry
                        .invoke("createItem", &args(json!({ "name": format!("name-{i}") })))
                        .await
                };
                (i, result)
            }
        });

        for (i, result) in futures::future::join_all(calls).await {
            let body = echoed(&result);
            if i % 2 == 0 {
                assert_eq!(body["method"], "GET");
                assert_eq!(body["path"], format!("/items/item-{i}"));
            } else {
                assert_eq!(body["method"], "POST");
                assert_eq!(body["body"], json!({ "name": format!("name-{i}") }));
            }
        }
    }

    #[tokio::test]
    async fn cancelling_a_call_drops_its_request_only() {
        let (registry, transport) = registry();
        let registry = Arc::new(registry);

        let hanging = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .invoke("getItem", &args(json!({ "id": "hang" })))
                    .await
            })
        };
        transport.hang_started.notified().await;

        let other = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.invoke("getItem", &args(json!({ "id": "7" }))).await })
        };

        hanging.abort();
        assert!(hanging.await.unwrap_err().is_cancelled());
        assert!(transport.hang_dropped.load(Ordering::SeqCst));

        let result = other.await.unwrap();
        assert_eq!(echoed(&result)["path"], "/items/7");
    }
}
