use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An in-process HTTP server standing in for the upstream API.
///
/// The server stops when the value is dropped.
pub struct StubUpstream {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl StubUpstream {
    /// Serve `app` on an ephemeral localhost port.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener fails.
    pub async fn spawn(app: Router) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind stub upstream")?;
        let addr = listener.local_addr().context("stub upstream local_addr")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // Idle keep-alive connections would hold a graceful shutdown open.
        self.handle.abort();
    }
}

/// Router answering every request with a JSON description of what it received:
/// `{method, path, query, headers, body}`.
///
/// `path` is the raw (still percent-encoded) request path. Header names are lowercase.
/// `body` is parsed JSON when possible, the raw text otherwise, `null` when empty.
pub fn echo_router() -> Router {
    Router::new().fallback(echo)
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> axum::Json<Value> {
    let mut rendered = Map::new();
    for (name, value) in &headers {
        if let Ok(v) = value.to_str() {
            rendered.insert(name.as_str().to_string(), Value::String(v.to_string()));
        }
    }

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    axum::Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": rendered,
        "body": body,
    }))
}

/// Router answering every request with the same status, content type and body.
pub fn fixed_router(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Router {
    let body: Bytes = body.into();
    Router::new().fallback(move || {
        let body = body.clone();
        async move { (status, [(CONTENT_TYPE, content_type)], body) }
    })
}
