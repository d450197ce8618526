use anyhow::Context as _;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn server_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_jules-mcp"));
    cmd.env_remove("JULES_API_KEY")
        .env_remove("JULES_BASE_URL")
        .env_remove("JULES_OPENAPI_SPEC")
        .env_remove("JULES_OPENAPI_SPEC_SHA256")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Minimal newline-delimited JSON-RPC client for the server's stdio transport.
pub struct McpStdioSession {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl McpStdioSession {
    /// Spawn the server against `base_url` and complete the initialize handshake.
    pub async fn connect(base_url: &str) -> anyhow::Result<Self> {
        let mut child = server_command()
            .arg("--api-key")
            .arg("test-key")
            .arg("--base-url")
            .arg(base_url)
            .arg("--log-level")
            .arg("warn")
            .spawn()
            .context("spawn jules-mcp")?;

        let stdin = child.stdin.take().context("child stdin")?;
        let stdout = child.stdout.take().context("child stdout")?;
        let mut session = Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let init = session
            .request(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "jules-mcp-integration-tests", "version": "0" }
                }),
            )
            .await?;
        anyhow::ensure!(
            init["serverInfo"]["name"] == "Jules MCP Server",
            "unexpected initialize result: {init}"
        );

        session
            .send(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;
        Ok(session)
    }

    /// Send a request and return its `result`, skipping any notifications in between.
    pub async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let line = tokio::time::timeout(TIMEOUT, self.stdout.next_line())
                .await
                .with_context(|| format!("timed out waiting for {method} response"))??
                .context("server closed stdout")?;
            let msg: serde_json::Value =
                serde_json::from_str(&line).with_context(|| format!("bad JSON: {line}"))?;

            if msg.get("id") != Some(&json!(id)) {
                continue;
            }
            if let Some(err) = msg.get("error") {
                anyhow::bail!("{method} failed: {err}");
            }
            return msg.get("result").cloned().context("response without result");
        }
    }

    async fn send(&mut self, msg: &serde_json::Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}
