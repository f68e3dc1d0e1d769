// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! External backends
//!
//! A backend written in any language can serve tools by reading one JSON-RPC
//! request line from stdin and writing one response line to stdout. A fresh
//! process is spawned for every request.
//!
//! # Configuring a Backend
//!
//! Add it to `backends` in `~/.toolstream/settings.json`:
//!
//! ```json
//! {
//!   "backends": [
//!     {
//!       "id": "sqlite",
//!       "command": ["python3", "/opt/tools/sqlite_backend.py"],
//!       "env": {"DB_PATH": "/data/app.db"},
//!       "timeout_ms": 30000
//!     }
//!   ]
//! }
//! ```
//!
//! # Protocol
//!
//! See the [`protocol`] module for the JSON-RPC format.

pub mod protocol;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::settings::BackendConfig;
use crate::error::{AgentError, ApiError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::{ToolBackend, ToolOutput};

pub use protocol::{CallToolResult, ListToolsResult, Request, Response};

/// Global request ID counter for JSON-RPC
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A backend served by an external process
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    id: String,
    command: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl ProcessBackend {
    /// Create a backend running `command` (program followed by arguments)
    pub fn new(id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command,
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from a `backends` entry in settings
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.id.clone(), config.command.clone())
            .with_env(config.env.clone())
            .with_timeout(Duration::from_millis(config.timeout_ms))
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the process, send one request and read one response.
    async fn request(&self, request: Request) -> Result<Response> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(AgentError::ToolExecution(format!(
                "backend '{}' has an empty command",
                self.id
            )));
        };

        let mut child = Command::new(program)
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::ToolExecution(format!(
                    "failed to spawn backend '{}': {}",
                    self.id, e
                ))
            })?;

        tracing::debug!(
            target: "toolstream.tools.external",
            backend = %self.id,
            method = request.method,
            id = request.id,
            "sending request"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", request.to_json());
            stdin.write_all(line.as_bytes()).await.map_err(|e| {
                AgentError::ToolExecution(format!("failed to write to backend stdin: {}", e))
            })?;
            // Closing stdin signals end of input.
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(
                    target: "toolstream.tools.external",
                    backend = %self.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "backend timed out"
                );
                return Err(AgentError::Api(ApiError::Timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::ToolExecution(format!(
                "backend '{}' failed with exit code {:?}: {}",
                self.id,
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let response_line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("");

        if response_line.is_empty() {
            return Err(AgentError::ToolExecution(format!(
                "backend '{}' produced no output",
                self.id
            )));
        }

        let response = Response::parse(response_line).map_err(|e| {
            AgentError::ToolExecution(format!(
                "failed to parse backend response: {} (raw: {})",
                e, response_line
            ))
        })?;

        if response.id.is_some_and(|id| id != request.id) {
            tracing::warn!(
                target: "toolstream.tools.external",
                backend = %self.id,
                expected = request.id,
                got = ?response.id,
                "response id mismatch"
            );
        }

        Ok(response)
    }
}

fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

#[async_trait]
impl ToolBackend for ProcessBackend {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let response = self.request(Request::list_tools(next_request_id())).await?;

        if let Some(error) = response.error {
            return Err(AgentError::ToolExecution(format!(
                "backend '{}' could not list tools: {}",
                self.id, error.message
            )));
        }

        let result: ListToolsResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null))?;
        Ok(result.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let response = self
            .request(Request::call_tool(name, arguments, next_request_id()))
            .await?;

        if let Some(error) = response.error {
            return Ok(ToolOutput::Error(error.message));
        }

        let Some(result) = response.result else {
            return Ok(ToolOutput::Error("No output".to_string()));
        };

        // Plain string results are accepted as successful output.
        if let Value::String(output) = result {
            return Ok(ToolOutput::Success(output));
        }

        let result: CallToolResult = serde_json::from_value(result)?;
        if result.is_error {
            Ok(ToolOutput::Error(result.output))
        } else {
            Ok(ToolOutput::Success(result.output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script_backend(temp_dir: &TempDir, body: &str) -> ProcessBackend {
        let script_path = temp_dir.path().join("backend.sh");
        std::fs::write(&script_path, format!("#!/bin/bash\nread input\n{body}\n")).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        ProcessBackend::new(
            "script",
            vec!["bash".to_string(), script_path.display().to_string()],
        )
    }

    #[test]
    fn test_from_config() {
        let config = BackendConfig {
            id: "sqlite".into(),
            command: vec!["python3".into(), "backend.py".into()],
            env: HashMap::from([("DB".to_string(), "x.db".to_string())]),
            timeout_ms: 1500,
        };
        let backend = ProcessBackend::from_config(&config);
        assert_eq!(backend.id(), "sqlite");
        assert_eq!(backend.timeout, Duration::from_millis(1500));
        assert_eq!(backend.env.get("DB").map(String::as_str), Some("x.db"));
    }

    #[test]
    fn test_request_id_increments() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_list_tools() {
        let temp_dir = TempDir::new().unwrap();
        let backend = script_backend(
            &temp_dir,
            r#"echo '{"jsonrpc": "2.0", "result": {"tools": [{"name": "list_tables", "description": "List tables"}]}, "id": 1}'"#,
        );

        let tools = backend.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_tables");
    }

    #[tokio::test]
    async fn test_call_tool_success_and_error_payload() {
        let temp_dir = TempDir::new().unwrap();
        let ok = script_backend(
            &temp_dir,
            r#"echo '{"jsonrpc": "2.0", "result": {"output": "users, orders"}, "id": 1}'"#,
        );
        assert_eq!(
            ok.call_tool("list_tables", serde_json::json!({})).await.unwrap(),
            ToolOutput::Success("users, orders".into())
        );

        let temp_dir = TempDir::new().unwrap();
        let failing = script_backend(
            &temp_dir,
            r#"echo '{"jsonrpc": "2.0", "error": {"code": -32000, "message": "no such table"}, "id": 1}'"#,
        );
        assert_eq!(
            failing.call_tool("query", serde_json::json!({})).await.unwrap(),
            ToolOutput::Error("no such table".into())
        );
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let backend = script_backend(&temp_dir, "sleep 5").with_timeout(Duration::from_millis(100));

        let err = backend
            .call_tool("slow", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Api(ApiError::Timeout)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let backend = script_backend(&temp_dir, "echo broken >&2; exit 3");

        let err = backend.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let backend = ProcessBackend::new("empty", vec![]);
        assert!(matches!(
            backend.list_tools().await,
            Err(AgentError::ToolExecution(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let backend = ProcessBackend::new(
            "missing",
            vec!["/nonexistent/toolstream-backend".to_string()],
        );
        assert!(backend.list_tools().await.is_err());
    }
}
