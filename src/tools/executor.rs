// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool execution engine
//!
//! Routes a call through the registry and runs it under a timeout. Every
//! failure after routing becomes an error `ToolCallResult`; only routing
//! failures surface as `Err`.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, ApiError, Result};
use crate::llm::retry::{transient_reason, with_retry_if, RetryNotice, RetryPolicy};
use crate::tools::registry::{ToolRegistry, ToolRegistryEntry};
use crate::tools::{ToolCallResult, ToolOutput};

/// Tool executor shared by every turn of a session
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ToolExecutor {
    /// Create a new executor; tool calls are not retried by default
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry timed-out tool calls under `policy`
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a model-facing tool name
    pub fn route(&self, name: &str) -> Result<&ToolRegistryEntry> {
        self.registry.route(name)
    }

    /// Run a routed call. Never fails: errors become error results.
    pub async fn invoke<N, NFut>(
        &self,
        entry: &ToolRegistryEntry,
        id: &str,
        arguments: Value,
        on_retry: N,
    ) -> ToolCallResult
    where
        N: FnMut(RetryNotice) -> NFut,
        NFut: Future<Output = ()>,
    {
        let operation = format!("tool:{}", entry.tool_name);

        let outcome = with_retry_if(
            &self.retry,
            &operation,
            || self.call_once(entry, arguments.clone()),
            transient_reason,
            on_retry,
        )
        .await;

        match outcome {
            Ok(ToolOutput::Success(payload)) => {
                tracing::debug!(
                    target: "toolstream.tools.executor",
                    tool = %entry.tool_name,
                    backend = %entry.backend_id,
                    bytes = payload.len(),
                    "tool succeeded"
                );
                ToolCallResult::success(id, &entry.tool_name, payload)
            }
            Ok(ToolOutput::Error(payload)) => {
                tracing::debug!(
                    target: "toolstream.tools.executor",
                    tool = %entry.tool_name,
                    backend = %entry.backend_id,
                    "tool returned an error payload"
                );
                ToolCallResult::error(id, &entry.tool_name, payload)
            }
            Err(AgentError::Api(ApiError::Timeout)) => {
                tracing::warn!(
                    target: "toolstream.tools.executor",
                    tool = %entry.tool_name,
                    backend = %entry.backend_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "tool timed out"
                );
                let error = AgentError::ToolExecution(format!(
                    "tool '{}' timed out after {:?}",
                    entry.tool_name, self.timeout
                ));
                ToolCallResult::error(id, &entry.tool_name, error.to_string())
            }
            Err(e) => {
                tracing::warn!(
                    target: "toolstream.tools.executor",
                    tool = %entry.tool_name,
                    backend = %entry.backend_id,
                    error = %e,
                    "tool failed"
                );
                ToolCallResult::error(id, &entry.tool_name, e.to_string())
            }
        }
    }

    async fn call_once(&self, entry: &ToolRegistryEntry, arguments: Value) -> Result<ToolOutput> {
        tokio::time::timeout(
            self.timeout,
            entry
                .backend()
                .call_tool(&entry.backend_tool_name, arguments),
        )
        .await
        .map_err(|_| AgentError::Api(ApiError::Timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{StaticBackend, ToolBackend};
    use serde_json::json;

    async fn executor_with(backend: StaticBackend, timeout: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::default();
        let backend: Arc<dyn ToolBackend> = Arc::new(backend);
        registry.register_backend("test", backend).await.unwrap();
        ToolExecutor::new(Arc::new(registry), timeout)
    }

    async fn no_notice(_notice: RetryNotice) {}

    #[tokio::test]
    async fn test_invoke_success() {
        let executor = executor_with(
            StaticBackend::new().with_tool("list_tables", "", "[\"users\"]"),
            Duration::from_secs(5),
        )
        .await;

        let entry = executor.route("list_tables").unwrap();
        let result = executor.invoke(entry, "call_1", json!({}), no_notice).await;
        assert_eq!(result, ToolCallResult::success("call_1", "list_tables", "[\"users\"]"));
    }

    #[tokio::test]
    async fn test_invoke_error_payload() {
        let executor = executor_with(
            StaticBackend::new().with_error_tool("query", "syntax error near FROM"),
            Duration::from_secs(5),
        )
        .await;

        let entry = executor.route("query").unwrap();
        let result = executor.invoke(entry, "c", json!({}), no_notice).await;
        assert!(result.is_error);
        assert_eq!(result.payload, "syntax error near FROM");
    }

    #[tokio::test]
    async fn test_invoke_backend_failure() {
        let executor = executor_with(
            StaticBackend::new().with_failing_tool("query", "connection refused"),
            Duration::from_secs(5),
        )
        .await;

        let entry = executor.route("query").unwrap();
        let result = executor.invoke(entry, "c", json!({}), no_notice).await;
        assert!(result.is_error);
        assert!(result.payload.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let executor = executor_with(
            StaticBackend::new()
                .with_tool("slow", "", "late")
                .with_delay(Duration::from_millis(500)),
            Duration::from_millis(20),
        )
        .await;

        let entry = executor.route("slow").unwrap();
        let result = executor.invoke(entry, "c", json!({}), no_notice).await;
        assert!(result.is_error);
        assert!(result.payload.contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_retried_when_enabled() {
        let backend = StaticBackend::new()
            .with_tool("slow", "", "late")
            .with_delay(Duration::from_millis(200));
        let mut registry = ToolRegistry::default();
        let shared: Arc<dyn ToolBackend> = Arc::new(backend.clone());
        registry.register_backend("test", shared).await.unwrap();

        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_millis(10))
            .with_retry(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
                jitter: 0.0,
            });

        let notices = std::sync::Arc::new(std::sync::Mutex::new(0u32));
        let entry = executor.route("slow").unwrap();
        let result = executor
            .invoke(entry, "c", json!({}), |_| {
                let notices = notices.clone();
                async move { *notices.lock().unwrap() += 1 }
            })
            .await;

        assert!(result.is_error);
        assert_eq!(*notices.lock().unwrap(), 2);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_route_unknown() {
        let executor = executor_with(StaticBackend::new(), Duration::from_secs(1)).await;
        assert!(matches!(
            executor.route("missing"),
            Err(AgentError::UnknownTool(_))
        ));
    }
}
