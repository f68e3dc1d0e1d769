// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! In-memory tool backend
//!
//! Canned responses per tool name, with optional artificial latency. Used by
//! tests and for wiring the agent up without any real backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::llm::provider::{empty_object_schema, ToolDefinition};
use crate::tools::{ToolBackend, ToolOutput};

#[derive(Debug, Clone)]
enum Response {
    Output(ToolOutput),
    Failure(String),
}

/// A backend whose tools return fixed responses
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    tools: Vec<ToolDefinition>,
    responses: HashMap<String, Response>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool that returns `output`
    pub fn with_tool(mut self, name: &str, description: &str, output: impl Into<String>) -> Self {
        self.tools
            .push(ToolDefinition::new(name, description, empty_object_schema()));
        self.responses.insert(
            name.to_string(),
            Response::Output(ToolOutput::Success(output.into())),
        );
        self
    }

    /// Add a tool that returns an error payload
    pub fn with_error_tool(mut self, name: &str, error: impl Into<String>) -> Self {
        self.tools
            .push(ToolDefinition::new(name, "", empty_object_schema()));
        self.responses.insert(
            name.to_string(),
            Response::Output(ToolOutput::Error(error.into())),
        );
        self
    }

    /// Add a tool whose invocation fails outright
    pub fn with_failing_tool(mut self, name: &str, reason: impl Into<String>) -> Self {
        self.tools
            .push(ToolDefinition::new(name, "", empty_object_schema()));
        self.responses
            .insert(name.to_string(), Response::Failure(reason.into()));
        self
    }

    /// Sleep this long before answering any call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `(tool, arguments)` pair received so far
    pub fn calls(&self) -> Vec<(String, Value)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ToolBackend for StaticBackend {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((name.to_string(), arguments)),
            Err(poisoned) => poisoned.into_inner().push((name.to_string(), arguments)),
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.responses.get(name) {
            Some(Response::Output(output)) => Ok(output.clone()),
            Some(Response::Failure(reason)) => Err(AgentError::ToolExecution(reason.clone())),
            None => Err(AgentError::UnknownTool(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lists_and_calls_tools() {
        let backend = StaticBackend::new()
            .with_tool("list_tables", "List tables", "[\"users\"]")
            .with_error_tool("drop_table", "not allowed");

        let tools = backend.list_tools().await.unwrap();
        assert_eq!(
            tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["list_tables", "drop_table"]
        );

        let ok = backend.call_tool("list_tables", json!({})).await.unwrap();
        assert_eq!(ok, ToolOutput::Success("[\"users\"]".into()));

        let err = backend.call_tool("drop_table", json!({"t": 1})).await.unwrap();
        assert!(err.is_error());

        assert_eq!(backend.calls().len(), 2);
        assert_eq!(backend.calls()[1].1, json!({"t": 1}));
    }

    #[tokio::test]
    async fn test_failing_and_unknown_tools() {
        let backend = StaticBackend::new().with_failing_tool("flaky", "connection reset");
        assert!(matches!(
            backend.call_tool("flaky", json!({})).await,
            Err(AgentError::ToolExecution(_))
        ));
        assert!(matches!(
            backend.call_tool("missing", json!({})).await,
            Err(AgentError::UnknownTool(_))
        ));
    }
}
