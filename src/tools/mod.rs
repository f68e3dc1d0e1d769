// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool backends and routing
//!
//! The agent never implements a tool itself. Each backend advertises its
//! tools through [`ToolBackend::list_tools`] and runs them through
//! [`ToolBackend::call_tool`]; the [`registry`] maps tool names to backends.
//!
//! # External Backends
//!
//! Backends written in any language can be attached as a process speaking
//! JSON-RPC over stdio. See the [`external`] module.

pub mod executor;
pub mod external;
pub mod registry;
pub mod static_backend;

pub use executor::ToolExecutor;
pub use registry::{ConflictPolicy, ToolRegistry, ToolRegistryEntry};
pub use static_backend::StaticBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;

/// Output from a tool
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Successful output
    Success(String),
    /// Error payload returned by the backend
    Error(String),
}

impl ToolOutput {
    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error(_))
    }

    /// Get the output text
    pub fn text(&self) -> &str {
        match self {
            ToolOutput::Success(s) => s,
            ToolOutput::Error(s) => s,
        }
    }
}

/// A source of tools: a query engine, a search client, an external process
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tools this backend can run
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Run one tool.
    ///
    /// `Ok(ToolOutput::Error)` is an error payload the model should see;
    /// `Err` is a failure to reach or run the backend at all. Both end up as
    /// an error tool result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;
}

/// Outcome of one tool call, produced exactly once per request
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    /// The tool call id this result answers
    pub id: String,
    pub tool_name: String,
    pub payload: String,
    pub is_error: bool,
}

impl ToolCallResult {
    /// Create a successful result
    pub fn success(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            payload: payload.into(),
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            payload: error.into(),
            is_error: true,
        }
    }

    /// Payload cut to at most `max_chars` characters, for progress events
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.payload, max_chars)
    }
}

/// Truncate on a char boundary, marking the cut with "..."
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_index, _)) => format!("{}...", &s[..byte_index]),
    }
}
