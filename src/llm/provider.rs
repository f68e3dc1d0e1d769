// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM Provider trait and related types
//!
//! A provider only opens the stream; decoding the bytes it yields is the job
//! of `stream::SseDecoder`, so every provider speaking the chat-completions
//! streaming protocol shares one decoder.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::llm::message::Message;

/// Raw body of a streaming response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Main trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openrouter")
    fn name(&self) -> &str;

    /// Open a streaming completion.
    ///
    /// Errors returned here (429, timeouts) are what the retry layer sees;
    /// errors yielded by the stream itself are not retried.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// Request for a streaming chat completion
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,

    /// Conversation so far, system message first
    pub messages: Vec<Message>,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Create a new request with default sampling parameters
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: vec![],
            temperature: 0.7,
            max_tokens: 12000,
        }
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A tool as advertised by a backend and forwarded to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object
    #[serde(
        default = "empty_object_schema",
        alias = "input_schema",
        alias = "inputSchema"
    )]
    pub parameters_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
        }
    }

    /// Same definition under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Schema for a tool that takes no arguments
pub fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("openai/gpt-4o", vec![Message::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(256)
            .with_tools(vec![ToolDefinition::new(
                "list_tables",
                "List tables",
                empty_object_schema(),
            )]);

        assert_eq!(request.model, "openai/gpt-4o");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.max_tokens, 256);
        assert!((request.temperature - 0.2).abs() < 0.001);
        assert_eq!(request.tools[0].name, "list_tables");
    }

    #[test]
    fn test_tool_definition_accepts_schema_aliases() {
        let mcp_style: ToolDefinition = serde_json::from_str(
            r#"{"name": "search", "description": "Web search", "inputSchema": {"type": "object"}}"#,
        )
        .unwrap();
        assert_eq!(mcp_style.parameters_schema["type"], "object");

        let snake: ToolDefinition = serde_json::from_str(
            r#"{"name": "query", "input_schema": {"type": "object", "required": ["sql"]}}"#,
        )
        .unwrap();
        assert_eq!(snake.parameters_schema["required"][0], "sql");
        assert!(snake.description.is_empty());
    }

    #[test]
    fn test_tool_definition_missing_schema_defaults_to_empty_object() {
        let tool: ToolDefinition = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert_eq!(tool.parameters_schema, empty_object_schema());
    }

    #[test]
    fn test_renamed_keeps_schema() {
        let tool = ToolDefinition::new("query", "Run SQL", serde_json::json!({"type": "object"}));
        let renamed = tool.renamed("sqlite__query");
        assert_eq!(renamed.name, "sqlite__query");
        assert_eq!(renamed.parameters_schema, tool.parameters_schema);
    }
}
