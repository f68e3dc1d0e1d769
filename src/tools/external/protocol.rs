// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! JSON-RPC protocol for external backends
//!
//! One request line on stdin, one response line on stdout.
//!
//! # Listing tools
//!
//! ```json
//! {"jsonrpc": "2.0", "method": "list_tools", "params": {}, "id": 1}
//! {"jsonrpc": "2.0", "result": {"tools": [{"name": "query", "description": "...", "parameters_schema": {...}}]}, "id": 1}
//! ```
//!
//! # Calling a tool
//!
//! ```json
//! {"jsonrpc": "2.0", "method": "call_tool", "params": {"name": "query", "arguments": {"sql": "SELECT 1"}}, "id": 2}
//! {"jsonrpc": "2.0", "result": {"output": "[[1]]", "is_error": false}, "id": 2}
//! ```
//!
//! # Error Response Format
//!
//! ```json
//! {"jsonrpc": "2.0", "error": {"code": -32000, "message": "Error description"}, "id": 2}
//! ```

use serde::{Deserialize, Serialize};

use crate::llm::provider::ToolDefinition;

/// JSON-RPC request sent to an external backend.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: serde_json::Value,
    pub id: u64,
}

impl Request {
    /// Ask for the advertised tools.
    pub fn list_tools(id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "list_tools",
            params: serde_json::json!({}),
            id,
        }
    }

    /// Run one tool.
    pub fn call_tool(name: &str, arguments: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "call_tool",
            params: serde_json::json!({"name": name, "arguments": arguments}),
            id,
        }
    }

    /// Serialize to a JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// JSON-RPC response from an external backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl Response {
    /// Parse a response from a JSON string.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Result of `list_tools`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Result of `call_tool`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    /// Output text to return to the model
    pub output: String,

    /// Whether the output is an error payload
    #[serde(default)]
    pub is_error: bool,
}

/// Error payload in response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Application-specific
    pub const SERVER_ERROR: i32 = -32000;
}
