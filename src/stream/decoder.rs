// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Server-sent events decoder for chat-completions streams
//!
//! Bytes go in exactly as they come off the socket; typed deltas come out.
//! Lines are only decoded once complete, so frames and UTF-8 sequences may be
//! split at any byte.

use serde::Deserialize;

use crate::error::{AgentError, ApiError, Result};

/// One decoded unit of the provider stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Assistant text
    Text(String),
    /// Reasoning text
    Reasoning(String),
    /// A fragment of a tool call
    ToolCall(ToolCallDelta),
    /// The provider finished this response
    Finish(FinishReason),
    /// End-of-stream sentinel
    Done,
}

/// Tool-call fragment. `id` and `name` normally only appear on the first
/// fragment for an index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Why the provider stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error(String),
}

impl FinishReason {
    fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" => FinishReason::Stop,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::Error("response blocked by content filter".to_string()),
            "error" => FinishReason::Error("provider reported an error".to_string()),
            other => {
                tracing::warn!(
                    target: "toolstream.stream.decoder",
                    reason = other,
                    "unknown finish reason, treating as stop"
                );
                FinishReason::Stop
            }
        }
    }
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line
    line: Vec<u8>,
    /// `data:` payload lines of the current frame
    data: Vec<String>,
    frames: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data frames decoded so far
    pub fn frames_decoded(&self) -> usize {
        self.frames
    }

    /// Feed raw bytes, returning every delta completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamDelta>> {
        let mut deltas = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            let line = std::mem::take(&mut self.line);
            self.process_line(line, &mut deltas)?;
        }
        self.line.extend_from_slice(rest);

        Ok(deltas)
    }

    /// Flush whatever is buffered when the connection closes
    pub fn finish(&mut self) -> Result<Vec<StreamDelta>> {
        let mut deltas = Vec::new();
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.process_line(line, &mut deltas)?;
        }
        self.dispatch(&mut deltas)?;
        Ok(deltas)
    }

    fn process_line(&mut self, mut line: Vec<u8>, deltas: &mut Vec<StreamDelta>) -> Result<()> {
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.is_empty() {
            return self.dispatch(deltas);
        }

        // Comment lines are keep-alives.
        if line[0] == b':' {
            return Ok(());
        }

        let line = String::from_utf8(line).map_err(|e| {
            AgentError::Api(ApiError::InvalidResponse(format!(
                "stream is not valid UTF-8: {e}"
            )))
        })?;

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        }
        // `event:`, `id:` and `retry:` fields carry nothing we use.

        Ok(())
    }

    fn dispatch(&mut self, deltas: &mut Vec<StreamDelta>) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }
        let payload = std::mem::take(&mut self.data).join("\n");
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }

        self.frames += 1;

        if payload == "[DONE]" {
            deltas.push(StreamDelta::Done);
            return Ok(());
        }

        let frame: ChunkFrame = serde_json::from_str(payload).map_err(|e| {
            AgentError::Api(ApiError::InvalidResponse(format!(
                "undecodable stream frame: {e}"
            )))
        })?;

        if let Some(error) = frame.error {
            deltas.push(StreamDelta::Finish(FinishReason::Error(error_message(&error))));
            return Ok(());
        }

        for choice in frame.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                    deltas.push(StreamDelta::Reasoning(reasoning));
                }
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    deltas.push(StreamDelta::Text(content));
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let (name, arguments) = match call.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    deltas.push(StreamDelta::ToolCall(ToolCallDelta {
                        index: call.index,
                        id: call.id.filter(|id| !id.is_empty()),
                        name: name.filter(|n| !n.is_empty()),
                        arguments: arguments.filter(|a| !a.is_empty()),
                    }));
                }
            }
            if let Some(reason) = choice.finish_reason {
                deltas.push(StreamDelta::Finish(FinishReason::from_wire(&reason)));
            }
        }

        Ok(())
    }
}

fn error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

// Wire types for one streamed chunk

#[derive(Debug, Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
