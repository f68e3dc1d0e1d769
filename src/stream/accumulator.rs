// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool-call accumulation
//!
//! Merges multi-frame tool-call fragments into complete invocations. Argument
//! text is only parsed once the provider says the calls are complete.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{AgentError, Result};
use crate::llm::message::AssistantToolCall;
use crate::stream::decoder::ToolCallDelta;

/// A tool call under construction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallRequest {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub arguments_buffer: String,
}

/// A complete tool call, ready to execute unless its arguments were malformed
#[derive(Debug)]
pub struct ResolvedToolCall {
    pub index: usize,
    pub id: String,
    pub name: String,
    /// Argument text exactly as streamed
    pub raw_arguments: String,
    /// Parsed arguments, or `AgentError::MalformedToolCall`
    pub arguments: Result<Value>,
}

impl ResolvedToolCall {
    pub fn is_malformed(&self) -> bool {
        self.arguments.is_err()
    }

    /// The form recorded on the assistant message
    pub fn to_assistant_call(&self) -> AssistantToolCall {
        AssistantToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.raw_arguments.clone(),
        }
    }
}

/// Accumulator keyed by the provider's tool-call index
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCallRequest>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment
    pub fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_insert_with(|| {
            tracing::trace!(
                target: "toolstream.stream.accumulator",
                index = delta.index,
                "new tool call"
            );
            ToolCallRequest {
                index: delta.index,
                ..Default::default()
            }
        });

        if let Some(id) = delta.id {
            if entry.id.is_empty() {
                entry.id = id;
            }
        }
        if let Some(name) = delta.name {
            entry.name.push_str(&name);
        }
        if let Some(arguments) = delta.arguments {
            entry.arguments_buffer.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Calls collected so far, in index order
    pub fn pending(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.calls.values()
    }

    /// Resolve every collected call in index order and reset
    pub fn drain(&mut self) -> Vec<ResolvedToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(resolve)
            .collect()
    }
}

fn resolve(request: ToolCallRequest) -> ResolvedToolCall {
    let id = if request.id.is_empty() {
        format!("call_{}", request.index)
    } else {
        request.id
    };

    let arguments = parse_arguments(&request.arguments_buffer).map_err(|reason| {
        tracing::warn!(
            target: "toolstream.stream.accumulator",
            tool_id = %id,
            tool_name = %request.name,
            reason = %reason,
            "malformed tool call"
        );
        AgentError::MalformedToolCall {
            id: id.clone(),
            reason,
        }
    });

    ResolvedToolCall {
        index: request.index,
        id,
        name: request.name,
        raw_arguments: request.arguments_buffer,
        arguments,
    }
}

fn parse_arguments(buffer: &str) -> std::result::Result<Value, String> {
    if buffer.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(buffer) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("arguments must be a JSON object, got {other}")),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}
