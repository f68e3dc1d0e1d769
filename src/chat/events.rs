// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Events observed by the caller of a turn
//!
//! Serialised one JSON object per event, tagged by `type`, and framed as
//! server-sent events by [`AgentEvent::to_sse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::retry::{RetryNotice, RetryReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text
    TextChunk { content: String },

    /// Incremental reasoning text
    ReasoningChunk { content: String },

    /// The model requested a tool call
    ToolCallStart { tool_name: String, tool_id: String },

    /// The tool is being invoked
    ToolExecuting {
        tool_name: String,
        tool_id: String,
        arguments: Value,
    },

    /// The tool finished; `result` is a preview of the payload
    ToolResult {
        tool_name: String,
        tool_id: String,
        result: String,
        is_error: bool,
    },

    /// Re-querying the model with tool results
    Synthesizing { message: String },

    /// Rate limited, retrying after `retry_in` seconds
    RateLimit {
        message: String,
        retry_in: f64,
        attempt: u32,
    },

    /// Timed out, retrying after `retry_in` seconds
    Timeout {
        message: String,
        retry_in: f64,
        attempt: u32,
    },

    /// Terminal: the turn completed
    Done,

    /// Terminal: the turn failed
    Error { error: String },
}

impl AgentEvent {
    pub fn text(content: impl Into<String>) -> Self {
        AgentEvent::TextChunk {
            content: content.into(),
        }
    }

    pub fn error(error: impl ToString) -> Self {
        AgentEvent::Error {
            error: error.to_string(),
        }
    }

    /// Progress event for a retry about to happen
    pub fn from_notice(notice: &RetryNotice) -> Self {
        let retry_in = notice.delay.as_secs_f64();
        match notice.reason {
            RetryReason::RateLimited => AgentEvent::RateLimit {
                message: format!(
                    "Rate limited, retrying in {:.1}s (attempt {}/{})",
                    retry_in, notice.attempt, notice.max_attempts
                ),
                retry_in,
                attempt: notice.attempt,
            },
            RetryReason::TimedOut => AgentEvent::Timeout {
                message: format!(
                    "Request timed out, retrying in {:.1}s (attempt {}/{})",
                    retry_in, notice.attempt, notice.max_attempts
                ),
                retry_in,
                attempt: notice.attempt,
            },
        }
    }

    /// `done` and `error` end a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::Error { .. })
    }

    /// The `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TextChunk { .. } => "text_chunk",
            AgentEvent::ReasoningChunk { .. } => "reasoning_chunk",
            AgentEvent::ToolCallStart { .. } => "tool_call_start",
            AgentEvent::ToolExecuting { .. } => "tool_executing",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::Synthesizing { .. } => "synthesizing",
            AgentEvent::RateLimit { .. } => "rate_limit",
            AgentEvent::Timeout { .. } => "timeout",
            AgentEvent::Done => "done",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// `data: {json}\n\n`
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "error": format!("unserialisable event: {e}")})
                .to_string()
        });
        format!("data: {}\n\n", json)
    }
}
