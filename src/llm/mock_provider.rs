// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Plays back a script of raw SSE bodies (or open failures) one per
//! `open_stream` call, so tests exercise the real decoder on exactly the
//! bytes a provider would send, including arbitrary chunk boundaries.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{AgentError, ApiError, Result};
use crate::llm::provider::{ByteStream, ChatRequest, LlmProvider};

/// One scripted response to `open_stream`
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Respond with these body chunks, then close the connection
    Chunks(Vec<String>),
    /// Respond with these body chunks, then never send another byte
    Stall(Vec<String>),
    /// Fail to open the stream
    Fail(MockFailure),
}

/// Open failure to simulate
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    RateLimited,
    Timeout,
    Unauthorized,
    Server(u16),
}

impl MockFailure {
    fn to_error(self) -> AgentError {
        match self {
            MockFailure::RateLimited => AgentError::Api(ApiError::RateLimited { retry_after: None }),
            MockFailure::Timeout => AgentError::Api(ApiError::Timeout),
            MockFailure::Unauthorized => AgentError::Api(ApiError::AuthenticationFailed),
            MockFailure::Server(status) => AgentError::Api(ApiError::ServerError {
                status,
                message: "mock server error".to_string(),
            }),
        }
    }
}

/// A mock LLM provider for testing
#[derive(Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<MockStep>>>,
    /// Played whenever the script is empty
    fallback: Option<MockStep>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockProvider {
    /// Create a provider with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue steps, played in order
    pub fn with_steps(self, steps: impl IntoIterator<Item = MockStep>) -> Self {
        lock(&self.script).extend(steps);
        self
    }

    /// Queue one complete SSE body delivered as a single chunk
    pub fn with_body(self, frames: Vec<String>) -> Self {
        self.with_steps([MockStep::Chunks(vec![frames.concat()])])
    }

    /// Step to play once the script runs dry
    pub fn repeating(mut self, step: MockStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Number of `open_stream` calls so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All requests seen so far
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    fn next_step(&self) -> Option<MockStep> {
        lock(&self.script)
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("mock provider lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded_requests).push(request.clone());

        let step = self.next_step().ok_or_else(|| {
            AgentError::Api(ApiError::InvalidResponse(
                "mock provider script exhausted".to_string(),
            ))
        })?;

        match step {
            MockStep::Fail(failure) => Err(failure.to_error()),
            MockStep::Chunks(chunks) => Ok(Box::pin(stream::iter(
                chunks.into_iter().map(|c| Ok(Bytes::from(c))),
            ))),
            MockStep::Stall(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
                    .chain(stream::pending()),
            )),
        }
    }
}

/// Builders for SSE frames in the chat-completions streaming format
pub mod sse {
    use serde_json::json;

    fn frame(value: serde_json::Value) -> String {
        format!("data: {}\n\n", value)
    }

    /// A text delta frame
    pub fn text(content: &str) -> String {
        frame(json!({"choices": [{"delta": {"content": content}}]}))
    }

    /// A reasoning delta frame
    pub fn reasoning(content: &str) -> String {
        frame(json!({"choices": [{"delta": {"reasoning": content}}]}))
    }

    /// The first frame of a tool call: carries id and name
    pub fn tool_call_start(index: usize, id: &str, name: &str, arguments: &str) -> String {
        frame(json!({"choices": [{"delta": {"tool_calls": [{
            "index": index,
            "id": id,
            "type": "function",
            "function": {"name": name, "arguments": arguments}
        }]}}]}))
    }

    /// A continuation frame: argument text only
    pub fn tool_call_args(index: usize, arguments: &str) -> String {
        frame(json!({"choices": [{"delta": {"tool_calls": [{
            "index": index,
            "function": {"arguments": arguments}
        }]}}]}))
    }

    /// A frame carrying only a finish reason
    pub fn finish(reason: &str) -> String {
        frame(json!({"choices": [{"delta": {}, "finish_reason": reason}]}))
    }

    /// An in-band provider error
    pub fn error(message: &str) -> String {
        frame(json!({"error": {"message": message}}))
    }

    /// Keep-alive comment
    pub fn keep_alive() -> String {
        ": OPENROUTER PROCESSING\n\n".to_string()
    }

    /// End-of-stream sentinel
    pub fn done() -> String {
        "data: [DONE]\n\n".to_string()
    }

    /// A complete text-only response body, one frame per word
    pub fn text_response(content: &str) -> Vec<String> {
        let mut frames: Vec<String> = content.split_inclusive(' ').map(text).collect();
        frames.push(finish("stop"));
        frames.push(done());
        frames
    }

    /// A complete response requesting one tool call
    pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> Vec<String> {
        vec![
            tool_call_start(0, id, name, arguments),
            finish("tool_calls"),
            done(),
        ]
    }
}
