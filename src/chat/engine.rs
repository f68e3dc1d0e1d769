// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The agent loop.
//!
//! One user turn: stream a response, execute any requested tools, feed the
//! results back, and repeat until the model stops or the iteration budget
//! runs out. Every step is reported through an [`EventEmitter`]; exactly one
//! terminal event ends a turn unless it was cancelled.

use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chat::emitter::EventEmitter;
use crate::chat::events::AgentEvent;
use crate::config::settings::{AgentConfig, Settings};
use crate::error::{AgentError, ApiError, Result};
use crate::llm::message::{Conversation, Message};
use crate::llm::provider::{ByteStream, ChatRequest, LlmProvider, ToolDefinition};
use crate::llm::retry::{with_retry, RetryNotice, RetryPolicy};
use crate::stream::{FinishReason, ResolvedToolCall, SseDecoder, StreamDelta, ToolCallAccumulator};
use crate::tools::{ToolCallResult, ToolExecutor};

const SYNTHESIZING_MESSAGE: &str = "Analyzing tool results...";

/// Where the loop is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingProviderStream,
    StreamingText,
    CollectingToolCalls,
    ExecutingTools,
    Synthesizing,
    Done,
    Error,
}

/// What happened during a turn
#[derive(Debug)]
pub struct TurnReport {
    /// Tool rounds completed
    pub iterations: u32,
    /// Last state reached
    pub state: LoopState,
    /// Why the turn ended early, if it did. `Cancelled` emits no event.
    pub error: Option<AgentError>,
}

impl TurnReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.error, Some(AgentError::Cancelled))
    }
}

struct TurnProgress {
    state: LoopState,
    iterations: u32,
}

impl TurnProgress {
    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::trace!(
                target: "toolstream.chat.engine",
                from = ?self.state,
                to = ?next,
                "state transition"
            );
            self.state = next;
        }
    }
}

/// A provider stream that has produced its first deltas
struct OpenedStream {
    stream: ByteStream,
    decoder: SseDecoder,
    deltas: Vec<StreamDelta>,
    /// The connection closed while priming
    closed: bool,
}

enum Flow {
    Continue,
    Finished(FinishReason),
    EndOfStream,
}

/// Drives turns against one provider and one set of tools
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    executor: ToolExecutor,
    model: String,
    temperature: f32,
    max_tokens: u32,
    config: AgentConfig,
    retry: RetryPolicy,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: ToolExecutor) -> Self {
        let settings = Settings::default();
        Self {
            provider,
            executor,
            model: settings.provider.default_model,
            temperature: settings.provider.temperature,
            max_tokens: settings.provider.max_tokens,
            config: settings.agent,
            retry: RetryPolicy::default(),
        }
    }

    /// Build from settings. Tool retries are enabled here when configured.
    pub fn from_settings(
        provider: Arc<dyn LlmProvider>,
        executor: ToolExecutor,
        settings: &Settings,
    ) -> Self {
        let retry = RetryPolicy::from(&settings.resilience);
        let executor = if settings.agent.retry_tool_calls {
            executor.with_retry(retry.clone())
        } else {
            executor
        };

        Self {
            provider,
            executor,
            model: settings.provider.default_model.clone(),
            temperature: settings.provider.temperature,
            max_tokens: settings.provider.max_tokens,
            config: settings.agent.clone(),
            retry,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one user turn to completion, failure, or cancellation.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_message: impl Into<String>,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> TurnReport {
        let mut progress = TurnProgress {
            state: LoopState::AwaitingProviderStream,
            iterations: 0,
        };
        let initial_messages = conversation.len();
        conversation.append(Message::user(user_message));

        tracing::info!(
            target: "toolstream.chat.engine",
            model = %self.model,
            provider = self.provider.name(),
            tools = self.executor.registry().len(),
            starting_messages = initial_messages,
            "turn start"
        );

        let result = self
            .drive(conversation, emitter, cancel, &mut progress)
            .await;

        let result = match result {
            Ok(()) => send(emitter, cancel, AgentEvent::Done).await,
            Err(error) => Err(error),
        };

        let error = match result {
            Ok(()) => {
                progress.transition(LoopState::Done);
                tracing::info!(
                    target: "toolstream.chat.engine",
                    iterations = progress.iterations,
                    final_messages = conversation.len(),
                    "turn complete"
                );
                None
            }
            Err(AgentError::Cancelled) => {
                tracing::info!(
                    target: "toolstream.chat.engine",
                    state = ?progress.state,
                    iterations = progress.iterations,
                    "turn cancelled"
                );
                Some(AgentError::Cancelled)
            }
            Err(error) => {
                progress.transition(LoopState::Error);
                // A cancel racing the failure suppresses the event.
                let _ = send(emitter, cancel, AgentEvent::error(&error)).await;
                tracing::warn!(
                    target: "toolstream.chat.engine",
                    iterations = progress.iterations,
                    error = %error,
                    "turn failed"
                );
                Some(error)
            }
        };

        TurnReport {
            iterations: progress.iterations,
            state: progress.state,
            error,
        }
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<()> {
        let tools = self.executor.registry().all_tools();

        loop {
            progress.transition(LoopState::AwaitingProviderStream);
            let request = self.build_request(conversation, &tools);
            let opened = self.open_stream(&request, emitter, cancel).await?;

            let mut text = String::new();
            let mut accumulator = ToolCallAccumulator::new();
            let finish = self
                .read_response(
                    opened,
                    &mut text,
                    &mut accumulator,
                    emitter,
                    cancel,
                    progress,
                )
                .await;

            let finish = match finish {
                Ok(finish) => finish,
                Err(error) => {
                    // Keep whatever was already streamed to the caller.
                    let cancelled = matches!(error, AgentError::Cancelled);
                    if cancelled || !text.is_empty() {
                        conversation.append(Message::assistant(text).into_incomplete());
                    }
                    return Err(error);
                }
            };

            let finish = match finish {
                FinishReason::Stop if !accumulator.is_empty() => {
                    tracing::debug!(
                        target: "toolstream.chat.engine",
                        pending = accumulator.len(),
                        "stop with pending tool calls, executing them"
                    );
                    FinishReason::ToolCalls
                }
                other => other,
            };

            match finish {
                FinishReason::Error(message) => {
                    if !text.is_empty() {
                        conversation.append(Message::assistant(text).into_incomplete());
                    }
                    return Err(AgentError::Api(ApiError::StreamError(message)));
                }
                FinishReason::Length => {
                    tracing::warn!(
                        target: "toolstream.chat.engine",
                        max_tokens = self.max_tokens,
                        "response truncated at max_tokens"
                    );
                    conversation.append(Message::assistant(text));
                    return Ok(());
                }
                FinishReason::Stop => {
                    conversation.append(Message::assistant(text));
                    return Ok(());
                }
                FinishReason::ToolCalls => {
                    let calls = accumulator.drain();
                    if calls.is_empty() {
                        tracing::warn!(
                            target: "toolstream.chat.engine",
                            "tool_calls finish without any tool calls"
                        );
                        conversation.append(Message::assistant(text));
                        return Ok(());
                    }

                    progress.transition(LoopState::ExecutingTools);
                    conversation.append(Message::assistant_with_tool_calls(
                        text,
                        calls.iter().map(ResolvedToolCall::to_assistant_call).collect(),
                    ));
                    self.execute_calls(calls, conversation, emitter, cancel)
                        .await?;

                    progress.iterations += 1;
                    if progress.iterations >= self.config.max_iterations {
                        return Err(AgentError::MaxIterationsExceeded(
                            self.config.max_iterations,
                        ));
                    }

                    progress.transition(LoopState::Synthesizing);
                    if self.config.emit_synthesizing {
                        send(
                            emitter,
                            cancel,
                            AgentEvent::Synthesizing {
                                message: SYNTHESIZING_MESSAGE.to_string(),
                            },
                        )
                        .await?;
                    }
                }
            }
        }
    }

    fn build_request(&self, conversation: &Conversation, tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest::new(self.model.clone(), conversation.snapshot())
            .with_tools(tools.to_vec())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// Open the stream and read until the first delta, retrying transient
    /// failures. Keep-alives carry no delta, so a stall after them is retried
    /// like a failed open. Once a delta exists it is emitted or accumulated,
    /// and later read timeouts are terminal.
    async fn open_stream(
        &self,
        request: &ChatRequest,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<OpenedStream> {
        let read_timeout = self.config.stream_read_timeout();
        let provider = &self.provider;

        let open = with_retry(
            &self.retry,
            "open_stream",
            move || async move {
                let mut stream = provider.open_stream(request).await?;
                let mut decoder = SseDecoder::new();
                loop {
                    match tokio::time::timeout(read_timeout, stream.next()).await {
                        Err(_) => return Err(AgentError::Api(ApiError::Timeout)),
                        Ok(None) => {
                            let deltas = decoder.finish()?;
                            return Ok(OpenedStream {
                                stream,
                                decoder,
                                deltas,
                                closed: true,
                            });
                        }
                        Ok(Some(chunk)) => {
                            let deltas = decoder.push(&chunk?)?;
                            if !deltas.is_empty() {
                                return Ok(OpenedStream {
                                    stream,
                                    decoder,
                                    deltas,
                                    closed: false,
                                });
                            }
                        }
                    }
                }
            },
            |notice: RetryNotice| {
                let emitter = emitter.clone();
                async move {
                    emitter.emit(AgentEvent::from_notice(&notice)).await;
                }
            },
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = open => result,
        }
    }

    /// Consume one provider response. Returns how it finished.
    #[allow(clippy::too_many_arguments)]
    async fn read_response(
        &self,
        opened: OpenedStream,
        text: &mut String,
        accumulator: &mut ToolCallAccumulator,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<FinishReason> {
        let read_timeout = self.config.stream_read_timeout();
        let OpenedStream {
            mut stream,
            mut decoder,
            deltas,
            closed,
        } = opened;
        let mut primed = Some((deltas, closed));

        let finish = 'read: loop {
            let (deltas, closed) = match primed.take() {
                Some(primed) => primed,
                None => {
                    let chunk = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        next = tokio::time::timeout(read_timeout, stream.next()) => match next {
                            Err(_) => {
                                tracing::warn!(
                                    target: "toolstream.chat.engine",
                                    timeout_ms = read_timeout.as_millis() as u64,
                                    "provider stream stalled"
                                );
                                return Err(AgentError::Api(ApiError::Timeout));
                            }
                            Ok(None) => None,
                            Ok(Some(chunk)) => Some(chunk?),
                        },
                    };
                    match chunk {
                        Some(bytes) => (decoder.push(&bytes)?, false),
                        None => (decoder.finish()?, true),
                    }
                }
            };

            for delta in deltas {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                match self
                    .apply_delta(delta, text, accumulator, emitter, cancel, progress)
                    .await?
                {
                    Flow::Continue => {}
                    Flow::Finished(reason) => break 'read Some(reason),
                    Flow::EndOfStream => break 'read None,
                }
            }

            if closed {
                break None;
            }
        };

        tracing::debug!(
            target: "toolstream.chat.engine",
            frames = decoder.frames_decoded(),
            text_len = text.len(),
            tool_calls = accumulator.len(),
            finish = ?finish,
            "provider response finished"
        );

        // Dropping the stream closes the connection.
        drop(stream);

        Ok(finish.unwrap_or(if accumulator.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        }))
    }

    async fn apply_delta(
        &self,
        delta: StreamDelta,
        text: &mut String,
        accumulator: &mut ToolCallAccumulator,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<Flow> {
        match delta {
            StreamDelta::Text(content) => {
                progress.transition(LoopState::StreamingText);
                text.push_str(&content);
                send(emitter, cancel, AgentEvent::TextChunk { content }).await?;
            }
            StreamDelta::Reasoning(content) => {
                send(emitter, cancel, AgentEvent::ReasoningChunk { content }).await?;
            }
            StreamDelta::ToolCall(delta) => {
                progress.transition(LoopState::CollectingToolCalls);
                accumulator.push(delta);
            }
            StreamDelta::Finish(reason) => return Ok(Flow::Finished(reason)),
            StreamDelta::Done => return Ok(Flow::EndOfStream),
        }
        Ok(Flow::Continue)
    }

    /// Run a batch of tool calls sequentially, in call order.
    async fn execute_calls(
        &self,
        calls: Vec<ResolvedToolCall>,
        conversation: &mut Conversation,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut calls = calls.into_iter();

        while let Some(call) = calls.next() {
            if cancel.is_cancelled() {
                abandon(conversation, call, calls, "Tool call cancelled");
                return Err(AgentError::Cancelled);
            }

            if let Err(error) = send(
                emitter,
                cancel,
                AgentEvent::ToolCallStart {
                    tool_name: call.name.clone(),
                    tool_id: call.id.clone(),
                },
            )
            .await
            {
                abandon(conversation, call, calls, "Tool call cancelled");
                return Err(error);
            }

            let arguments = match &call.arguments {
                Ok(arguments) => arguments.clone(),
                Err(error) => {
                    let result = ToolCallResult::error(&call.id, &call.name, error.to_string());
                    if let Err(error) = self.finish_call(conversation, emitter, cancel, result).await {
                        abandon_remaining(conversation, calls, "Tool call cancelled");
                        return Err(error);
                    }
                    continue;
                }
            };

            let entry = match self.executor.route(&call.name) {
                Ok(entry) => entry,
                Err(error) => {
                    abandon(conversation, call, calls, &error.to_string());
                    return Err(error);
                }
            };

            tracing::debug!(
                target: "toolstream.chat.engine",
                tool = %call.name,
                tool_id = %call.id,
                backend = %entry.backend_id,
                "invoking tool"
            );

            if let Err(error) = send(
                emitter,
                cancel,
                AgentEvent::ToolExecuting {
                    tool_name: call.name.clone(),
                    tool_id: call.id.clone(),
                    arguments: arguments.clone(),
                },
            )
            .await
            {
                abandon(conversation, call, calls, "Tool call cancelled");
                return Err(error);
            }

            let invocation = self.executor.invoke(entry, &call.id, arguments, |notice| {
                let emitter = emitter.clone();
                async move {
                    emitter.emit(AgentEvent::from_notice(&notice)).await;
                }
            });

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abandon(conversation, call, calls, "Tool call cancelled");
                    return Err(AgentError::Cancelled);
                }
                result = invocation => result,
            };

            if let Err(error) = self.finish_call(conversation, emitter, cancel, result).await {
                abandon_remaining(conversation, calls, "Tool call cancelled");
                return Err(error);
            }
        }

        Ok(())
    }

    async fn finish_call(
        &self,
        conversation: &mut Conversation,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        result: ToolCallResult,
    ) -> Result<()> {
        let preview = result.preview(self.config.result_preview_chars);
        conversation.append(Message::tool_result(
            &result.id,
            &result.tool_name,
            &result.payload,
        ));
        send(
            emitter,
            cancel,
            AgentEvent::ToolResult {
                tool_name: result.tool_name,
                tool_id: result.id,
                result: preview,
                is_error: result.is_error,
            },
        )
        .await
    }
}

/// Emit unless cancelled. An undeliverable event counts as cancellation by
/// the caller, and a cancel while waiting for buffer space abandons the send.
async fn send(emitter: &EventEmitter, cancel: &CancellationToken, event: AgentEvent) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }
    let delivered = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        delivered = emitter.emit(event) => delivered,
    };
    if delivered {
        Ok(())
    } else {
        Err(AgentError::Cancelled)
    }
}

/// Answer `current` and every remaining call with an incomplete tool message
/// so the assistant's tool-call list stays matched in the conversation.
fn abandon(
    conversation: &mut Conversation,
    current: ResolvedToolCall,
    remaining: impl Iterator<Item = ResolvedToolCall>,
    reason: &str,
) {
    abandon_remaining(conversation, std::iter::once(current).chain(remaining), reason);
}

fn abandon_remaining(
    conversation: &mut Conversation,
    calls: impl Iterator<Item = ResolvedToolCall>,
    reason: &str,
) {
    for call in calls {
        conversation.append(Message::tool_result(call.id, call.name, reason).into_incomplete());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::emitter;
    use crate::llm::mock_provider::{sse, MockFailure, MockProvider, MockStep};
    use crate::llm::message::Role;
    use crate::tools::{StaticBackend, ToolBackend, ToolRegistry};
    use std::time::Duration;

    async fn agent(provider: MockProvider, backend: StaticBackend) -> AgentLoop {
        let mut registry = ToolRegistry::default();
        let backend: Arc<dyn ToolBackend> = Arc::new(backend);
        registry.register_backend("test", backend).await.unwrap();
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5));
        AgentLoop::new(Arc::new(provider), executor).with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(20),
            jitter: 0.0,
        })
    }

    async fn run(agent: &AgentLoop, conversation: &mut Conversation, message: &str) -> (TurnReport, Vec<AgentEvent>) {
        let (emitter, mut rx) = emitter::channel(256);
        let cancel = CancellationToken::new();
        let report = agent.run_turn(conversation, message, &emitter, &cancel).await;
        drop(emitter);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (report, events)
    }

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(AgentEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let provider = MockProvider::new().with_body(sse::text_response("Hello there"));
        let agent = agent(provider, StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;

        assert!(report.is_success());
        assert_eq!(report.state, LoopState::Done);
        assert_eq!(kinds(&events), vec!["text_chunk", "text_chunk", "done"]);
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.last_assistant_text(), Some("Hello there"));
    }

    #[tokio::test]
    async fn test_tool_round_trip_appends_matched_messages() {
        let provider = MockProvider::new()
            .with_body(sse::tool_call_response("call_1", "list_tables", "{}"))
            .with_body(sse::text_response("users and orders"));
        let agent = agent(
            provider.clone(),
            StaticBackend::new().with_tool("list_tables", "", "[\"users\",\"orders\"]"),
        )
        .await;
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "list tables").await;

        assert!(report.is_success());
        assert_eq!(report.iterations, 1);
        assert_eq!(
            kinds(&events),
            vec![
                "tool_call_start",
                "tool_executing",
                "tool_result",
                "synthesizing",
                "text_chunk",
                "text_chunk",
                "text_chunk",
                "done"
            ]
        );

        let messages = conversation.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].tool_calls[0].id, "call_1");
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));

        // Second request carries the tool result back to the model.
        let second = provider.last_request().unwrap();
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_error_is_terminal() {
        let provider = MockProvider::new().with_body(vec![
            sse::text("partial"),
            sse::error("upstream failure"),
        ]);
        let agent = agent(provider, StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;

        assert_eq!(report.state, LoopState::Error);
        assert_eq!(kinds(&events), vec!["text_chunk", "error"]);
        let last = conversation.messages().last().unwrap();
        assert_eq!(last.content, "partial");
        assert!(last.incomplete);
    }

    #[tokio::test]
    async fn test_stream_closed_without_finish_reason() {
        let provider = MockProvider::new().with_body(vec![sse::text("just text")]);
        let agent = agent(provider, StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;
        assert!(report.is_success());
        assert_eq!(kinds(&events), vec!["text_chunk", "done"]);
    }

    #[tokio::test]
    async fn test_length_finish_keeps_text() {
        let provider =
            MockProvider::new().with_body(vec![sse::text("cut"), sse::finish("length"), sse::done()]);
        let agent = agent(provider, StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (report, _) = run(&agent, &mut conversation, "hi").await;
        assert!(report.is_success());
        assert_eq!(conversation.last_assistant_text(), Some("cut"));
    }

    #[tokio::test]
    async fn test_non_retryable_open_failure() {
        let provider = MockProvider::new().with_steps([MockStep::Fail(MockFailure::Unauthorized)]);
        let agent = agent(provider.clone(), StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;
        assert!(matches!(
            report.error,
            Some(AgentError::Api(ApiError::AuthenticationFailed))
        ));
        assert_eq!(kinds(&events), vec!["error"]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stall_before_first_byte_is_retried_as_timeout() {
        let provider = MockProvider::new()
            .with_steps([MockStep::Stall(vec![])])
            .with_body(sse::text_response("ok"));
        let agent = agent(provider.clone(), StaticBackend::new())
            .await
            .with_config(AgentConfig {
                stream_read_timeout_secs: 0,
                ..AgentConfig::default()
            });
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;
        assert!(report.is_success());
        assert_eq!(kinds(&events), vec!["timeout", "text_chunk", "done"]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stall_after_keep_alive_is_retried_as_timeout() {
        let provider = MockProvider::new()
            .with_steps([MockStep::Stall(vec![sse::keep_alive(), sse::keep_alive()])])
            .with_body(sse::text_response("ok"));
        let agent = agent(provider.clone(), StaticBackend::new())
            .await
            .with_config(AgentConfig {
                stream_read_timeout_secs: 0,
                ..AgentConfig::default()
            });
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(kinds(&events), vec!["timeout", "text_chunk", "done"]);
        assert_eq!(provider.call_count(), 2);
        // The abandoned attempt leaves nothing behind.
        assert_eq!(conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_stall_after_text_is_terminal() {
        let provider = MockProvider::new().with_steps([MockStep::Stall(vec![sse::text("half")])]);
        let agent = agent(provider.clone(), StaticBackend::new())
            .await
            .with_config(AgentConfig {
                stream_read_timeout_secs: 0,
                ..AgentConfig::default()
            });
        let mut conversation = Conversation::with_system("sys");

        let (report, events) = run(&agent, &mut conversation, "hi").await;
        assert!(matches!(report.error, Some(AgentError::Api(ApiError::Timeout))));
        assert_eq!(kinds(&events), vec!["text_chunk", "error"]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_result_preview_truncated_but_conversation_full() {
        let long = "x".repeat(500);
        let provider = MockProvider::new()
            .with_body(sse::tool_call_response("c1", "dump", "{}"))
            .with_body(sse::text_response("done"));
        let agent = agent(provider, StaticBackend::new().with_tool("dump", "", long.clone())).await;
        let mut conversation = Conversation::with_system("sys");

        let (_, events) = run(&agent, &mut conversation, "dump").await;

        let preview = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(preview.chars().count(), 203);
        assert_eq!(conversation.messages()[3].content, long);
    }

    #[tokio::test]
    async fn test_synthesizing_can_be_disabled() {
        let provider = MockProvider::new()
            .with_body(sse::tool_call_response("c1", "t", "{}"))
            .with_body(sse::text_response("ok"));
        let agent = agent(provider, StaticBackend::new().with_tool("t", "", "r"))
            .await
            .with_config(AgentConfig {
                emit_synthesizing: false,
                ..AgentConfig::default()
            });
        let mut conversation = Conversation::with_system("sys");

        let (_, events) = run(&agent, &mut conversation, "go").await;
        assert!(!kinds(&events).contains(&"synthesizing"));
    }

    #[tokio::test]
    async fn test_reasoning_chunks_forwarded() {
        let provider = MockProvider::new().with_body(vec![
            sse::reasoning("hmm"),
            sse::text("answer"),
            sse::finish("stop"),
        ]);
        let agent = agent(provider, StaticBackend::new()).await;
        let mut conversation = Conversation::with_system("sys");

        let (_, events) = run(&agent, &mut conversation, "q").await;
        assert_eq!(kinds(&events), vec!["reasoning_chunk", "text_chunk", "done"]);
    }
}
