// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenRouter API provider implementation
//!
//! Speaks the OpenAI-compatible chat-completions API with `stream: true`.
//! Only opening the stream lives here; the body is handed back as raw bytes
//! for `stream::SseDecoder`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::settings::ProviderConfig;
use crate::error::{AgentError, ApiError, Result};
use crate::llm::message::{Message, Role};
use crate::llm::provider::{ByteStream, ChatRequest, LlmProvider, ToolDefinition};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenRouter provider (any OpenAI-compatible endpoint works)
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    site_url: Option<String>,
    site_name: Option<String>,
    open_timeout: Duration,
    reasoning: bool,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENROUTER_API_URL)
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            site_url: None,
            site_name: Some("toolstream".to_string()),
            open_timeout: Duration::from_secs(60),
            reasoning: true,
        }
    }

    /// Build from settings
    pub fn from_config(api_key: impl Into<String>, config: &ProviderConfig) -> Self {
        let mut provider = Self::with_base_url(api_key, config.base_url.clone())
            .with_open_timeout(Duration::from_secs(config.request_timeout_secs));
        provider.site_url = config.site_url.clone();
        provider.site_name = config.site_name.clone();
        provider.reasoning = config.enable_reasoning;
        provider
    }

    /// Set the site URL sent as `HTTP-Referer`
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    /// Set the site name sent as `X-Title`
    pub fn with_site_name(mut self, name: impl Into<String>) -> Self {
        self.site_name = Some(name.into());
        self
    }

    /// Request reasoning tokens (`"reasoning": {"enabled": true}`)
    pub fn with_reasoning(mut self, enabled: bool) -> Self {
        self.reasoning = enabled;
        self
    }

    /// Time allowed for the response headers to arrive
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Convert internal messages to OpenAI wire format
    fn convert_messages(&self, messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };

                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| WireToolCall {
                                id: tc.id.clone(),
                                r#type: "function".to_string(),
                                function: WireFunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                };

                // Assistant messages that only carry tool calls send null content.
                let content = if m.role == Role::Assistant && m.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(m.content.clone())
                };

                WireMessage {
                    role: role.to_string(),
                    content,
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tools to OpenAI function format
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters_schema.clone(),
                },
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &ChatRequest) -> WireRequest {
        let has_tools = !request.tools.is_empty();
        WireRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            tools: has_tools.then(|| self.convert_tools(&request.tools)),
            tool_choice: has_tools.then(|| "auto".to_string()),
            reasoning: self.reasoning.then_some(WireReasoning { enabled: true }),
            stream: true,
        }
    }

    /// Map a non-success status to an error
    fn parse_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> AgentError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return AgentError::Api(ApiError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return AgentError::Api(ApiError::AuthenticationFailed);
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return AgentError::Api(ApiError::Timeout);
        }

        let message = serde_json::from_str::<WireError>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        AgentError::Api(ApiError::ServerError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let body = self.build_request(request);

        let mut req = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        if let Some(ref site_url) = self.site_url {
            req = req.header("HTTP-Referer", site_url);
        }
        if let Some(ref site_name) = self.site_name {
            req = req.header("X-Title", site_name);
        }

        tracing::debug!(
            target: "toolstream.llm.openrouter",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening completion stream"
        );

        let response = tokio::time::timeout(self.open_timeout, req.json(&body).send())
            .await
            .map_err(|_| AgentError::Api(ApiError::Timeout))??;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, retry_after, &body));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                if e.is_timeout() {
                    AgentError::Api(ApiError::Timeout)
                } else {
                    AgentError::Api(ApiError::StreamError(e.to_string()))
                }
            })
        });

        Ok(Box::pin(stream))
    }
}

// OpenAI-compatible wire types

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<WireReasoning>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireReasoning {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}
