// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for toolstream
//!
//! Handles loading and saving settings from ~/.toolstream/settings.json

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::tools::registry::ConflictPolicy;

mod io;
mod validation;

/// Main settings structure, stored in ~/.toolstream/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat-completions provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retry and resilience settings for provider calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Tool registry behaviour
    #[serde(default)]
    pub registry: RegistryConfig,

    /// External tool backends launched as processes
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// OpenAI-compatible provider configuration (OpenRouter by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API key stored in settings (env var takes precedence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat completions endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when none is given on the command line
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sent as `HTTP-Referer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,

    /// Sent as `X-Title`
    #[serde(default = "default_site_name")]
    pub site_name: Option<String>,

    /// Timeout for opening the stream (connect + response headers)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Ask the provider to stream reasoning tokens
    #[serde(default = "default_true")]
    pub enable_reasoning: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            site_url: None,
            site_name: default_site_name(),
            request_timeout_secs: default_request_timeout_secs(),
            enable_reasoning: true,
        }
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider round-trips allowed per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// System prompt placed at index 0 of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Characters of a tool payload echoed in `tool_result` events
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,

    /// Timeout for one tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Timeout waiting for the next frame of an open stream
    #[serde(default = "default_stream_read_timeout_secs")]
    pub stream_read_timeout_secs: u64,

    /// Emit a `synthesizing` event before re-querying the provider
    #[serde(default = "default_true")]
    pub emit_synthesizing: bool,

    /// Capacity of the per-turn event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Apply the retry policy to tool invocations as well
    #[serde(default)]
    pub retry_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            result_preview_chars: default_result_preview_chars(),
            tool_timeout_secs: default_tool_timeout_secs(),
            stream_read_timeout_secs: default_stream_read_timeout_secs(),
            emit_synthesizing: true,
            event_buffer: default_event_buffer(),
            retry_tool_calls: false,
        }
    }
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }
}

/// Retry and backoff configuration for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retries after the initial attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Cap on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction (0.0 to 1.0) applied to each delay
    #[serde(default)]
    pub jitter: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: 0.0,
        }
    }
}

/// Tool registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// What to do when two backends advertise the same tool name
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

/// An external backend process speaking JSON-RPC over stdio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Routing key, e.g. "sqlite" or "websearch"
    pub id: String,

    /// Program followed by its arguments
    pub command: Vec<String>,

    /// Extra environment for the process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    12000
}

fn default_site_name() -> Option<String> {
    Some("toolstream".to_string())
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_iterations() -> u32 {
    10
}

fn default_system_prompt() -> String {
    "You are a data assistant. Use the available tools to query databases, \
knowledge bases and the web, then answer with clear, concise findings."
        .to_string()
}

fn default_result_preview_chars() -> usize {
    200
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_stream_read_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}
