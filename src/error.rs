// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for toolstream
//!
//! `AgentError` is the crate-wide error. Provider transport failures live in
//! `ApiError` so the retry layer can classify them without string matching.

use thiserror::Error;

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider/API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The provider asked for a tool no registered backend advertises
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Accumulated tool-call arguments were not valid JSON
    #[error("Malformed arguments for tool call {id}: {reason}")]
    MalformedToolCall { id: String, reason: String },

    /// A backend failed, returned an error payload, or timed out
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The turn used up its iteration budget
    #[error("Maximum tool iterations ({0}) exceeded")]
    MaxIterationsExceeded(u32),

    /// The caller cancelled the turn
    #[error("Turn cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session errors
    #[error("Session error: {0}")]
    Session(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors that are not transport timeouts
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// HTTP 429 from the provider
    #[error("Rate limited by provider")]
    RateLimited {
        /// Seconds suggested by a `Retry-After` header, if any
        retry_after: Option<u64>,
    },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout opening or reading the stream
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Api(ApiError::Timeout)
        } else if err.is_connect() {
            AgentError::Api(ApiError::Network(err.to_string()))
        } else {
            AgentError::Http(err)
        }
    }
}
