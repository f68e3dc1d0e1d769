// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! toolstream - a streaming, multi-backend tool-calling agent loop.
//!
//! A user message goes in; an ordered stream of events comes out while the
//! model streams text, requests tools, and reasons over their results.
//!
//! Architecture highlights:
//! - `llm`: messages, the provider abstraction, retry, OpenRouter provider
//! - `stream`: SSE decoding and tool-call accumulation
//! - `tools`: backend contract, registry, executor, external process backends
//! - `chat`: the agent loop, event emission, and session management
//! - `config`: settings loaded from `~/.toolstream/settings.json`

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod stream;
pub mod tools;

pub use error::{AgentError, Result};
