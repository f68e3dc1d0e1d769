// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider stream handling: SSE decoding and tool-call accumulation

pub mod accumulator;
pub mod decoder;

pub use accumulator::{ResolvedToolCall, ToolCallAccumulator, ToolCallRequest};
pub use decoder::{FinishReason, SseDecoder, StreamDelta, ToolCallDelta};
