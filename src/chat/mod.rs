// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat sessions and the agent loop
//!
//! `engine` drives a turn, `events`/`emitter` carry what the caller sees, and
//! `session` keeps per-session conversations apart.

pub mod emitter;
pub mod engine;
pub mod events;
pub mod session;

pub use emitter::EventEmitter;
pub use engine::{AgentLoop, LoopState, TurnReport};
pub use events::AgentEvent;
pub use session::{BackendHandle, Session, SessionManager, TurnHandle, TurnOutput};
