// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ordered event delivery for one turn

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::events::AgentEvent;

/// Sending half of a turn's event stream.
///
/// At most one terminal event gets through; everything after it is dropped.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<AgentEvent>,
    terminated: Arc<AtomicBool>,
}

/// Create an emitter and the receiver the caller reads from
pub fn channel(buffer: usize) -> (EventEmitter, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        EventEmitter {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}

impl EventEmitter {
    /// Send an event, waiting for buffer space.
    ///
    /// Returns `false` if the event was not delivered: a terminal event was
    /// already sent, or the receiver is gone.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            tracing::trace!(
                target: "toolstream.chat.emitter",
                kind = event.kind(),
                "event after terminal dropped"
            );
            return false;
        }
        if event.is_terminal() && self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }

        let kind = event.kind();
        if self.tx.send(event).await.is_err() {
            tracing::debug!(
                target: "toolstream.chat.emitter",
                kind,
                "receiver dropped"
            );
            return false;
        }
        true
    }

    /// Whether a terminal event has been sent
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Whether the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
