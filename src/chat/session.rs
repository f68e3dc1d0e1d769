// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! A session owns one conversation and the agent built for its backends.
//! Sessions never share conversation state; the provider is the only thing
//! they have in common.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::emitter;
use crate::chat::engine::{AgentLoop, TurnReport};
use crate::chat::events::AgentEvent;
use crate::config::Settings;
use crate::error::{AgentError, Result};
use crate::llm::message::{Conversation, Message};
use crate::llm::provider::LlmProvider;
use crate::tools::{ToolBackend, ToolExecutor, ToolRegistry};

/// A named tool backend to register for a session
pub type BackendHandle = (String, Arc<dyn ToolBackend>);

/// State for one conversation
pub struct Session {
    id: String,
    conversation: Conversation,
    agent: Arc<AgentLoop>,
    iteration_count: u32,
}

impl Session {
    pub fn new(id: impl Into<String>, agent: Arc<AgentLoop>, conversation: Conversation) -> Self {
        Self {
            id: id.into(),
            conversation,
            agent,
            iteration_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.agent.executor().registry()
    }

    /// Tool rounds used by the most recent turn
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Drop everything but the system prompt
    pub fn clear_history(&mut self) {
        self.conversation.reset();
        self.iteration_count = 0;
    }

    /// Run one turn against this session's conversation
    pub async fn run_turn(
        &mut self,
        message: impl Into<String>,
        emitter: &emitter::EventEmitter,
        cancel: &CancellationToken,
    ) -> TurnReport {
        self.iteration_count = 0;
        let report = self
            .agent
            .run_turn(&mut self.conversation, message, emitter, cancel)
            .await;
        self.iteration_count = report.iterations;
        report
    }
}

/// Result of a spawned turn
#[derive(Debug)]
pub struct TurnOutput {
    pub report: TurnReport,
    /// The whole conversation after the turn, for the caller to persist
    pub messages: Vec<Message>,
}

/// Handle to a running turn
pub struct TurnHandle {
    /// Ordered events; ends after the terminal event
    pub events: mpsc::Receiver<AgentEvent>,
    /// Cancel the turn
    pub cancel: CancellationToken,
    /// Resolves once the turn has finished
    pub join: JoinHandle<TurnOutput>,
}

/// All live sessions, keyed by session id
pub struct SessionManager {
    provider: Arc<dyn LlmProvider>,
    settings: Settings,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: Settings) -> Self {
        Self {
            provider,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a session under a fresh id
    pub async fn create(&self, backends: Vec<BackendHandle>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.configure(&id, backends).await?;
        Ok(id)
    }

    /// Configure `session_id` with these backends.
    ///
    /// Configuring an existing session replaces it, history included.
    pub async fn configure(&self, session_id: &str, backends: Vec<BackendHandle>) -> Result<()> {
        let conversation = Conversation::with_system(self.settings.agent.system_prompt.clone());
        self.install(session_id, backends, conversation).await
    }

    /// Configure `session_id` and seed it with persisted history
    pub async fn restore(
        &self,
        session_id: &str,
        backends: Vec<BackendHandle>,
        history: Vec<Message>,
    ) -> Result<()> {
        let conversation =
            Conversation::from_messages(self.settings.agent.system_prompt.clone(), history);
        self.install(session_id, backends, conversation).await
    }

    async fn install(
        &self,
        session_id: &str,
        backends: Vec<BackendHandle>,
        conversation: Conversation,
    ) -> Result<()> {
        let agent = Arc::new(self.build_agent(backends).await?);
        let session = Session::new(session_id, agent.clone(), conversation);

        let replaced = self
            .sessions
            .write()
            .await
            .insert(session_id.to_string(), Arc::new(Mutex::new(session)))
            .is_some();

        tracing::info!(
            target: "toolstream.chat.session",
            session = session_id,
            tools = agent.executor().registry().len(),
            replaced,
            "session configured"
        );
        Ok(())
    }

    async fn build_agent(&self, backends: Vec<BackendHandle>) -> Result<AgentLoop> {
        let mut registry = ToolRegistry::new(self.settings.registry.conflict_policy);
        for (backend_id, backend) in backends {
            registry.register_backend(&backend_id, backend).await?;
        }

        let executor = ToolExecutor::new(Arc::new(registry), self.settings.agent.tool_timeout());
        Ok(AgentLoop::from_settings(
            self.provider.clone(),
            executor,
            &self.settings,
        ))
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Reset a session's history to its system prompt
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        let session = self.require(session_id).await?;
        session.lock().await.clear_history();
        tracing::info!(
            target: "toolstream.chat.session",
            session = session_id,
            "history cleared"
        );
        Ok(())
    }

    /// Forget a session entirely
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Snapshot of a session's messages
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let session = self.require(session_id).await?;
        let messages = session.lock().await.conversation().snapshot();
        Ok(messages)
    }

    /// Start a turn on the runtime.
    ///
    /// Turns on the same session queue behind each other; turns on different
    /// sessions run concurrently.
    pub async fn run_turn(&self, session_id: &str, message: impl Into<String>) -> Result<TurnHandle> {
        let session = self.require(session_id).await?;
        let (emitter, events) = emitter::channel(self.settings.agent.event_buffer);
        let cancel = CancellationToken::new();
        let message = message.into();

        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let mut session = session.lock().await;
            let report = session.run_turn(message, &emitter, &token).await;
            TurnOutput {
                report,
                messages: session.conversation().snapshot(),
            }
        });

        Ok(TurnHandle {
            events,
            cancel,
            join,
        })
    }

    async fn require(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        self.get(session_id)
            .await
            .ok_or_else(|| AgentError::Session(format!("unknown session '{}'", session_id)))
    }
}
