// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool registry
//!
//! Maps tool names to the backend that serves them. Built once per session
//! configuration and read-only while a turn runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::ToolBackend;

/// Separator between backend id and tool name under [`ConflictPolicy::Namespace`]
pub const NAMESPACE_SEPARATOR: &str = "__";

/// What happens when two backends advertise the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The later registration replaces the earlier mapping
    #[default]
    LastWriteWins,
    /// The later registration fails
    Reject,
    /// Every tool is exposed as `<backend_id>__<tool>`
    Namespace,
}

/// One routable tool
#[derive(Clone)]
pub struct ToolRegistryEntry {
    /// Name the model sees
    pub tool_name: String,
    /// Name the backend knows the tool by
    pub backend_tool_name: String,
    pub backend_id: String,
    pub definition: ToolDefinition,
    backend: Arc<dyn ToolBackend>,
}

impl ToolRegistryEntry {
    pub fn backend(&self) -> &Arc<dyn ToolBackend> {
        &self.backend
    }
}

impl fmt::Debug for ToolRegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistryEntry")
            .field("tool_name", &self.tool_name)
            .field("backend_tool_name", &self.backend_tool_name)
            .field("backend_id", &self.backend_id)
            .finish()
    }
}

/// Registry of tools across all backends
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    /// Entries in registration order
    entries: Vec<ToolRegistryEntry>,
    /// Tool name to position in `entries`
    index: HashMap<String, usize>,
    policy: ConflictPolicy,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Register a backend's tools, returning how many were added.
    pub fn register(
        &mut self,
        backend_id: &str,
        backend: Arc<dyn ToolBackend>,
        tools: Vec<ToolDefinition>,
    ) -> Result<usize> {
        let tools: Vec<ToolDefinition> = tools
            .into_iter()
            .filter(|tool| {
                let keep = !tool.name.trim().is_empty();
                if !keep {
                    tracing::warn!(
                        target: "toolstream.tools.registry",
                        backend = backend_id,
                        "skipping tool with empty name"
                    );
                }
                keep
            })
            .collect();

        if self.policy == ConflictPolicy::Reject {
            // Check everything first so a rejected backend leaves no partial state.
            for tool in &tools {
                if let Some(existing) = self.get(&tool.name) {
                    if existing.backend_id != backend_id {
                        return Err(AgentError::Config(format!(
                            "tool '{}' from backend '{}' conflicts with backend '{}'",
                            tool.name, backend_id, existing.backend_id
                        )));
                    }
                }
            }
        }

        let count = tools.len();
        for tool in tools {
            let tool_name = match self.policy {
                ConflictPolicy::Namespace => {
                    format!("{backend_id}{NAMESPACE_SEPARATOR}{}", tool.name)
                }
                _ => tool.name.clone(),
            };

            let entry = ToolRegistryEntry {
                backend_tool_name: tool.name.clone(),
                definition: tool.renamed(tool_name.clone()),
                tool_name: tool_name.clone(),
                backend_id: backend_id.to_string(),
                backend: backend.clone(),
            };

            match self.index.get(&tool_name) {
                Some(&position) => {
                    let previous = &self.entries[position].backend_id;
                    if previous != backend_id {
                        tracing::warn!(
                            target: "toolstream.tools.registry",
                            tool = %tool_name,
                            previous_backend = %previous,
                            backend = backend_id,
                            "tool name conflict, later registration wins"
                        );
                    }
                    self.entries[position] = entry;
                }
                None => {
                    self.index.insert(tool_name, self.entries.len());
                    self.entries.push(entry);
                }
            }
        }

        tracing::debug!(
            target: "toolstream.tools.registry",
            backend = backend_id,
            tools = count,
            "registered backend"
        );

        Ok(count)
    }

    /// Ask a backend for its tools, then register them
    pub async fn register_backend(
        &mut self,
        backend_id: &str,
        backend: Arc<dyn ToolBackend>,
    ) -> Result<usize> {
        let tools = backend.list_tools().await?;
        self.register(backend_id, backend, tools)
    }

    /// Look up the backend serving `name`
    pub fn route(&self, name: &str) -> Result<&ToolRegistryEntry> {
        self.get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Get an entry by model-facing name
    pub fn get(&self, name: &str) -> Option<&ToolRegistryEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Definitions for the provider request, in registration order
    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn entries(&self) -> &[ToolRegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
