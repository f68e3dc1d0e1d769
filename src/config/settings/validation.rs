// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::collections::HashSet;

use crate::error::{AgentError, Result};

use super::Settings;

impl Settings {
    /// Get the provider API key, checking env var first.
    pub fn get_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| self.provider.api_key.clone())
    }

    /// Reject values the agent loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(AgentError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.event_buffer == 0 {
            return Err(AgentError::Config(
                "agent.event_buffer must be at least 1".to_string(),
            ));
        }
        if !self.resilience.backoff_factor.is_finite() || self.resilience.backoff_factor < 1.0 {
            return Err(AgentError::Config(format!(
                "resilience.backoff_factor must be >= 1.0, got {}",
                self.resilience.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.resilience.jitter) {
            return Err(AgentError::Config(format!(
                "resilience.jitter must be between 0.0 and 1.0, got {}",
                self.resilience.jitter
            )));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(AgentError::Config("backend id cannot be empty".to_string()));
            }
            if backend.command.is_empty() || backend.command[0].trim().is_empty() {
                return Err(AgentError::Config(format!(
                    "backend '{}' has an empty command",
                    backend.id
                )));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(AgentError::Config(format!(
                    "backend id '{}' is configured twice",
                    backend.id
                )));
            }
        }

        Ok(())
    }
}
