// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::{Path, PathBuf};

use crate::error::Result;

use super::Settings;

impl Settings {
    /// Get the default settings file path.
    pub fn default_path() -> PathBuf {
        Self::home().join("settings.json")
    }

    /// Load settings from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                target: "toolstream.config",
                path = %path.display(),
                "settings file missing, using defaults"
            );
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&content)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save settings to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the toolstream home directory (~/.toolstream or $TOOLSTREAM_HOME).
    pub fn home() -> PathBuf {
        if let Ok(home) = std::env::var("TOOLSTREAM_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".toolstream")
    }

    /// Environment overrides for the model and endpoint.
    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("TOOLSTREAM_MODEL") {
            if !model.trim().is_empty() {
                self.provider.default_model = model;
            }
        }
        if let Ok(endpoint) = std::env::var("OPENROUTER_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.provider.base_url = endpoint;
            }
        }
    }
}
