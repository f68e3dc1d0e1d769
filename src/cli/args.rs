// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// toolstream - streaming tool-calling agent
#[derive(Parser, Debug)]
#[command(name = "toolstream")]
#[command(version, about = "Streaming tool-calling agent over OpenAI-compatible providers")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.toolstream/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn and stream its events to stdout
    Chat(ChatArgs),

    /// List the tools advertised by the configured backends
    Tools,

    /// Show or initialise configuration
    Config(ConfigArgs),
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug)]
pub struct ChatArgs {
    /// The user message
    pub message: String,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// JSON file with prior messages to continue from
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Write the final message list here as JSON
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "sse")]
    pub format: OutputFormat,
}

/// Output format for chat events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `data: {json}` frames
    #[default]
    Sse,
    /// Assistant text only, progress on stderr
    Text,
}

/// Arguments for the config subcommand
#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,

    /// Print the settings file path
    Path,

    /// Write a default settings file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
