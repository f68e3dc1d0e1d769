// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! toolstream - streaming tool-calling agent
//!
//! Entry point for the toolstream CLI. Events go to stdout, logs to stderr.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use toolstream::chat::{AgentEvent, BackendHandle, SessionManager};
use toolstream::cli::{ChatArgs, Cli, Commands, ConfigArgs, ConfigCommands, OutputFormat};
use toolstream::config::Settings;
use toolstream::llm::message::Message;
use toolstream::llm::providers::OpenRouterProvider;
use toolstream::tools::external::ProcessBackend;
use toolstream::tools::{ToolBackend, ToolRegistry};

const CLI_SESSION: &str = "cli";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on the core targets without knowing their names; `RUST_LOG`
    // still takes precedence.
    if cli.verbose > 0 {
        for directive in [
            "toolstream.chat.engine=debug",
            "toolstream.llm.retry=debug",
            "toolstream.tools.executor=debug",
            "toolstream.tools.external=debug",
        ] {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load_from(&config_path)
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;

    match cli.command {
        Commands::Chat(args) => run_chat(args, settings).await,
        Commands::Tools => run_tools(settings).await,
        Commands::Config(args) => run_config(args, settings, &config_path),
    }
}

fn configured_backends(settings: &Settings) -> Vec<BackendHandle> {
    settings
        .backends
        .iter()
        .map(|config| {
            let backend: Arc<dyn ToolBackend> = Arc::new(ProcessBackend::from_config(config));
            (config.id.clone(), backend)
        })
        .collect()
}

async fn run_chat(args: ChatArgs, mut settings: Settings) -> Result<()> {
    if let Some(model) = args.model {
        settings.provider.default_model = model;
    }

    let api_key = settings.get_api_key().ok_or_else(|| {
        anyhow!(
            "no API key found; set {} or provider.api_key in settings",
            settings.provider.api_key_env
        )
    })?;
    let provider = OpenRouterProvider::from_config(api_key, &settings.provider);

    let backends = configured_backends(&settings);
    let manager = SessionManager::new(Arc::new(provider), settings);

    match &args.history {
        Some(path) => {
            let history = load_history(path)?;
            manager.restore(CLI_SESSION, backends, history).await?;
        }
        None => manager.configure(CLI_SESSION, backends).await?,
    }

    let mut handle = manager.run_turn(CLI_SESSION, args.message).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => print_event(&event, args.format)?,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                handle.cancel.cancel();
                eprintln!("\ncancelled");
            }
        }
    }

    let output = handle.join.await.context("turn task failed")?;

    if let Some(path) = &args.save {
        let json = serde_json::to_string_pretty(&output.messages)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    match output.report.error {
        None => Ok(()),
        Some(_) if output.report.was_cancelled() => Ok(()),
        Some(error) => Err(error.into()),
    }
}

fn load_history(path: &Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON message list", path.display()))
}

fn print_event(event: &AgentEvent, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout();
    match format {
        OutputFormat::Sse => {
            write!(stdout, "{}", event.to_sse())?;
        }
        OutputFormat::Text => match event {
            AgentEvent::TextChunk { content } => write!(stdout, "{}", content)?,
            AgentEvent::ToolExecuting { tool_name, .. } => eprintln!("  → {}", tool_name),
            AgentEvent::ToolResult {
                tool_name,
                is_error: true,
                result,
                ..
            } => eprintln!("  ✗ {}: {}", tool_name, result),
            AgentEvent::RateLimit { message, .. } | AgentEvent::Timeout { message, .. } => {
                eprintln!("  {}", message)
            }
            AgentEvent::Done => writeln!(stdout)?,
            AgentEvent::Error { error } => eprintln!("error: {}", error),
            _ => {}
        },
    }
    stdout.flush()?;
    Ok(())
}

async fn run_tools(settings: Settings) -> Result<()> {
    let mut registry = ToolRegistry::new(settings.registry.conflict_policy);
    for (backend_id, backend) in configured_backends(&settings) {
        registry
            .register_backend(&backend_id, backend)
            .await
            .with_context(|| format!("backend '{}' failed to list tools", backend_id))?;
    }

    if registry.is_empty() {
        println!("No tools configured. Add backends to {}", Settings::default_path().display());
        return Ok(());
    }

    for entry in registry.entries() {
        println!(
            "{:<32} {:<12} {}",
            entry.tool_name, entry.backend_id, entry.definition.description
        );
    }
    Ok(())
}

fn run_config(args: ConfigArgs, settings: Settings, path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let mut shown = settings;
            if shown.provider.api_key.is_some() {
                shown.provider.api_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default().save_to(path)?;
            println!("Wrote {}", PathBuf::from(path).display());
        }
    }
    Ok(())
}
