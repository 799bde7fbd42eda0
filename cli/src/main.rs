// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! # parknet
//!
//! The `parknet` binary runs one convoy agent node or a whole convoy
//! in-process.
//!
//! ## Commands
//!
//! - `parknet run` - Start an agent node with the HTTP transport
//! - `parknet simulate` - Spawn N agents on an in-memory broker and report
//! - `parknet config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use parknet::commands::{self, ConfigCommand, RunArgs, SimulateArgs};
use parknet_core::domain::node_config::AgentConfigManifest;

/// parknet - Leaderless coordination for convoys of parking vehicles
#[derive(Parser)]
#[command(name = "parknet")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PARKNET_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the
    /// configured level, then "info".
    #[arg(long, global = true, env = "PARKNET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true, env = "PARKNET_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent node
    #[command(name = "run")]
    Run(RunArgs),

    /// Simulate a convoy in-process
    #[command(name = "simulate")]
    Simulate(SimulateArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings from the config file apply only to an agent node.
    let configured = match cli.command {
        Some(Commands::Run(_)) => configured_logging(cli.config.clone()),
        _ => None,
    };
    let level = cli
        .log_level
        .clone()
        .or_else(|| configured.as_ref().map(|(level, _)| level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured.map(|(_, format)| format))
        .unwrap_or_else(|| "text".to_string());
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Run(args)) => commands::run::handle_command(args, cli.config).await,
        Some(Commands::Simulate(args)) => commands::simulate::handle_command(args).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Level and format from the `observability.logging` section, if any.
fn configured_logging(config: Option<PathBuf>) -> Option<(String, String)> {
    let manifest = AgentConfigManifest::load_or_default(config).ok()?;
    let logging = manifest.spec.observability?.logging?;
    Some((logging.level, logging.format))
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_current_span(false).init(),
        "text" => builder.with_target(false).compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Expected 'text' or 'json'", other),
    }

    Ok(())
}
