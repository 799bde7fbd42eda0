// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use parknet_core::domain::node_config::AgentConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path (default: ./parknet-config.yaml)
        #[arg(short, long, default_value = "./parknet-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = AgentConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PARKNET_CONFIG_PATH: {}",
            std::env::var("PARKNET_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./parknet-config.yaml");
        println!("  4. ~/.parknet/config.yaml");
        println!("  5. /etc/parknet/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Agent:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Signature: {}", spec.agent.signature);
    println!("  Delta: {} cm", spec.agent.delta);
    println!();

    println!("{}", "Formation:".bold());
    println!(
        "  Gap policy: multiplier {} + safety margin {} cm",
        spec.formation.gap.multiplier, spec.formation.gap.safety_margin
    );
    println!(
        "  Updater: {:?} → {:?} over {} steps",
        spec.formation.updater.min_delay, spec.formation.updater.max_delay, spec.formation.updater.steps
    );
    println!();

    println!("{}", "Arbitration:".bold());
    println!("  Send global: {:?}", spec.arbitration.wait_send_global);
    println!("  Check permission: {:?}", spec.arbitration.wait_check_permission);
    println!("  First in queue: {:?}", spec.arbitration.wait_first_in_queue);
    println!("  Act: {:?}", spec.arbitration.wait_act);
    println!("  Claim timeout: {:?}", spec.arbitration.claim_timeout());
    println!();

    println!("{}", "Network:".bold());
    println!("  Gateway: {}:{}", spec.network.bind_address, spec.network.port);
    if spec.network.peers.is_empty() {
        println!("  Peers: {}", "(none)".dimmed());
    } else {
        println!("  Peers:");
        for peer in &spec.network.peers {
            println!("    - {}", peer);
        }
    }
    println!();

    println!("{}", "Simulation:".bold());
    println!(
        "  Vehicle ahead: {}",
        spec.simulation
            .ahead_signature
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(none, front of the convoy)".to_string())
    );
    println!("  Maneuver duration: {:?}", spec.simulation.maneuver_duration);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AgentConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    if config.has_generated_signature() {
        println!(
            "{}",
            "⚠ spec.agent.signature is not configured; a random signature is minted on every start".yellow()
        );
    }
    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    std::fs::write(output, sample(with_examples))
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn sample(with_examples: bool) -> &'static str {
    if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_manifests() {
        for with_examples in [false, true] {
            let manifest = AgentConfigManifest::from_yaml_str(sample(with_examples)).unwrap();
            manifest.validate().unwrap();
            assert!(!manifest.has_generated_signature());
        }
    }

    #[tokio::test]
    async fn test_generate_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parknet-config.yaml");

        generate(&path, true).await.unwrap();

        let manifest = AgentConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(manifest.spec.agent.signature.as_str(), "car-2");
        assert_eq!(manifest.spec.network.peers.len(), 2);
    }
}
