// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! `parknet simulate`: a whole convoy in one process.
//!
//! Agents `car-1` (front) to `car-N` share an in-memory broker. Each one's
//! simulated sensor reports the previous car as the vehicle ahead. Once the
//! formation has settled, the requested intents are queued and the convoy
//! runs for the given time. The command then prints every agent's formation
//! and maneuver log.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use parknet_core::domain::node_config::{ArbitrationConfig, UpdaterConfig};
use parknet_core::domain::signature::{Clock, Signature, SystemClock};
use parknet_core::infrastructure::message_bus::{InMemoryBroker, MessageBus};
use parknet_core::infrastructure::simulation::{Maneuver, SimulatedDriver, StaticNeighborSensor};
use parknet_swarm::application::agent::{AgentSettings, ConvoyAgent};
use parknet_swarm::domain::action::ActionMode;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of agents in the convoy
    #[arg(short = 'n', long, default_value_t = 3)]
    pub agents: usize,

    /// Intent to queue, as AGENT:MODE with AGENT counted from the front
    /// (e.g. 2:parking/leave)
    #[arg(long = "intent", value_name = "AGENT:MODE", value_parser = parse_intent)]
    pub intents: Vec<(usize, ActionMode)>,

    /// Seconds to run after the intents are queued
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,

    /// Duration of each simulated maneuver in milliseconds
    #[arg(long, default_value_t = 300)]
    pub maneuver_ms: u64,

    /// Half-length of every vehicle in cm
    #[arg(long, default_value_t = 50.0)]
    pub delta: f64,
}

/// Parses `AGENT:MODE`.
pub fn parse_intent(raw: &str) -> Result<(usize, ActionMode), String> {
    let (agent, mode) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected AGENT:MODE, got '{raw}'"))?;
    let agent = agent
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid agent number '{agent}': {e}"))?;
    if agent == 0 {
        return Err("agents are numbered from 1".to_string());
    }
    let mode = mode.trim().parse::<ActionMode>().map_err(|e| e.to_string())?;
    Ok((agent, mode))
}

/// Timings scaled down so a simulated convoy settles within seconds.
fn simulation_timing() -> (ArbitrationConfig, UpdaterConfig) {
    let arbitration = ArbitrationConfig {
        wait_send_global: Duration::from_millis(100),
        wait_check_permission: Duration::from_millis(100),
        wait_first_in_queue: Duration::from_millis(400),
        wait_act: Duration::from_millis(100),
        claim_timeout: None,
    };
    let updater = UpdaterConfig {
        min_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(1),
        steps: 6,
    };
    (arbitration, updater)
}

pub struct SimulatedConvoy {
    pub agents: Vec<Arc<ConvoyAgent>>,
    pub drivers: Vec<SimulatedDriver>,
}

impl SimulatedConvoy {
    /// Builds `count` agents in a line on `broker`.
    pub fn build(broker: &InMemoryBroker, count: usize, delta: f64, maneuver: Duration) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (arbitration, updater) = simulation_timing();
        let mut agents = Vec::with_capacity(count);
        let mut drivers = Vec::with_capacity(count);

        for index in 1..=count {
            let signature = Signature::new(format!("car-{index}"));
            let ahead = (index > 1).then(|| Signature::new(format!("car-{}", index - 1)));

            let mut settings = AgentSettings::new(signature.clone(), delta);
            settings.arbitration = arbitration.clone();
            settings.updater = updater.clone();

            let bus = MessageBus::new(signature.clone(), clock.clone(), Arc::new(broker.transport()));
            let driver = SimulatedDriver::new(signature, maneuver);
            agents.push(Arc::new(ConvoyAgent::new(
                settings,
                bus,
                Arc::new(StaticNeighborSensor::new(ahead)),
                Arc::new(driver.clone()),
            )));
            drivers.push(driver);
        }

        Self { agents, drivers }
    }

    /// True once every agent sees all `count` members.
    pub async fn is_formed(&self) -> bool {
        let count = self.agents.len();
        for agent in &self.agents {
            if agent.formation().await.len() != count {
                return false;
            }
        }
        true
    }
}

pub async fn handle_command(args: SimulateArgs) -> Result<()> {
    if args.agents == 0 {
        anyhow::bail!("A convoy needs at least one agent");
    }
    if let Some((agent, _)) = args.intents.iter().find(|(agent, _)| *agent > args.agents) {
        anyhow::bail!("Intent for agent {} but the convoy has {} agents", agent, args.agents);
    }

    let broker = InMemoryBroker::with_default_capacity();
    let convoy = SimulatedConvoy::build(
        &broker,
        args.agents,
        args.delta,
        Duration::from_millis(args.maneuver_ms),
    );
    let handles: Vec<_> = convoy
        .agents
        .iter()
        .map(|agent| agent.start(broker.subscribe()))
        .collect();

    println!("{}", format!("Simulating a convoy of {} agents", args.agents).bold());

    let formed = tokio::time::timeout(Duration::from_secs(10), async {
        while !convoy.is_formed().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();
    if !formed {
        println!("{}", "⚠ Formation did not converge within 10s".yellow());
    }
    print_formations(&convoy, "Initial formations").await;

    for (index, mode) in &args.intents {
        let agent = convoy
            .agents
            .get(index - 1)
            .context("Intent targets an unknown agent")?;
        let intent = agent.request(*mode).await;
        info!(intent = %intent, "Queued intent");
    }

    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    join_all(handles.into_iter().map(|handle| handle.stop())).await;

    print_formations(&convoy, "Final formations").await;

    println!("{}", "Maneuver log:".bold());
    for (agent, driver) in convoy.agents.iter().zip(&convoy.drivers) {
        let log: Vec<String> = driver.maneuvers().iter().map(describe).collect();
        if log.is_empty() {
            println!("  {}: {}", agent.signature(), "(none)".dimmed());
        } else {
            println!("  {}: {}", agent.signature(), log.join(" → "));
        }
    }

    Ok(())
}

async fn print_formations(convoy: &SimulatedConvoy, title: &str) {
    println!("{}", format!("{title}:").bold());
    for agent in &convoy.agents {
        let formation = agent.formation().await;
        let gap = formation.calc_gap(agent.formation_service().gap_policy());
        println!("  {}: {} gap {:.1} cm", agent.signature(), formation, gap);
    }
    println!();
}

fn describe(maneuver: &Maneuver) -> String {
    match maneuver {
        Maneuver::CreateSpace(leaving) => format!("{}(#{})", maneuver.name(), leaving),
        other => other.name().to_string(),
    }
}
