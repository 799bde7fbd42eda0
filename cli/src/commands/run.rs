// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! `parknet run`: one agent node on the network.
//!
//! Outbound envelopes are POSTed to every peer and to this node's own
//! gateway. The gateway feeds a local broker that the agent's inbox reads
//! from. Sensor and driver are the simulated collaborators configured under
//! `spec.simulation`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use parknet_core::domain::node_config::AgentConfigManifest;
use parknet_core::domain::signature::{Signature, SystemClock};
use parknet_core::infrastructure::http_transport::HttpTransport;
use parknet_core::infrastructure::message_bus::{InMemoryBroker, MessageBus};
use parknet_core::infrastructure::simulation::{SimulatedDriver, StaticNeighborSensor};
use parknet_core::presentation::api;
use parknet_swarm::application::agent::{AgentSettings, ConvoyAgent};
use parknet_swarm::domain::action::ActionMode;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Gateway port (overrides spec.network.port)
    #[arg(long, env = "PARKNET_PORT")]
    pub port: Option<u16>,

    /// Signature of the vehicle ahead, as reported by the simulated sensor
    #[arg(long, value_name = "SIGNATURE")]
    pub ahead: Option<String>,

    /// Intents queued once the node is up (e.g. parking/leave)
    #[arg(long = "intent", value_name = "MODE")]
    pub intents: Vec<ActionMode>,
}

pub async fn handle_command(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config =
        AgentConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    apply_args(&mut config, &args);
    config
        .validate()
        .context("Configuration validation failed")?;
    if config.has_generated_signature() {
        warn!(
            signature = %config.spec.agent.signature,
            "No signature configured, using a random one. Peers will keep a stale entry for it after a restart"
        );
    }

    let spec = &config.spec;
    let signature = spec.agent.signature.clone();
    info!(
        signature = %signature,
        delta = spec.agent.delta,
        peers = spec.network.peers.len(),
        "Configuration loaded"
    );

    if let Some(metrics) = spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        if metrics.enabled {
            let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
            info!("Prometheus exporter listening on {}", addr);
        }
    }

    let broker = InMemoryBroker::with_default_capacity();
    let transport = HttpTransport::new(
        &spec.network.local_url(),
        &spec.network.peers,
        spec.network.request_timeout,
    )
    .context("Failed to create HTTP transport")?;
    let bus = MessageBus::new(signature.clone(), Arc::new(SystemClock), Arc::new(transport));

    let sensor = StaticNeighborSensor::new(spec.simulation.ahead_signature.clone());
    let driver = SimulatedDriver::new(signature.clone(), spec.simulation.maneuver_duration);
    let agent = Arc::new(ConvoyAgent::new(
        AgentSettings::from(&config),
        bus,
        Arc::new(sensor),
        Arc::new(driver),
    ));

    let addr = format!("{}:{}", spec.network.bind_address, spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Subscribe before the gateway accepts anything.
    let handle = agent.start(broker.subscribe());
    let shutdown = handle.shutdown_token();
    let router = api::app(signature.clone(), broker, agent.clone());
    let server = tokio::spawn(api::serve(listener, router, shutdown.clone()));

    println!(
        "{}",
        format!("✓ Agent {} running, gateway on {}", signature, addr).green()
    );

    for mode in &args.intents {
        let intent = agent.request(*mode).await;
        info!(intent = %intent, "Queued intent from command line");
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => {}
    }

    info!("Agent shutting down");
    handle.stop().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Gateway failed: {}", e),
        Err(e) => error!("Gateway task ended abnormally: {}", e),
    }

    Ok(())
}

/// Command-line flags win over file and environment.
fn apply_args(config: &mut AgentConfigManifest, args: &RunArgs) {
    if let Some(port) = args.port {
        config.spec.network.port = port;
    }
    if let Some(ahead) = &args.ahead {
        config.spec.simulation.ahead_signature = Some(Signature::new(ahead.as_str()));
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
