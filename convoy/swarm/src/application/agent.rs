// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! Convoy Agent
//!
//! Wires one vehicle's formation service, action manager and message bus
//! together and runs their background tasks.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Owns the per-agent state and the inbox dispatcher

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parknet_core::application::formation_service::FormationService;
use parknet_core::application::formation_updater::{FormationUpdater, ManeuverGate, StabilizedSchedule};
use parknet_core::domain::collaborators::{Driver, DriverError, NeighborSensor};
use parknet_core::domain::formation::{Formation, GapPolicy};
use parknet_core::domain::message::{DecodeError, Envelope, Topic};
use parknet_core::domain::node_config::{AgentConfigManifest, ArbitrationConfig, UpdaterConfig};
use parknet_core::domain::signature::{Clock, Signature};
use parknet_core::infrastructure::message_bus::{Inbox, MessageBus, Subscriptions};
use parknet_core::presentation::api::{AgentStatus, StatusProvider};

use crate::application::action_manager::{ActionManager, ManeuverObserver};
use crate::domain::action::{Action, ActionMode, Reaction};

/// Everything an agent needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub signature: Signature,
    pub delta: f64,
    pub gap: GapPolicy,
    pub updater: UpdaterConfig,
    pub arbitration: ArbitrationConfig,
}

impl AgentSettings {
    pub fn new(signature: impl Into<Signature>, delta: f64) -> Self {
        Self {
            signature: signature.into(),
            delta,
            gap: GapPolicy::default(),
            updater: UpdaterConfig::default(),
            arbitration: ArbitrationConfig::default(),
        }
    }
}

impl From<&AgentConfigManifest> for AgentSettings {
    fn from(manifest: &AgentConfigManifest) -> Self {
        let spec = &manifest.spec;
        Self {
            signature: spec.agent.signature.clone(),
            delta: spec.agent.delta,
            gap: spec.formation.gap,
            updater: spec.formation.updater.clone(),
            arbitration: spec.arbitration.clone(),
        }
    }
}

/// Keeps the filing state in step with the leave maneuver.
struct FilingObserver {
    formation: Arc<FormationService>,
}

#[async_trait]
impl ManeuverObserver for FilingObserver {
    async fn on_maneuver_start(&self, action: &Action) {
        debug!(action = %action, "Maneuver started");
    }

    async fn on_maneuver_complete(&self, action: &Action, result: &Result<(), DriverError>) {
        if action.mode == ActionMode::Leave {
            self.formation.set_filing(None).await;
        }
        match result {
            Ok(()) => info!(action = %action, "Maneuver completed"),
            Err(e) => warn!(action = %action, "Maneuver completed with error: {}", e),
        }
    }

    async fn on_reaction(&self, to: &Action, reaction: &Reaction) {
        debug!(to = %to, reaction = ?reaction, "Reacting to peer");
    }
}

pub struct ConvoyAgent {
    settings: AgentSettings,
    clock: Arc<dyn Clock>,
    formation: Arc<FormationService>,
    actions: Arc<ActionManager>,
    gate: ManeuverGate,
    subscriptions: Subscriptions,
}

impl ConvoyAgent {
    /// `bus` must be bound to `settings.signature`.
    pub fn new(
        settings: AgentSettings,
        bus: MessageBus,
        sensor: Arc<dyn NeighborSensor>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        let clock = bus.clock().clone();
        let gate = ManeuverGate::new();
        let formation = Arc::new(FormationService::new(settings.delta, sensor, bus.clone(), settings.gap));
        let actions = Arc::new(
            ActionManager::new(bus, driver, settings.arbitration.clone(), gate.clone()).with_observer(Arc::new(
                FilingObserver {
                    formation: formation.clone(),
                },
            )),
        );

        let mut subscriptions = Subscriptions::new();
        subscriptions
            .subscribe(Topic::Formation, false)
            .subscribe(Topic::ActiveGlobal, false)
            .subscribe(Topic::CompletedGlobal, false)
            .subscribe(Topic::ProcessFinished, false);

        Self {
            settings,
            clock,
            formation,
            actions,
            gate,
            subscriptions,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.settings.signature
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn formation_service(&self) -> &Arc<FormationService> {
        &self.formation
    }

    pub fn actions(&self) -> &Arc<ActionManager> {
        &self.actions
    }

    pub fn gate(&self) -> &ManeuverGate {
        &self.gate
    }

    pub async fn formation(&self) -> Formation {
        self.formation.formation().await
    }

    /// Queues an intent. A leave intent is announced right away through the
    /// filing state of this agent's relation.
    pub async fn request(&self, mode: ActionMode) -> Action {
        if mode == ActionMode::Leave {
            self.formation.set_filing(Some(self.clock.now())).await;
            if let Err(e) = self.formation.refresh().await {
                warn!("Could not announce leave intent: {}", e);
            }
        }
        self.actions.append(mode).await
    }

    /// Routes one inbound envelope to the service handling its topic.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), DecodeError> {
        let Some(topic) = self.subscriptions.route(envelope, self.signature()) else {
            return Ok(());
        };

        match topic {
            Topic::Formation => {
                self.formation.handle_relation(envelope).await?;
            }
            Topic::ActiveGlobal => self.actions.receive_global_action(envelope).await?,
            Topic::CompletedGlobal => self.actions.receive_completion(envelope).await,
            Topic::ProcessFinished => {
                self.actions.receive_process_finished(envelope).await?;
            }
        }
        Ok(())
    }

    /// Consumes `inbox` until it closes or `shutdown` is cancelled. A
    /// malformed message never stops the pump.
    pub async fn pump(&self, mut inbox: Inbox, shutdown: CancellationToken) {
        loop {
            let received = tokio::select! {
                received = inbox.recv() => received,
                _ = shutdown.cancelled() => break,
            };

            match received {
                Ok(envelope) => {
                    if let Err(e) = self.dispatch(&envelope).await {
                        metrics::counter!("parknet_decode_errors_total").increment(1);
                        warn!(from = %envelope.sender, error = %e, "Dropping malformed message");
                    }
                }
                Err(e) if e.is_fatal() => {
                    warn!("Inbox closed: {}", e);
                    break;
                }
                Err(e) => debug!("Skipping message: {}", e),
            }
        }
        debug!(agent = %self.signature(), "Inbox pump stopped");
    }

    /// Starts the inbox pump, the formation updater and the arbitration loops.
    pub fn start(self: &Arc<Self>, inbox: Inbox) -> AgentHandle {
        let shutdown = CancellationToken::new();
        info!(agent = %self.signature(), delta = self.settings.delta, "Starting convoy agent");

        let pump = {
            let agent = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { agent.pump(inbox, shutdown).await })
        };

        let updater = FormationUpdater::new(
            self.formation.clone(),
            StabilizedSchedule::from(&self.settings.updater),
            self.gate.clone(),
        )
        .start(shutdown.clone());

        let mut tasks = vec![pump, updater];
        tasks.extend(self.actions.spawn_loops(shutdown.clone()));

        AgentHandle { shutdown, tasks }
    }
}

#[async_trait]
impl StatusProvider for ConvoyAgent {
    async fn status(&self) -> AgentStatus {
        let formation = self.formation.formation().await;
        let global_action = self
            .actions
            .global_action()
            .await
            .and_then(|action| serde_json::to_value(action).ok());

        AgentStatus {
            signature: self.signature().clone(),
            formation: formation.members().to_vec(),
            gap: formation.calc_gap(self.formation.gap_policy()),
            global_action,
            verified: self.actions.is_verified().await,
            local_actions: self
                .actions
                .local_actions()
                .await
                .iter()
                .map(|action| action.mode.to_string())
                .collect(),
        }
    }
}

/// Running agent tasks.
pub struct AgentHandle {
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl AgentHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels every task and waits for them to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!("Agent task ended abnormally: {}", e);
            }
        }
    }
}
