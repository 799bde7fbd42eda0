// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! Formation Service
//!
//! Owns the local relation graph and the formation derived from it.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Publishes this agent's relation facts and folds in those of
//!   its peers
//!
//! ```text
//! NeighborSensor ──▶ update() ──add──▶ RelationGraph ──▶ Formation
//!                       │                   ▲
//!                       ▼                   │ handle_relation()
//!                  MessageBus ─── formation ┘   (every agent)
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::collaborators::{NeighborSensor, SensorError};
use crate::domain::formation::{Formation, FormationError, GapPolicy};
use crate::domain::member::{Member, MemberRelation};
use crate::domain::message::{DecodeError, Envelope, Topic};
use crate::domain::relation_graph::RelationGraph;
use crate::domain::signature::{Signature, Timestamp};
use crate::infrastructure::message_bus::MessageBus;

struct FormationState {
    graph: RelationGraph,
    formation: Formation,
    /// Sticky intent-to-leave carried by every relation until cleared.
    filing: Option<Timestamp>,
}

pub struct FormationService {
    signature: Signature,
    delta: f64,
    sensor: Arc<dyn NeighborSensor>,
    bus: MessageBus,
    gap_policy: GapPolicy,
    state: Mutex<FormationState>,
}

impl FormationService {
    pub fn new(delta: f64, sensor: Arc<dyn NeighborSensor>, bus: MessageBus, gap_policy: GapPolicy) -> Self {
        let signature = bus.signature().clone();
        let formation = Formation::singleton(Member::new(signature.clone(), delta));
        Self {
            signature,
            delta,
            sensor,
            bus,
            gap_policy,
            state: Mutex::new(FormationState {
                graph: RelationGraph::new(),
                formation,
                filing: None,
            }),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Reads the neighbor sensor, records this agent's relation locally and
    /// broadcasts it on `formation`.
    ///
    /// `filing` becomes the sticky filing state. Returns whether the
    /// formation changed.
    pub async fn update(&self, filing: Option<Timestamp>) -> Result<bool, SensorError> {
        let ahead_signature = self.sensor.ahead_signature().await?;

        let relation = {
            let mut state = self.state.lock().await;
            state.filing = filing;
            MemberRelation::new(
                Member::new(self.signature.clone(), self.delta).with_filing(filing),
                ahead_signature,
            )
        };

        let changed = self.add(relation.clone()).await;
        // Lock released: the broadcast must not hold the formation state.
        let _ = self.bus.publish(Topic::Formation, &relation).await;
        Ok(changed)
    }

    /// [`FormationService::update`] with the current filing state.
    pub async fn refresh(&self) -> Result<bool, SensorError> {
        let filing = self.filing().await;
        self.update(filing).await
    }

    pub async fn filing(&self) -> Option<Timestamp> {
        self.state.lock().await.filing
    }

    /// Changes the filing state; the next update carries it.
    pub async fn set_filing(&self, filing: Option<Timestamp>) {
        self.state.lock().await.filing = filing;
    }

    /// Folds a peer's `formation` message into the graph.
    pub async fn handle_relation(&self, envelope: &Envelope) -> Result<bool, DecodeError> {
        let relation: MemberRelation = envelope.content_as("member relation")?;
        debug!(from = %envelope.sender, about = %relation.signature(), "Relation received");
        Ok(self.add(relation).await)
    }

    /// Adds `relation` and recomputes the formation. Returns whether the
    /// formation changed.
    pub async fn add(&self, relation: MemberRelation) -> bool {
        let mut state = self.state.lock().await;
        if !state.graph.add(relation) {
            return false;
        }

        let local = Member::new(self.signature.clone(), self.delta).with_filing(state.filing);
        let formation = Formation::resolve_or_singleton(&state.graph, &local);
        if formation == state.formation {
            return false;
        }

        info!(agent = %self.signature, formation = %formation, "Formation changed");
        state.formation = formation;
        true
    }

    pub async fn formation(&self) -> Formation {
        self.state.lock().await.formation.clone()
    }

    pub async fn graph(&self) -> RelationGraph {
        self.state.lock().await.graph.clone()
    }

    pub async fn calc_gap(&self) -> f64 {
        self.state.lock().await.formation.calc_gap(&self.gap_policy)
    }

    pub async fn distance(&self, a: &Signature, b: &Signature) -> Result<usize, FormationError> {
        self.state.lock().await.formation.distance(a, b)
    }

    pub async fn comes_before(&self, a: &Signature, b: &Signature) -> Result<bool, FormationError> {
        self.state.lock().await.formation.comes_before(a, b)
    }

    pub fn gap_policy(&self) -> &GapPolicy {
        &self.gap_policy
    }
}
