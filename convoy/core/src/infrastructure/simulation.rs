// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! Simulated collaborators for nodes running without hardware, the in-process
//! convoy simulation and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::collaborators::{Driver, DriverError, NeighborSensor, SensorError};
use crate::domain::signature::Signature;

/// Neighbor sensor returning whatever it was last told.
#[derive(Debug, Clone, Default)]
pub struct StaticNeighborSensor {
    ahead: Arc<Mutex<Option<Signature>>>,
}

impl StaticNeighborSensor {
    pub fn new(ahead: Option<Signature>) -> Self {
        Self {
            ahead: Arc::new(Mutex::new(ahead)),
        }
    }

    pub fn set(&self, ahead: Option<Signature>) {
        *self.ahead.lock() = ahead;
    }
}

#[async_trait]
impl NeighborSensor for StaticNeighborSensor {
    async fn ahead_signature(&self) -> Result<Option<Signature>, SensorError> {
        Ok(self.ahead.lock().clone())
    }
}

/// A maneuver executed by a [`SimulatedDriver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "maneuver", content = "for", rename_all = "kebab-case")]
pub enum Maneuver {
    Enter,
    Leave,
    Search,
    FollowRoad,
    Manual,
    CreateSpace(Signature),
    MoveUp,
    MoveBack,
}

impl Maneuver {
    pub fn name(&self) -> &'static str {
        match self {
            Maneuver::Enter => "enter",
            Maneuver::Leave => "leave",
            Maneuver::Search => "search",
            Maneuver::FollowRoad => "follow-road",
            Maneuver::Manual => "manual",
            Maneuver::CreateSpace(_) => "create-space",
            Maneuver::MoveUp => "move-up",
            Maneuver::MoveBack => "move-back",
        }
    }
}

/// Driver that sleeps for a fixed duration per maneuver and records it.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    signature: Signature,
    duration: Duration,
    log: Arc<Mutex<Vec<Maneuver>>>,
    failing: Arc<Mutex<bool>>,
}

impl SimulatedDriver {
    pub fn new(signature: Signature, duration: Duration) -> Self {
        Self {
            signature,
            duration,
            log: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    /// Maneuvers executed so far, oldest first.
    pub fn maneuvers(&self) -> Vec<Maneuver> {
        self.log.lock().clone()
    }

    /// Makes every following maneuver fail after it ran.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    async fn perform(&self, maneuver: Maneuver) -> Result<(), DriverError> {
        info!(agent = %self.signature, maneuver = maneuver.name(), "Simulating maneuver");
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        let name = maneuver.name();
        self.log.lock().push(maneuver);

        if *self.failing.lock() {
            return Err(DriverError::ManeuverFailed {
                maneuver: name,
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    async fn enter(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::Enter).await
    }

    async fn leave(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::Leave).await
    }

    async fn search(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::Search).await
    }

    async fn follow_road(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::FollowRoad).await
    }

    async fn manual(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::Manual).await
    }

    async fn create_space(&self, leaving: &Signature) -> Result<(), DriverError> {
        self.perform(Maneuver::CreateSpace(leaving.clone())).await
    }

    async fn move_up(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::MoveUp).await
    }

    async fn move_back(&self) -> Result<(), DriverError> {
        self.perform(Maneuver::MoveBack).await
    }
}
