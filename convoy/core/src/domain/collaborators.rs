// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! Contracts of the hardware-facing collaborators an agent consumes.
//!
//! The neighbor sensor (camera based identification of the vehicle ahead) and
//! the driver (motor control per maneuver) live outside this crate. Every
//! driver call returns only once the maneuver finished.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::signature::Signature;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Neighbor sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to identify the vehicle ahead: {0}")]
    Identification(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Maneuver '{maneuver}' failed: {reason}")]
    ManeuverFailed { maneuver: &'static str, reason: String },

    #[error("Maneuver '{0}' is not supported by this driver")]
    Unsupported(&'static str),
}

/// Front-neighbor lookup.
#[async_trait]
pub trait NeighborSensor: Send + Sync {
    /// Signature of the vehicle directly ahead, `None` when nothing is seen.
    async fn ahead_signature(&self) -> Result<Option<Signature>, SensorError>;
}

/// One blocking-until-complete operation per maneuver.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn enter(&self) -> Result<(), DriverError>;
    async fn leave(&self) -> Result<(), DriverError>;
    async fn search(&self) -> Result<(), DriverError>;
    async fn follow_road(&self) -> Result<(), DriverError>;
    async fn manual(&self) -> Result<(), DriverError>;

    /// Make room for `leaving` to pull out of its slot.
    async fn create_space(&self, leaving: &Signature) -> Result<(), DriverError>;

    async fn move_up(&self) -> Result<(), DriverError>;
    async fn move_back(&self) -> Result<(), DriverError>;
}
