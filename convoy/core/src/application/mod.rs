// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod formation_service;
pub mod formation_updater;

pub use formation_service::FormationService;
pub use formation_updater::{FormationUpdater, ManeuverGate, StabilizedSchedule};
