// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod action_manager;
pub mod agent;

pub use action_manager::{ActOutcome, ActionManager, ArbitrationOutcome, ManeuverObserver};
pub use agent::{AgentHandle, AgentSettings, ConvoyAgent};
