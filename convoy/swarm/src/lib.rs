// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `parknet-swarm`: Global Action Arbitration
//!
//! Grants at most one agent of a convoy the right to perform a coordinated
//! maneuver (entering or leaving a slot, moving up or back) without a central
//! coordinator, using broadcast claims ordered by `(timestamp, signature)`.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Action`, `ActionMode`, `Reaction`, `choose` |
//! | [`application`] | Application | `ActionManager` loops, `ConvoyAgent` composition |
//!
//! ## Key Concepts
//!
//! - **Claim**: an `Action` broadcast on `action/active-global`. The foremost
//!   claim any agent has seen wins.
//! - **Verification**: a claim that survived `wait_first_in_queue` without
//!   being displaced grants the maneuver.
//! - **Reaction**: while a peer acts, every other agent runs the fixed
//!   reaction of that mode (make room for a leaver, or idle).
//!
//! Clocks of the agents are assumed to be roughly synchronized.

pub mod application;
pub mod domain;

pub use domain::*;
