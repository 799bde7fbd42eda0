// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # parknet-core
//!
//! Formation discovery for a convoy of parking agents, and the message bus
//! the agents gossip over.
//!
//! # Architecture
//!
//! - **Domain:** signatures, members, relation graph, formation, envelopes,
//!   collaborator contracts, configuration
//! - **Application:** formation service and its stabilized updater
//! - **Infrastructure:** message bus, transports, simulated collaborators
//! - **Presentation:** HTTP gateway

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
