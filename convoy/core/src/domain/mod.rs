// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer (`parknet-core`)
//!
//! Pure protocol types: identities and time, formation members, the relation
//! graph and the formation derived from it, the message envelope, collaborator
//! contracts and node configuration.

pub mod collaborators;
pub mod formation;
pub mod member;
pub mod message;
pub mod node_config;
pub mod relation_graph;
pub mod signature;
