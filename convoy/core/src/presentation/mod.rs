// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`parknet-core`)
//!
//! HTTP surface of a networked agent node. No protocol logic lives here; the
//! gateway hands envelopes to the local broker and reads status from the
//! application layer.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Message ingress, health and formation diagnostics |

pub mod api;
