// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! parknet CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers behind the `parknet` binary

pub mod commands;
