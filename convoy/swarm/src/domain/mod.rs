// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Arbitration Domain Layer
//!
//! Pure types for global action arbitration. No I/O besides the driver
//! dispatch table.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`action`] | `Action`, `ActionMode`, `Reaction`, `choose` |

pub mod action;

pub use action::*;
