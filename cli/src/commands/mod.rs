// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the parknet CLI

pub mod config;
pub mod run;
pub mod simulate;

pub use self::config::ConfigCommand;
pub use self::run::RunArgs;
pub use self::simulate::SimulateArgs;
