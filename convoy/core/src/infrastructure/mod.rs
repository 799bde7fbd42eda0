// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod http_transport;
pub mod message_bus;
pub mod simulation;

pub use message_bus::{BusError, InMemoryBroker, Inbox, MessageBus, Subscriptions, Transport};
