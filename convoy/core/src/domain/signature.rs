// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity and Protocol Time
//!
//! - [`Signature`]: opaque, stable agent identifier.
//! - [`Timestamp`]: unix-epoch seconds as carried on the wire, totally ordered.
//! - [`Clock`]: source of timestamps ([`SystemClock`], [`ManualClock`]).
//!
//! Agents compare timestamps produced by different wall clocks. Roughly
//! synchronized clocks are assumed, never verified.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque unique identifier of an agent (one vehicle).
///
/// Ordered lexicographically; the order breaks ties between equally
/// timestamped global action claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Signature {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Signature {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Signature {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Seconds since the unix epoch.
///
/// Kept as the raw `f64` the wire carries so that a timestamp survives an
/// encode/decode cycle bit-for-bit. Equality and ordering use
/// [`f64::total_cmp`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub const fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> f64 {
        self.0
    }

    /// Current wall-clock time with microsecond resolution.
    pub fn now() -> Self {
        let micros = chrono::Utc::now().timestamp_micros();
        Self(micros as f64 / 1_000_000.0)
    }

    /// Returns `self + duration`.
    pub fn offset(self, duration: Duration) -> Self {
        Self(self.0 + duration.as_secs_f64())
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// Source of protocol timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Settable clock for simulations and tests.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        *self.now.lock() = timestamp;
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = now.offset(duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_orders_lexicographically() {
        assert!(Signature::from("a") < Signature::from("b"));
        assert!(Signature::from("agent-10") < Signature::from("agent-2"));
    }

    #[test]
    fn test_timestamp_total_order() {
        let early = Timestamp::from_secs(100.0);
        let late = Timestamp::from_secs(100.3);
        assert!(early < late);
        assert_eq!(early, Timestamp::from_secs(100.0));
        assert_eq!(early.max(late), late);
    }

    #[test]
    fn test_timestamp_wire_format_is_bare_float() {
        let json = serde_json::to_string(&Timestamp::from_secs(1700000000.25)).unwrap();
        assert_eq!(json, "1700000000.25");
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(Timestamp::from_secs(5.0));
        let other = clock.clone();
        clock.advance(Duration::from_millis(500));
        assert_eq!(other.now(), Timestamp::from_secs(5.5));
        other.set(Timestamp::from_secs(1.0));
        assert_eq!(clock.now(), Timestamp::from_secs(1.0));
    }
}
