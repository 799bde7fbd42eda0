// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! Formation Updater - Background task re-publishing this agent's relation
//!
//! Updates are frequent while the formation moves and back off exponentially
//! once it is stable. Paused while a maneuver runs.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drives [`FormationService::refresh`] on a stabilized schedule

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::formation_service::FormationService;
use crate::domain::node_config::UpdaterConfig;

/// Delay schedule `min(max, min * exp(k * ln(max / min) / steps))`, where
/// `k` counts consecutive cycles without a formation change.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizedSchedule {
    min_delay: Duration,
    max_delay: Duration,
    steps: u32,
}

impl StabilizedSchedule {
    pub fn new(min_delay: Duration, max_delay: Duration, steps: u32) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            steps: steps.max(1),
        }
    }

    pub fn delay(&self, stable_cycles: u32) -> Duration {
        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        if min <= 0.0 || stable_cycles == 0 {
            return self.min_delay;
        }
        if stable_cycles >= self.steps {
            return self.max_delay;
        }

        let exponent = f64::from(stable_cycles) * (max / min).ln() / f64::from(self.steps);
        Duration::from_secs_f64((min * exponent.exp()).min(max))
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

impl From<&UpdaterConfig> for StabilizedSchedule {
    fn from(config: &UpdaterConfig) -> Self {
        Self::new(config.min_delay, config.max_delay, config.steps)
    }
}

impl Default for StabilizedSchedule {
    fn default() -> Self {
        Self::from(&UpdaterConfig::default())
    }
}

/// Shared "a maneuver is running" flag.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct ManeuverGate {
    paused: Arc<AtomicBool>,
}

impl ManeuverGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub struct FormationUpdater {
    service: Arc<FormationService>,
    schedule: StabilizedSchedule,
    gate: ManeuverGate,
}

impl FormationUpdater {
    pub fn new(service: Arc<FormationService>, schedule: StabilizedSchedule, gate: ManeuverGate) -> Self {
        Self {
            service,
            schedule,
            gate,
        }
    }

    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            agent = %self.service.signature(),
            min_delay = ?self.schedule.min_delay,
            max_delay = ?self.schedule.max_delay,
            "Starting formation updater"
        );

        let mut stable_cycles: u32 = 0;
        loop {
            let delay = if self.gate.is_paused() {
                debug!("Maneuver running, formation update skipped");
                self.schedule.min_delay
            } else {
                match self.service.refresh().await {
                    Ok(true) => stable_cycles = 0,
                    Ok(false) => stable_cycles = stable_cycles.saturating_add(1).min(self.schedule.steps),
                    Err(e) => warn!("Formation update failed: {}", e),
                }
                self.schedule.delay(stable_cycles)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping formation updater");
                    break;
                }
            }
        }
    }
}
