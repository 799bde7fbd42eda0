// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Action Manager
//!
//! Leaderless mutual exclusion over coordinated maneuvers. An agent turns the
//! intent at the front of its local queue into a provisional claim, broadcasts
//! it, and waits `wait_first_in_queue`. If no earlier claim displaced it in the
//! meantime, the agent owns the global action and may act.
//!
//! Three independently timed loops share one state object:
//!
//! | Loop | Period | Step |
//! |------|--------|------|
//! | broadcast | `wait_send_global` | [`ActionManager::broadcast_cycle`] |
//! | arbitration | `wait_check_permission` | [`ActionManager::arbitration_cycle`] |
//! | act | `wait_act` when idle | [`ActionManager::act_cycle`] |
//!
//! Inbound claims, completions and `process-finished` notices are applied by
//! the `receive_*` handlers. The state lock is never held across a driver
//! call, a sleep or a broadcast.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parknet_core::application::formation_updater::ManeuverGate;
use parknet_core::domain::collaborators::{Driver, DriverError};
use parknet_core::domain::message::{DecodeError, Envelope, Topic};
use parknet_core::domain::node_config::ArbitrationConfig;
use parknet_core::domain::signature::{Clock, Signature};
use parknet_core::infrastructure::message_bus::MessageBus;

use crate::domain::action::{choose, Action, ActionMode, Reaction};

/// Result of one arbitration step.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbitrationOutcome {
    /// Nothing to claim, or a global action is already in place.
    Idle,
    /// The claim survived; the agent may act.
    Won(Action),
    /// The claim was displaced. The intent stays queued.
    Lost { ours: Action, winner: Option<Action> },
}

/// Result of one act step.
#[derive(Debug, Clone, PartialEq)]
pub enum ActOutcome {
    Idle,
    /// A won global action was executed and its completion broadcast.
    Performed(Action),
    /// A bypass intent was executed without arbitration.
    Bypassed(Action),
    /// Reacted to a peer's global action.
    Reacted { to: Action, reaction: Reaction },
}

/// Lifecycle hooks around the maneuvers this agent performs.
#[async_trait]
pub trait ManeuverObserver: Send + Sync {
    async fn on_maneuver_start(&self, action: &Action);
    async fn on_maneuver_complete(&self, action: &Action, result: &Result<(), DriverError>);

    async fn on_reaction(&self, _to: &Action, _reaction: &Reaction) {}
}

#[derive(Default)]
struct ArbitrationState {
    /// Unarbitrated intents, stamped with their registration time.
    local_actions: VecDeque<Action>,
    global_action: Option<Action>,
    /// The claim this agent won and has not performed yet.
    verified: Option<Action>,
    /// Last local instant a peer-owned `global_action` was confirmed.
    confirmed_at: Option<Instant>,
    /// Last peer claim a reaction ran for.
    reacted_to: Option<Action>,
    /// Leaving agents this agent created space for.
    spaced_for: HashSet<Signature>,
}

pub struct ActionManager {
    signature: Signature,
    clock: Arc<dyn Clock>,
    bus: MessageBus,
    driver: Arc<dyn Driver>,
    timing: ArbitrationConfig,
    gate: ManeuverGate,
    observer: Option<Arc<dyn ManeuverObserver>>,
    state: Mutex<ArbitrationState>,
}

impl ActionManager {
    pub fn new(bus: MessageBus, driver: Arc<dyn Driver>, timing: ArbitrationConfig, gate: ManeuverGate) -> Self {
        Self {
            signature: bus.signature().clone(),
            clock: bus.clock().clone(),
            bus,
            driver,
            timing,
            gate,
            observer: None,
            state: Mutex::new(ArbitrationState::default()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ManeuverObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn timing(&self) -> &ArbitrationConfig {
        &self.timing
    }

    /// Queues an intent to perform `mode`.
    pub async fn append(&self, mode: ActionMode) -> Action {
        let intent = Action::new(self.signature.clone(), mode, self.clock.now());
        debug!(intent = %intent, "Intent queued");
        self.state.lock().await.local_actions.push_back(intent.clone());
        intent
    }

    /// Drops every queued intent of `mode`. Never touches the global action.
    pub async fn remove(&self, mode: ActionMode) -> usize {
        let mut state = self.state.lock().await;
        let before = state.local_actions.len();
        state.local_actions.retain(|intent| intent.mode != mode);
        before - state.local_actions.len()
    }

    pub async fn local_actions(&self) -> Vec<Action> {
        self.state.lock().await.local_actions.iter().cloned().collect()
    }

    pub async fn global_action(&self) -> Option<Action> {
        self.state.lock().await.global_action.clone()
    }

    pub async fn is_verified(&self) -> bool {
        self.state.lock().await.verified.is_some()
    }

    /// Re-broadcasts the global action if this agent owns it.
    pub async fn broadcast_cycle(&self) -> Option<Action> {
        let owned = {
            let state = self.state.lock().await;
            state
                .global_action
                .clone()
                .filter(|action| action.is_owner(&self.signature))
        };

        if let Some(action) = &owned {
            let _ = self.bus.publish(Topic::ActiveGlobal, action).await;
        }
        owned
    }

    /// Claims the front intent if it needs coordination and nothing is
    /// claimed yet, then checks after `wait_first_in_queue` whether the claim
    /// survived.
    pub async fn arbitration_cycle(&self) -> ArbitrationOutcome {
        let (intent, ours) = {
            let mut state = self.state.lock().await;
            self.expire_stale_claim(&mut state);

            if state.verified.is_some() || state.global_action.is_some() {
                return ArbitrationOutcome::Idle;
            }
            let Some(intent) = state.local_actions.front().cloned() else {
                return ArbitrationOutcome::Idle;
            };
            if !intent.mode.requires_coordination() {
                return ArbitrationOutcome::Idle;
            }

            let ours = Action::new(self.signature.clone(), intent.mode, self.clock.now());
            state.global_action = Some(ours.clone());
            state.confirmed_at = None;
            (intent, ours)
        };

        debug!(claim = %ours, "Claiming global action");
        let _ = self.bus.publish(Topic::ActiveGlobal, &ours).await;
        tokio::time::sleep(self.timing.wait_first_in_queue).await;

        let mut state = self.state.lock().await;
        if state.global_action.as_ref() == Some(&ours) {
            if let Some(index) = state.local_actions.iter().position(|queued| queued == &intent) {
                state.local_actions.remove(index);
            }
            state.verified = Some(ours.clone());
            metrics::counter!("parknet_arbitration_outcomes_total", "outcome" => "won").increment(1);
            info!(action = %ours, "Global action granted");
            ArbitrationOutcome::Won(ours)
        } else {
            let winner = state.global_action.clone();
            metrics::counter!("parknet_arbitration_outcomes_total", "outcome" => "lost").increment(1);
            match &winner {
                Some(winner) => info!(ours = %ours, winner = %winner, "Claim displaced, intent stays queued"),
                None => info!(ours = %ours, "Claim cleared before verification, intent stays queued"),
            }
            ArbitrationOutcome::Lost { ours, winner }
        }
    }

    /// Performs a won action, executes a bypass intent, or reacts to a
    /// peer's global action.
    pub async fn act_cycle(&self) -> ActOutcome {
        enum Step {
            Perform(Action),
            Bypass(Action),
            React(Action, Reaction),
            Idle,
        }

        let step = {
            let mut state = self.state.lock().await;
            self.expire_stale_claim(&mut state);

            if let Some(won) = state.verified.clone() {
                Step::Perform(won)
            } else if state
                .local_actions
                .front()
                .is_some_and(|intent| !intent.mode.requires_coordination())
            {
                match state.local_actions.pop_front() {
                    Some(intent) => Step::Bypass(intent),
                    None => Step::Idle,
                }
            } else {
                match state.global_action.clone() {
                    Some(global)
                        if !global.is_owner(&self.signature) && state.reacted_to.as_ref() != Some(&global) =>
                    {
                        state.reacted_to = Some(global.clone());
                        let reaction = global.reaction();
                        Step::React(global, reaction)
                    }
                    _ => Step::Idle,
                }
            }
        };

        match step {
            Step::Perform(action) => {
                self.perform(&action).await;
                ActOutcome::Performed(action)
            }
            Step::Bypass(intent) => {
                info!(mode = %intent.mode, "Executing intent without arbitration");
                if let Err(e) = self.maneuver(&intent).await {
                    warn!(mode = %intent.mode, "Maneuver failed: {}", e);
                }
                ActOutcome::Bypassed(intent)
            }
            Step::React(to, reaction) => {
                self.react(&to, &reaction).await;
                ActOutcome::Reacted { to, reaction }
            }
            Step::Idle => ActOutcome::Idle,
        }
    }

    async fn maneuver(&self, action: &Action) -> Result<(), DriverError> {
        self.gate.pause();
        if let Some(observer) = &self.observer {
            observer.on_maneuver_start(action).await;
        }
        let result = action.mode.perform(self.driver.as_ref()).await;
        self.gate.resume();
        if let Some(observer) = &self.observer {
            observer.on_maneuver_complete(action, &result).await;
        }
        result
    }

    async fn perform(&self, action: &Action) {
        info!(action = %action, "Executing global action");
        if let Err(e) = self.maneuver(action).await {
            // Completion is broadcast anyway; peers must not wait on a dead claim.
            warn!(action = %action, "Global action failed: {}", e);
        }

        {
            let mut state = self.state.lock().await;
            state.verified = None;
            state.global_action = None;
            state.confirmed_at = None;
        }

        let _ = self.bus.publish(Topic::CompletedGlobal, &serde_json::Value::Null).await;
        if action.mode == ActionMode::Leave {
            let _ = self.bus.publish(Topic::ProcessFinished, &self.signature).await;
        }
    }

    async fn react(&self, to: &Action, reaction: &Reaction) {
        if let Some(observer) = &self.observer {
            observer.on_reaction(to, reaction).await;
        }

        let Reaction::CreateSpace(leaving) = reaction else {
            debug!(action = %to, "Idling while peer acts");
            return;
        };

        info!(leaving = %leaving, "Creating space");
        self.gate.pause();
        let result = reaction.perform(self.driver.as_ref()).await;
        self.gate.resume();

        match result {
            Ok(()) => {
                self.state.lock().await.spaced_for.insert(leaving.clone());
            }
            Err(e) => warn!(leaving = %leaving, "Failed to create space: {}", e),
        }
    }

    /// Applies a peer's claim or heartbeat: the foremost claim wins.
    pub async fn receive_global_action(&self, envelope: &Envelope) -> Result<(), DecodeError> {
        let incoming: Action = envelope.content_as("action")?;

        let mut state = self.state.lock().await;
        let previous = state.global_action.take();
        let chosen = choose(previous.clone(), Some(incoming.clone()));

        if chosen.as_ref() == Some(&incoming) && !incoming.is_owner(&self.signature) {
            state.confirmed_at = Some(Instant::now());
        }
        if previous != chosen {
            debug!(
                previous = ?previous.as_ref().map(ToString::to_string),
                current = ?chosen.as_ref().map(ToString::to_string),
                "Global action changed"
            );
        }
        state.global_action = chosen;
        Ok(())
    }

    /// The owner finished: clears the global action, whatever it is.
    pub async fn receive_completion(&self, envelope: &Envelope) {
        let mut state = self.state.lock().await;
        if let Some(cleared) = state.global_action.take() {
            debug!(from = %envelope.sender, cleared = %cleared, "Global action completed");
        }
        state.confirmed_at = None;
    }

    /// A leave finished. Agents that made room for the leaver queue a
    /// move-up to close the gap. Returns the queued intent, if any.
    pub async fn receive_process_finished(&self, envelope: &Envelope) -> Result<Option<Action>, DecodeError> {
        let leaver: Signature = envelope.content_as("signature")?;
        let spaced = self.state.lock().await.spaced_for.remove(&leaver);
        if !spaced {
            return Ok(None);
        }

        info!(leaver = %leaver, "Leave finished, closing the gap");
        Ok(Some(self.append(ActionMode::MoveUp).await))
    }

    /// Drops a peer claim that was not confirmed within `claim_timeout`.
    /// Own claims never expire.
    fn expire_stale_claim(&self, state: &mut ArbitrationState) {
        let Some(global) = &state.global_action else { return };
        if global.is_owner(&self.signature) {
            return;
        }

        let timeout = self.timing.claim_timeout();
        let stale = match state.confirmed_at {
            Some(confirmed_at) => confirmed_at.elapsed() > timeout,
            None => true,
        };
        if stale {
            warn!(action = %global, timeout = ?timeout, "Discarding unconfirmed global action");
            state.global_action = None;
            state.confirmed_at = None;
        }
    }

    /// Spawns the broadcast, arbitration and act loops.
    pub fn spawn_loops(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().broadcast_loop(shutdown.clone())),
            tokio::spawn(self.clone().arbitration_loop(shutdown.clone())),
            tokio::spawn(self.clone().act_loop(shutdown)),
        ]
    }

    async fn broadcast_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.timing.wait_send_global);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.broadcast_cycle().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!(agent = %self.signature, "Broadcast loop stopped");
    }

    async fn arbitration_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                outcome = self.arbitration_cycle() => {
                    if outcome != ArbitrationOutcome::Idle {
                        debug!(outcome = ?outcome, "Arbitration step finished");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.wait_check_permission) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        debug!(agent = %self.signature, "Arbitration loop stopped");
    }

    async fn act_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                outcome = self.act_cycle() => outcome,
                _ = shutdown.cancelled() => break,
            };
            if outcome != ActOutcome::Idle {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.wait_act) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        debug!(agent = %self.signature, "Act loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parknet_core::domain::signature::{ManualClock, Timestamp};
    use parknet_core::infrastructure::message_bus::{InMemoryBroker, Inbox};
    use parknet_core::infrastructure::simulation::{Maneuver, SimulatedDriver};
    use std::time::Duration;

    fn timing() -> ArbitrationConfig {
        ArbitrationConfig {
            wait_send_global: Duration::from_millis(20),
            wait_check_permission: Duration::from_millis(10),
            wait_first_in_queue: Duration::from_millis(50),
            wait_act: Duration::from_millis(10),
            claim_timeout: Some(Duration::from_millis(100)),
        }
    }

    fn manager(broker: &InMemoryBroker, signature: &str, t: f64) -> (Arc<ActionManager>, SimulatedDriver, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_secs(t));
        let bus = MessageBus::new(Signature::from(signature), Arc::new(clock.clone()), Arc::new(broker.transport()));
        let driver = SimulatedDriver::new(Signature::from(signature), Duration::ZERO);
        let manager = ActionManager::new(bus, Arc::new(driver.clone()), timing(), ManeuverGate::new());
        (Arc::new(manager), driver, clock)
    }

    fn claim(owner: &str, mode: ActionMode, t: f64) -> Envelope {
        let action = Action::new(Signature::from(owner), mode, Timestamp::from_secs(t));
        Envelope::new(
            Signature::from(owner),
            Topic::ActiveGlobal,
            serde_json::to_value(action).unwrap(),
            Timestamp::from_secs(t),
        )
    }

    async fn next_on(inbox: &mut Inbox, topic: Topic) -> Envelope {
        loop {
            let envelope = inbox.recv().await.unwrap();
            if envelope.topic() == Some(topic) {
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn test_append_and_remove() {
        let broker = InMemoryBroker::new(16);
        let (manager, _, _) = manager(&broker, "a", 1.0);

        manager.append(ActionMode::Leave).await;
        manager.append(ActionMode::Search).await;
        manager.append(ActionMode::Leave).await;
        assert_eq!(manager.remove(ActionMode::Leave).await, 2);

        let queued: Vec<ActionMode> = manager.local_actions().await.iter().map(|a| a.mode).collect();
        assert_eq!(queued, vec![ActionMode::Search]);
        assert_eq!(manager.global_action().await, None);
    }

    #[tokio::test]
    async fn test_uncontested_claim_wins_and_is_performed() {
        let broker = InMemoryBroker::new(32);
        let mut inbox = broker.subscribe();
        let (manager, driver, _) = manager(&broker, "a", 10.0);

        manager.append(ActionMode::Enter).await;
        let outcome = manager.arbitration_cycle().await;
        let ArbitrationOutcome::Won(won) = outcome else {
            panic!("expected a win, got {outcome:?}");
        };
        assert_eq!(won.mode, ActionMode::Enter);
        assert!(manager.is_verified().await);
        assert!(manager.local_actions().await.is_empty());

        assert_eq!(manager.act_cycle().await, ActOutcome::Performed(won));
        assert!(!manager.is_verified().await);
        assert_eq!(manager.global_action().await, None);
        assert_eq!(driver.maneuvers(), vec![Maneuver::Enter]);

        next_on(&mut inbox, Topic::ActiveGlobal).await;
        next_on(&mut inbox, Topic::CompletedGlobal).await;
    }

    #[tokio::test]
    async fn test_failed_maneuver_still_completes() {
        let broker = InMemoryBroker::new(32);
        let mut inbox = broker.subscribe();
        let (manager, driver, _) = manager(&broker, "a", 20.0);
        driver.set_failing(true);

        manager.append(ActionMode::Leave).await;
        let ArbitrationOutcome::Won(won) = manager.arbitration_cycle().await else {
            panic!("expected an uncontested win");
        };

        assert_eq!(manager.act_cycle().await, ActOutcome::Performed(won));
        assert_eq!(driver.maneuvers(), vec![Maneuver::Leave]);
        assert!(!manager.is_verified().await);
        assert_eq!(manager.global_action().await, None);

        next_on(&mut inbox, Topic::CompletedGlobal).await;
        let finished = next_on(&mut inbox, Topic::ProcessFinished).await;
        assert_eq!(finished.content_as::<Signature>("signature").unwrap(), Signature::from("a"));
    }

    #[tokio::test]
    async fn test_earlier_peer_claim_displaces_ours() {
        let broker = InMemoryBroker::new(32);
        let (manager, _, _) = manager(&broker, "b", 100.3);
        manager.append(ActionMode::Leave).await;

        let contender = manager.clone();
        let cycle = tokio::spawn(async move { contender.arbitration_cycle().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.receive_global_action(&claim("a", ActionMode::Leave, 100.0)).await.unwrap();

        match cycle.await.unwrap() {
            ArbitrationOutcome::Lost { ours, winner } => {
                assert!(ours.is_owner(&Signature::from("b")));
                assert_eq!(winner.map(|w| w.owner), Some(Signature::from("a")));
            }
            other => panic!("expected a loss, got {other:?}"),
        }
        assert!(!manager.is_verified().await);
        assert_eq!(manager.local_actions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_later_peer_claim_is_ignored() {
        let broker = InMemoryBroker::new(32);
        let (manager, _, _) = manager(&broker, "a", 100.0);
        manager.append(ActionMode::Leave).await;

        let contender = manager.clone();
        let cycle = tokio::spawn(async move { contender.arbitration_cycle().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.receive_global_action(&claim("b", ActionMode::Leave, 100.3)).await.unwrap();

        assert!(matches!(cycle.await.unwrap(), ArbitrationOutcome::Won(_)));
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let broker = InMemoryBroker::new(16);
        let (manager, _, _) = manager(&broker, "a", 1.0);
        let done = Envelope::new(Signature::from("b"), Topic::CompletedGlobal, serde_json::Value::Null, Timestamp::from_secs(1.0));

        manager.receive_completion(&done).await;
        assert_eq!(manager.global_action().await, None);

        manager.receive_global_action(&claim("b", ActionMode::Enter, 0.5)).await.unwrap();
        assert!(manager.global_action().await.is_some());
        manager.receive_completion(&done).await;
        manager.receive_completion(&done).await;
        assert_eq!(manager.global_action().await, None);
    }

    #[tokio::test]
    async fn test_reacts_once_to_peer_leave() {
        let broker = InMemoryBroker::new(32);
        let (manager, driver, _) = manager(&broker, "b", 5.0);

        let leave = claim("a", ActionMode::Leave, 4.0);
        manager.receive_global_action(&leave).await.unwrap();
        assert_eq!(
            manager.act_cycle().await,
            ActOutcome::Reacted {
                to: Action::new(Signature::from("a"), ActionMode::Leave, Timestamp::from_secs(4.0)),
                reaction: Reaction::CreateSpace(Signature::from("a")),
            }
        );
        // Heartbeat of the same claim.
        manager.receive_global_action(&leave).await.unwrap();
        assert_eq!(manager.act_cycle().await, ActOutcome::Idle);
        assert_eq!(driver.maneuvers(), vec![Maneuver::CreateSpace(Signature::from("a"))]);

        let finished = Envelope::new(
            Signature::from("a"),
            Topic::ProcessFinished,
            serde_json::json!("a"),
            Timestamp::from_secs(6.0),
        );
        let queued = manager.receive_process_finished(&finished).await.unwrap();
        assert_eq!(queued.map(|a| a.mode), Some(ActionMode::MoveUp));
        // Only once per leaver.
        assert_eq!(manager.receive_process_finished(&finished).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bypass_intent_runs_without_claim() {
        let broker = InMemoryBroker::new(16);
        let (manager, driver, _) = manager(&broker, "a", 1.0);

        manager.append(ActionMode::Search).await;
        assert_eq!(manager.arbitration_cycle().await, ArbitrationOutcome::Idle);
        assert!(matches!(manager.act_cycle().await, ActOutcome::Bypassed(_)));
        assert_eq!(manager.global_action().await, None);
        assert_eq!(driver.maneuvers(), vec![Maneuver::Search]);
    }

    #[tokio::test]
    async fn test_unconfirmed_peer_claim_expires() {
        let broker = InMemoryBroker::new(16);
        let (manager, _, _) = manager(&broker, "b", 1.0);

        manager.receive_global_action(&claim("a", ActionMode::Enter, 0.5)).await.unwrap();
        manager.append(ActionMode::Enter).await;
        assert_eq!(manager.arbitration_cycle().await, ArbitrationOutcome::Idle);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(manager.arbitration_cycle().await, ArbitrationOutcome::Won(_)));
    }

    #[tokio::test]
    async fn test_malformed_claim_is_a_decode_error() {
        let broker = InMemoryBroker::new(16);
        let (manager, _, _) = manager(&broker, "b", 1.0);
        let envelope = Envelope::new(
            Signature::from("a"),
            Topic::ActiveGlobal,
            serde_json::json!({"mode": "parking/leave", "timestamp": 1.0}),
            Timestamp::from_secs(1.0),
        );
        assert!(manager.receive_global_action(&envelope).await.is_err());
        assert_eq!(manager.global_action().await, None);
    }
}
