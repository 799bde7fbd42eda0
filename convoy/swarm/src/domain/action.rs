// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Actions and Reactions
//!
//! - [`ActionMode`]: fixed set of maneuvers, each with a coordination class.
//! - [`Action`]: a claim on a maneuver, totally ordered by
//!   `(timestamp, owner)`.
//! - [`Reaction`]: what an agent does while a peer owns the global action.
//!
//! ## Coordination Classes
//!
//! | Mode | Wire name | Class | Peer reaction |
//! |------|-----------|-------|---------------|
//! | `Enter` | `parking/enter` | coordinated | idle |
//! | `Leave` | `parking/leave` | coordinated | create space |
//! | `Manual` | `drive/manual` | coordinated | idle |
//! | `MoveUp` | `react/move-up` | coordinated | idle |
//! | `MoveBack` | `react/move-back` | coordinated | idle |
//! | `Search` | `parking/search` | bypass | - |
//! | `FollowRoad` | `drive/follow-road` | bypass | - |
//! | `Standby` | `parking/standby` | bypass | - |
//!
//! Coordinated modes go through arbitration, only one agent of the convoy
//! performs one at a time. Bypass modes are executed locally right away.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use parknet_core::domain::collaborators::{Driver, DriverError};
use parknet_core::domain::signature::{Signature, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ActionMode {
    #[serde(rename = "parking/enter")]
    Enter,
    #[serde(rename = "parking/leave")]
    Leave,
    #[serde(rename = "parking/search")]
    Search,
    #[serde(rename = "parking/standby")]
    Standby,
    #[serde(rename = "drive/follow-road")]
    FollowRoad,
    #[default]
    #[serde(rename = "drive/manual")]
    Manual,
    #[serde(rename = "react/move-up")]
    MoveUp,
    #[serde(rename = "react/move-back")]
    MoveBack,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action mode '{0}'")]
pub struct UnknownModeError(pub String);

impl ActionMode {
    pub const ALL: [ActionMode; 8] = [
        ActionMode::Enter,
        ActionMode::Leave,
        ActionMode::Search,
        ActionMode::Standby,
        ActionMode::FollowRoad,
        ActionMode::Manual,
        ActionMode::MoveUp,
        ActionMode::MoveBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMode::Enter => "parking/enter",
            ActionMode::Leave => "parking/leave",
            ActionMode::Search => "parking/search",
            ActionMode::Standby => "parking/standby",
            ActionMode::FollowRoad => "drive/follow-road",
            ActionMode::Manual => "drive/manual",
            ActionMode::MoveUp => "react/move-up",
            ActionMode::MoveBack => "react/move-back",
        }
    }

    pub fn requires_coordination(&self) -> bool {
        matches!(
            self,
            ActionMode::Enter | ActionMode::Leave | ActionMode::Manual | ActionMode::MoveUp | ActionMode::MoveBack
        )
    }

    /// Runs the driver primitive of this mode. Blocks until the maneuver is
    /// done.
    pub async fn perform(&self, driver: &dyn Driver) -> Result<(), DriverError> {
        match self {
            ActionMode::Enter => driver.enter().await,
            ActionMode::Leave => driver.leave().await,
            ActionMode::Search => driver.search().await,
            ActionMode::Standby => Ok(()),
            ActionMode::FollowRoad => driver.follow_road().await,
            ActionMode::Manual => driver.manual().await,
            ActionMode::MoveUp => driver.move_up().await,
            ActionMode::MoveBack => driver.move_back().await,
        }
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownModeError(s.to_string()))
    }
}

/// A claim by `owner` to perform `mode`.
///
/// As a claim, `timestamp` is read when the claim is made. Queued intents
/// carry their registration time instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub mode: ActionMode,
    #[serde(rename = "agent")]
    pub owner: Signature,
    pub timestamp: Timestamp,
}

impl Action {
    pub fn new(owner: Signature, mode: ActionMode, timestamp: Timestamp) -> Self {
        Self { mode, owner, timestamp }
    }

    pub fn is_owner(&self, signature: &Signature) -> bool {
        &self.owner == signature
    }

    pub fn reaction(&self) -> Reaction {
        Reaction::to(self)
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.owner.cmp(&other.owner))
            .then_with(|| self.mode.cmp(&other.mode))
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action[#{} : {} ({})]", self.owner, self.mode, self.timestamp)
    }
}

/// The foremost of two claims. A missing claim never wins against a present
/// one.
pub fn choose(current: Option<Action>, incoming: Option<Action>) -> Option<Action> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Fixed reaction of an agent to a peer's global action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Make room so the owner can pull out of its slot.
    CreateSpace(Signature),
    Idle,
}

impl Reaction {
    pub fn to(action: &Action) -> Self {
        match action.mode {
            ActionMode::Leave => Reaction::CreateSpace(action.owner.clone()),
            _ => Reaction::Idle,
        }
    }

    pub async fn perform(&self, driver: &dyn Driver) -> Result<(), DriverError> {
        match self {
            Reaction::CreateSpace(leaving) => driver.create_space(leaving).await,
            Reaction::Idle => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(owner: &str, mode: ActionMode, t: f64) -> Action {
        Action::new(Signature::from(owner), mode, Timestamp::from_secs(t))
    }

    #[test]
    fn test_choose_earliest_then_smallest_signature() {
        let a = action("a", ActionMode::Leave, 5.0);
        let b = action("b", ActionMode::Enter, 5.0);
        assert_eq!(choose(Some(b.clone()), Some(a.clone())), Some(a.clone()));
        assert_eq!(choose(Some(a.clone()), Some(b.clone())), Some(a.clone()));

        let early = action("z", ActionMode::Enter, 4.9);
        assert_eq!(choose(Some(a.clone()), Some(early.clone())), Some(early));
    }

    #[test]
    fn test_choose_with_missing_claim() {
        let x = action("x", ActionMode::Manual, 1.0);
        assert_eq!(choose(Some(x.clone()), None), Some(x.clone()));
        assert_eq!(choose(None, Some(x.clone())), Some(x));
        assert_eq!(choose(None, None), None);
    }

    #[test]
    fn test_action_wire_format() {
        let value = serde_json::to_value(action("a", ActionMode::Leave, 100.0)).unwrap();
        assert_eq!(value, json!({"mode": "parking/leave", "agent": "a", "timestamp": 100.0}));

        let missing_agent = json!({"mode": "parking/leave", "timestamp": 100.0});
        assert!(serde_json::from_value::<Action>(missing_agent).is_err());

        let unknown_mode = json!({"mode": "parking/teleport", "agent": "a", "timestamp": 1.0});
        assert!(serde_json::from_value::<Action>(unknown_mode).is_err());
    }

    #[test]
    fn test_mode_names_and_classes() {
        for mode in ActionMode::ALL {
            assert_eq!(mode.as_str().parse::<ActionMode>().unwrap(), mode);
            assert_eq!(serde_json::to_value(mode).unwrap(), json!(mode.as_str()));
        }
        let coordinated: Vec<ActionMode> = ActionMode::ALL
            .into_iter()
            .filter(ActionMode::requires_coordination)
            .collect();
        assert_eq!(
            coordinated,
            vec![
                ActionMode::Enter,
                ActionMode::Leave,
                ActionMode::Manual,
                ActionMode::MoveUp,
                ActionMode::MoveBack
            ]
        );
        assert_eq!(ActionMode::default(), ActionMode::Manual);
        assert!("parking/park".parse::<ActionMode>().is_err());
    }

    #[test]
    fn test_reaction_table() {
        assert_eq!(
            action("a", ActionMode::Leave, 1.0).reaction(),
            Reaction::CreateSpace(Signature::from("a"))
        );
        for mode in [ActionMode::Enter, ActionMode::Manual, ActionMode::MoveUp, ActionMode::MoveBack] {
            assert_eq!(action("a", mode, 1.0).reaction(), Reaction::Idle);
        }
    }
}
