// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! Formation members and the relation facts agents gossip about them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::domain::signature::{Signature, Timestamp};

/// A vehicle taking part in a formation.
///
/// Equality and hashing consider the signature only, so two snapshots of the
/// same vehicle compare equal even if its filing state differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub signature: Signature,
    /// Half of the vehicle length in cm.
    pub delta: f64,
    /// When the vehicle announced its intent to leave its slot. The key is
    /// required on the wire; `null` means not filing.
    #[serde(deserialize_with = "Option::deserialize")]
    pub filing: Option<Timestamp>,
}

impl Member {
    pub fn new(signature: impl Into<Signature>, delta: f64) -> Self {
        Self {
            signature: signature.into(),
            delta,
            filing: None,
        }
    }

    pub fn with_filing(mut self, filing: Option<Timestamp>) -> Self {
        self.filing = filing;
        self
    }

    pub fn is_filing(&self) -> bool {
        self.filing.is_some()
    }

    /// Field-wise comparison, unlike `==` which only looks at the signature.
    pub fn same_state(&self, other: &Member) -> bool {
        self.signature == other.signature
            && self.delta.total_cmp(&other.delta).is_eq()
            && self.filing == other.filing
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent[#{}, delta: {}cm]", self.signature, self.delta)
    }
}

/// One agent's self-reported fact: "I am `member`, and directly ahead of me
/// is `ahead_signature`".
///
/// `ahead_signature` is `None` exactly when the neighbor sensor sees nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRelation {
    pub member: Member,
    #[serde(deserialize_with = "Option::deserialize")]
    pub ahead_signature: Option<Signature>,
}

impl MemberRelation {
    pub fn new(member: Member, ahead_signature: Option<Signature>) -> Self {
        Self {
            member,
            ahead_signature,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.member.signature
    }
}
