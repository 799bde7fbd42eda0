// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Formation
//!
//! The local agent's view of the convoy: an ordered, front-to-back list of
//! members that always contains the local agent. It is derived from the
//! [`RelationGraph`] and never persisted.
//!
//! ## Resolution
//!
//! The formation is the longest maximal transitivity that contains the local
//! signature. Without one (no relations exchanged yet, or a torn view) the
//! agent falls back to a formation of itself alone.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::member::Member;
use crate::domain::relation_graph::RelationGraph;
use crate::domain::signature::Signature;

/// Protocol invariant violations.
///
/// Each one is fatal for the computation that raised it only. Callers fall
/// back to a singleton formation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormationError {
    #[error("Cycle detected while tracing a transitivity from #{start}: {trace:?}")]
    Cycle {
        start: Signature,
        trace: Vec<Signature>,
    },

    #[error("Agent #{0} is not a vertex of the relation graph")]
    UnknownVertex(Signature),

    #[error("Agent #{0} is not a member of the current formation")]
    NotAMember(Signature),
}

/// Spacing policy used by [`Formation::calc_gap`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapPolicy {
    /// Share of the longest half-length needed to pull out of a slot.
    #[serde(default = "default_gap_multiplier")]
    pub multiplier: f64,

    /// Safety distance each agent keeps, in cm.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            multiplier: default_gap_multiplier(),
            safety_margin: default_safety_margin(),
        }
    }
}

fn default_gap_multiplier() -> f64 {
    0.4
}

fn default_safety_margin() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize)]
pub struct Formation {
    members: Vec<Member>,
}

impl Formation {
    pub fn singleton(local: Member) -> Self {
        Self {
            members: vec![local],
        }
    }

    /// Resolves the formation containing `local` from `graph`.
    ///
    /// # Errors
    ///
    /// Propagates the [`FormationError`] raised while tracing transitivities.
    pub fn resolve(graph: &RelationGraph, local: &Member) -> Result<Self, FormationError> {
        let longest = graph
            .max_linear_transitivities()?
            .into_iter()
            .filter(|transitivity| transitivity.iter().any(|m| m.signature == local.signature))
            .max_by_key(Vec::len);

        Ok(match longest {
            Some(members) => Self { members },
            None => Self::singleton(local.clone()),
        })
    }

    /// Like [`Formation::resolve`], but a protocol violation degrades to the
    /// singleton formation.
    pub fn resolve_or_singleton(graph: &RelationGraph, local: &Member) -> Self {
        Self::resolve(graph, local).unwrap_or_else(|e| {
            warn!(signature = %local.signature, error = %e, "Formation unknown, acting as singleton");
            Self::singleton(local.clone())
        })
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// A resolved formation holds at least the local agent.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.members.iter().map(|m| m.signature.clone()).collect()
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.members.iter().any(|m| &m.signature == signature)
    }

    /// Index of `signature`, counted from the front.
    pub fn position(&self, signature: &Signature) -> Result<usize, FormationError> {
        self.members
            .iter()
            .position(|m| &m.signature == signature)
            .ok_or_else(|| FormationError::NotAMember(signature.clone()))
    }

    /// Largest half-length in the formation.
    pub fn delta_max(&self) -> f64 {
        self.members.iter().map(|m| m.delta).fold(0.0, f64::max)
    }

    /// Minimal gap each agent keeps so that the longest vehicle can still
    /// pull out of its slot:
    ///
    /// `(delta_max * multiplier + n * safety_margin) / n`
    pub fn calc_gap(&self, policy: &GapPolicy) -> f64 {
        let count = self.members.len() as f64;
        if count == 0.0 {
            return 0.0;
        }
        let needed_space = self.delta_max() * policy.multiplier + count * policy.safety_margin;
        needed_space / count
    }

    /// Number of vehicles standing between `a` and `b`.
    pub fn distance(&self, a: &Signature, b: &Signature) -> Result<usize, FormationError> {
        let index_a = self.position(a)?;
        let index_b = self.position(b)?;
        Ok(index_a.abs_diff(index_b).saturating_sub(1))
    }

    /// Whether `a` stands further ahead than `b`.
    pub fn comes_before(&self, a: &Signature, b: &Signature) -> Result<bool, FormationError> {
        Ok(self.position(a)? < self.position(b)?)
    }

    /// The earliest member to announce its intent to leave.
    pub fn filing_member(&self) -> Option<&Member> {
        self.members
            .iter()
            .filter_map(|m| m.filing.map(|filing| (filing, m)))
            .min_by(|(fa, ma), (fb, mb)| fa.cmp(fb).then_with(|| ma.signature.cmp(&mb.signature)))
            .map(|(_, m)| m)
    }
}

impl PartialEq for Formation {
    fn eq(&self, other: &Self) -> bool {
        self.members.len() == other.members.len()
            && self
                .members
                .iter()
                .zip(&other.members)
                .all(|(a, b)| a.same_state(b))
    }
}

impl std::fmt::Display for Formation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.members.iter().map(|m| format!("#{}", m.signature)).collect();
        write!(f, "Formation[{}]", ids.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::member::MemberRelation;
    use crate::domain::signature::Timestamp;

    fn sig(s: &str) -> Signature {
        Signature::from(s)
    }

    fn line(entries: &[(&str, Option<&str>)]) -> RelationGraph {
        let mut graph = RelationGraph::new();
        for (signature, ahead) in entries {
            graph.add(MemberRelation::new(Member::new(*signature, 50.0), ahead.map(Signature::from)));
        }
        graph
    }

    #[test]
    fn test_resolve_picks_line_containing_local() {
        let graph = line(&[("a", None), ("b", Some("a")), ("x", None), ("y", Some("x"))]);
        let formation = Formation::resolve(&graph, &Member::new("y", 50.0)).unwrap();
        assert_eq!(formation.signatures(), vec![sig("x"), sig("y")]);
    }

    #[test]
    fn test_resolve_without_relations_is_singleton() {
        let formation = Formation::resolve(&RelationGraph::new(), &Member::new("me", 40.0)).unwrap();
        assert_eq!(formation.signatures(), vec![sig("me")]);
        assert!(!formation.is_empty());
    }

    #[test]
    fn test_calc_gap_two_members() {
        let mut graph = RelationGraph::new();
        graph.add(MemberRelation::new(Member::new("a", 50.0), None));
        graph.add(MemberRelation::new(Member::new("b", 60.0), Some(sig("a"))));
        let formation = Formation::resolve(&graph, &Member::new("a", 50.0)).unwrap();

        let policy = GapPolicy {
            multiplier: 0.4,
            safety_margin: 3.0,
        };
        // (60 * 0.4 + 2 * 3) / 2
        assert_eq!(formation.delta_max(), 60.0);
        assert!((formation.calc_gap(&policy) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_and_order_queries() {
        let graph = line(&[("a", None), ("b", Some("a")), ("c", Some("b")), ("d", Some("c"))]);
        let formation = Formation::resolve(&graph, &Member::new("b", 50.0)).unwrap();

        assert_eq!(formation.distance(&sig("a"), &sig("d")).unwrap(), 2);
        assert_eq!(formation.distance(&sig("c"), &sig("b")).unwrap(), 0);
        assert!(formation.comes_before(&sig("a"), &sig("c")).unwrap());
        assert!(!formation.comes_before(&sig("d"), &sig("c")).unwrap());

        assert_eq!(
            formation.distance(&sig("a"), &sig("ghost")).unwrap_err(),
            FormationError::NotAMember(sig("ghost"))
        );
        assert!(formation.comes_before(&sig("ghost"), &sig("a")).is_err());
    }

    #[test]
    fn test_filing_member_is_earliest_filer() {
        let mut graph = RelationGraph::new();
        graph.add(MemberRelation::new(
            Member::new("a", 50.0).with_filing(Some(Timestamp::from_secs(20.0))),
            None,
        ));
        graph.add(MemberRelation::new(
            Member::new("b", 50.0).with_filing(Some(Timestamp::from_secs(10.0))),
            Some(sig("a")),
        ));
        graph.add(MemberRelation::new(Member::new("c", 50.0), Some(sig("b"))));
        let formation = Formation::resolve(&graph, &Member::new("c", 50.0)).unwrap();

        assert_eq!(formation.filing_member().map(|m| m.signature.clone()), Some(sig("b")));
    }

    #[test]
    fn test_cycle_degrades_to_singleton() {
        let graph = line(&[("a", Some("b")), ("b", Some("a"))]);
        let formation = Formation::resolve_or_singleton(&graph, &Member::new("a", 50.0));
        assert_eq!(formation.signatures(), vec![sig("a")]);
    }
}
