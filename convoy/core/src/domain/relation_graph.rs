// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Relation Graph
//!
//! Directed graph assembled from gossiped [`MemberRelation`] facts. Every
//! agent that published a relation is a vertex; its relation is the single
//! outgoing edge pointing at the vehicle it sees ahead.
//!
//! ```text
//!   C ──▶ B ──▶ A ──▶ (none)        edges: "my front neighbor is"
//!   A ◀── B ◀── C                   reversed: "who stands behind me"
//! ```
//!
//! A linear transitivity is traced front-to-back over the reversed edges,
//! starting at a *starting vertex*: a vertex without an edge, or whose edge
//! target never published a relation itself (it is seen, but has not joined).
//!
//! The graph state depends only on the latest relation per signature. Every
//! traversal breaks ties by signature, so agents that saw the same facts in
//! any order compute the same transitivities.
//!
//! Departed agents are never evicted and linger as vertices.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::formation::FormationError;
use crate::domain::member::{Member, MemberRelation};
use crate::domain::signature::Signature;

#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    vertices: HashMap<Signature, Member>,
    edges: HashMap<Signature, Option<Signature>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the relation's member as a vertex and overwrites its outgoing
    /// edge (there is at most one per vertex).
    ///
    /// Returns whether the graph changed.
    pub fn add(&mut self, relation: MemberRelation) -> bool {
        let MemberRelation {
            member,
            ahead_signature,
        } = relation;
        let signature = member.signature.clone();

        let unchanged = self
            .vertices
            .get(&signature)
            .is_some_and(|known| known.same_state(&member))
            && self.edges.get(&signature) == Some(&ahead_signature);

        self.vertices.insert(signature.clone(), member);
        self.edges.insert(signature, ahead_signature);

        !unchanged
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.vertices.contains_key(signature)
    }

    pub fn vertex(&self, signature: &Signature) -> Option<&Member> {
        self.vertices.get(signature)
    }

    /// The front neighbor `signature` reported, if it is a vertex and reported one.
    pub fn ahead_of(&self, signature: &Signature) -> Option<&Signature> {
        self.edges.get(signature).and_then(Option::as_ref)
    }

    pub fn is_starting_vertex(&self, signature: &Signature) -> bool {
        match self.edges.get(signature) {
            None => false,
            Some(None) => true,
            Some(Some(ahead)) => !self.edges.contains_key(ahead),
        }
    }

    /// Starting vertices in signature order.
    pub fn starting_vertices(&self) -> Vec<&Member> {
        let mut starting: Vec<&Member> = self
            .vertices
            .values()
            .filter(|member| self.is_starting_vertex(&member.signature))
            .collect();
        starting.sort_by(|a, b| a.signature.cmp(&b.signature));
        starting
    }

    /// Maps each front neighbor to the vertex standing behind it.
    ///
    /// Should several vertices claim the same front neighbor, the smallest
    /// signature keeps the slot.
    fn reversed_edges(&self) -> HashMap<&Signature, &Signature> {
        let mut reversed: BTreeMap<&Signature, &Signature> = BTreeMap::new();
        for (behind, ahead) in &self.edges {
            let Some(ahead) = ahead else { continue };
            reversed
                .entry(ahead)
                .and_modify(|claimant| {
                    if behind < *claimant {
                        *claimant = behind;
                    }
                })
                .or_insert(behind);
        }
        reversed.into_iter().collect()
    }

    /// Traces the members standing behind `start`, front-to-back.
    ///
    /// # Errors
    ///
    /// - [`FormationError::UnknownVertex`] if `start` never published a relation.
    /// - [`FormationError::Cycle`] if the trace revisits a vertex.
    pub fn max_linear_transitivity(&self, start: &Signature) -> Result<Vec<Member>, FormationError> {
        let first = self
            .vertices
            .get(start)
            .ok_or_else(|| FormationError::UnknownVertex(start.clone()))?;

        let reversed = self.reversed_edges();
        let mut visited: HashSet<&Signature> = HashSet::from([&first.signature]);
        let mut transitivity = vec![first.clone()];

        let mut current = &first.signature;
        while let Some(behind) = reversed.get(current).copied() {
            if !visited.insert(behind) {
                return Err(FormationError::Cycle {
                    start: start.clone(),
                    trace: transitivity.iter().map(|m| m.signature.clone()).collect(),
                });
            }

            let member = self
                .vertices
                .get(behind)
                .ok_or_else(|| FormationError::UnknownVertex(behind.clone()))?;
            transitivity.push(member.clone());
            current = behind;
        }

        Ok(transitivity)
    }

    /// Every maximal transitivity, one per starting vertex, in signature order.
    pub fn max_linear_transitivities(&self) -> Result<Vec<Vec<Member>>, FormationError> {
        self.starting_vertices()
            .into_iter()
            .map(|member| self.max_linear_transitivity(&member.signature))
            .collect()
    }
}
