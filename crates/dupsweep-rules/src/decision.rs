//! Verdicts and the decision set a resolution pass produces.

use std::collections::BTreeMap;

use dupsweep_core::{Catalog, DiskId, NodeId};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::RuleId;

/// Outcome for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Authoritative copy.
    Keep,
    /// Redundant; the whole subtree is a deletion candidate.
    Delete,
    /// Protected; the whole subtree is exempt from deletion.
    Skip,
}

impl Verdict {
    /// Whether the verdict covers the node's whole subtree.
    pub fn is_terminal(self) -> bool {
        matches!(self, Verdict::Delete | Verdict::Skip)
    }
}

/// A verdict with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub node: NodeId,
    pub disk: DiskId,
    pub path: String,
    pub verdict: Verdict,
    pub rule: RuleId,
}

/// Counts per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecisionCounts {
    pub keep: usize,
    pub delete: usize,
    pub skip: usize,
}

/// Decisions of one pass, ordered by node key.
///
/// Nodes without a decision are implicitly kept. Descendants of a node with
/// a terminal verdict carry no decision of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSet {
    decisions: BTreeMap<NodeId, Decision>,
}

impl DecisionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, decision: Decision) {
        self.decisions.insert(decision.node, decision);
    }

    pub fn get(&self, node: NodeId) -> Option<&Decision> {
        self.decisions.get(&node)
    }

    /// Verdict of a node's own decision, implicit keep otherwise.
    pub fn verdict(&self, node: NodeId) -> Verdict {
        self.get(node).map_or(Verdict::Keep, |d| d.verdict)
    }

    /// Nearest terminal decision on the node or one of its ancestors.
    pub fn covering(&self, catalog: &Catalog, node: NodeId) -> Option<&Decision> {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(decision) = self.get(id).filter(|d| d.verdict.is_terminal()) {
                return Some(decision);
            }
            current = catalog.node(id).and_then(|n| n.parent);
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.values()
    }

    /// Delete decisions in node order.
    pub fn deletions(&self) -> impl Iterator<Item = &Decision> {
        self.iter().filter(|d| d.verdict == Verdict::Delete)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn counts(&self) -> DecisionCounts {
        let mut counts = DecisionCounts::default();
        for decision in self.iter() {
            match decision.verdict {
                Verdict::Keep => counts.keep += 1,
                Verdict::Delete => counts.delete += 1,
                Verdict::Skip => counts.skip += 1,
            }
        }
        counts
    }
}

impl Extend<Decision> for DecisionSet {
    fn extend<T: IntoIterator<Item = Decision>>(&mut self, iter: T) {
        for decision in iter {
            self.insert(decision);
        }
    }
}

impl FromIterator<Decision> for DecisionSet {
    fn from_iter<T: IntoIterator<Item = Decision>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
