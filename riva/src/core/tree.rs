//! Arena-backed intention tree.
//!
//! Intentions live in a flat `Vec` indexed by [`IntentionId`]; parent and child links are
//! ids, never references. The tree is append-only: nodes are never removed, so terminal
//! intentions stay in place as an audit record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{Cycle, IntentionDraft, IntentionStatus};
use crate::error::EngineError;

/// Index of an intention inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentionId(u32);

impl IntentionId {
    pub const ROOT: IntentionId = IntentionId(0);

    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IntentionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "int-{:04}", self.0)
    }
}

/// One goal and its verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub id: IntentionId,
    pub what: String,
    pub acceptance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<IntentionId>,
    /// Insertion order is execution order.
    #[serde(default)]
    pub children: Vec<IntentionId>,
    pub status: IntentionStatus,
    #[serde(default)]
    pub trace: Vec<Cycle>,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl Intention {
    fn new(
        id: IntentionId,
        what: String,
        acceptance: String,
        parent: Option<IntentionId>,
        depth: u32,
    ) -> Self {
        Self {
            id,
            what,
            acceptance,
            parent,
            children: Vec::new(),
            status: IntentionStatus::Pending,
            trace: Vec::new(),
            depth,
            verified_at: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn last_cycle(&self) -> Option<&Cycle> {
        self.trace.last()
    }
}

/// Single-owner tree of intentions rooted at [`IntentionId::ROOT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionTree {
    nodes: Vec<Intention>,
}

impl IntentionTree {
    /// Create a tree holding only the root intention (depth 0, `Pending`).
    pub fn new(what: impl Into<String>, acceptance: impl Into<String>) -> Self {
        let root = Intention::new(IntentionId::ROOT, what.into(), acceptance.into(), None, 0);
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> &Intention {
        &self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Intention] {
        &self.nodes
    }

    pub fn get(&self, id: IntentionId) -> Result<&Intention, EngineError> {
        self.nodes.get(id.index()).ok_or(EngineError::NotFound(id))
    }

    fn get_mut(&mut self, id: IntentionId) -> Result<&mut Intention, EngineError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(EngineError::NotFound(id))
    }

    /// Attach a new child under `parent` at `parent.depth + 1`.
    ///
    /// Fails with `InvalidParent` when the parent does not exist or is already terminal.
    pub fn add_child(
        &mut self,
        parent: IntentionId,
        draft: IntentionDraft,
    ) -> Result<IntentionId, EngineError> {
        let parent_depth = match self.nodes.get(parent.index()) {
            Some(node) if !node.status.is_terminal() => node.depth,
            _ => return Err(EngineError::InvalidParent(parent)),
        };
        let id = IntentionId(self.nodes.len() as u32);
        self.nodes.push(Intention::new(
            id,
            draft.what,
            draft.acceptance,
            Some(parent),
            parent_depth + 1,
        ));
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Move an intention forward through its state machine.
    pub fn transition(&mut self, id: IntentionId, to: IntentionStatus) -> Result<(), EngineError> {
        let node = self.get_mut(id)?;
        if !node.status.can_transition_to(to) {
            return Err(EngineError::IllegalTransition {
                id,
                from: node.status,
                to,
            });
        }
        node.status = to;
        if to == IntentionStatus::Verified {
            node.verified_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a finished cycle to an intention's trace.
    pub fn append_cycle(&mut self, id: IntentionId, cycle: Cycle) -> Result<(), EngineError> {
        self.get_mut(id)?.trace.push(cycle);
        Ok(())
    }

    /// Ids from `id` up to the root, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: IntentionId) -> Result<Vec<IntentionId>, EngineError> {
        let mut out = Vec::new();
        let mut current = self.get(id)?.parent;
        while let Some(parent) = current {
            out.push(parent);
            current = self.get(parent)?.parent;
        }
        Ok(out)
    }

    /// Depth-first, pre-order walk starting at `from`; children in insertion order.
    pub fn depth_first(&self, from: IntentionId) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: vec![from],
        }
    }

    pub fn total_cycles(&self) -> usize {
        self.nodes.iter().map(|node| node.trace.len()).sum()
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(0)
    }
}

/// Iterator returned by [`IntentionTree::depth_first`].
pub struct DepthFirst<'a> {
    tree: &'a IntentionTree,
    stack: Vec<IntentionId>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a Intention;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.tree.nodes.get(id.index()) else {
                continue;
            };
            self.stack.extend(node.children.iter().rev().copied());
            return Some(node);
        }
        None
    }
}
