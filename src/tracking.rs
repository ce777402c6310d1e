//! Per-node lifecycle tracking: Unseen → Eligible → Pending → Processed,
//! with Ineligible and Abandoned as terminal side exits.
//! The context object owns the processed sets, the placeholder → text-node
//! pending map, and the scan generation; the engine passes it by reference
//! so tests can inject a fresh one per case.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::dom::NodeId;

/// Lifecycle states of a candidate text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Unseen,
    Eligible,
    Pending,
    Processed,
    Ineligible,
    Abandoned,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Unseen => write!(f, "Unseen"),
            NodeState::Eligible => write!(f, "Eligible"),
            NodeState::Pending => write!(f, "Pending"),
            NodeState::Processed => write!(f, "Processed"),
            NodeState::Ineligible => write!(f, "Ineligible"),
            NodeState::Abandoned => write!(f, "Abandoned"),
        }
    }
}

impl NodeState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::Unseen, NodeState::Eligible)
                | (NodeState::Unseen, NodeState::Ineligible)
                | (NodeState::Eligible, NodeState::Pending)
                | (NodeState::Pending, NodeState::Processed) // one-shot
                | (NodeState::Pending, NodeState::Abandoned) // detached before visible
        )
    }
}

/// Page-session tracking state. One instance per engine; cleared only by an
/// explicit reprocess.
#[derive(Default)]
pub struct TrackingContext {
    processed_nodes: HashSet<NodeId>,
    processed_elements: HashSet<NodeId>,
    /// placeholder → pending text node. Lookup-only association; entries
    /// leave on dispatch or on detachment.
    pending: HashMap<NodeId, NodeId>,
    states: HashMap<NodeId, NodeState>,
    generation: u64,
}

impl TrackingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, node: NodeId) -> NodeState {
        self.states.get(&node).copied().unwrap_or(NodeState::Unseen)
    }

    /// Attempt a state transition. Invalid transitions are refused and
    /// logged; callers treat a refusal as "skip this node".
    pub fn transition(&mut self, node: NodeId, next: NodeState) -> bool {
        let current = self.state(node);
        if !current.can_transition_to(next) {
            warn!(node = ?node, from = %current, to = %next, "invalid node transition refused");
            return false;
        }
        self.states.insert(node, next);
        true
    }

    pub fn is_node_processed(&self, node: NodeId) -> bool {
        self.processed_nodes.contains(&node)
    }

    pub fn is_element_processed(&self, element: NodeId) -> bool {
        self.processed_elements.contains(&element)
    }

    pub fn mark_element_processed(&mut self, element: NodeId) {
        self.processed_elements.insert(element);
    }

    /// Membership insert for the idempotence guard. Returns false if the
    /// node was already claimed (double-queue attempt).
    pub fn claim_node(&mut self, node: NodeId) -> bool {
        self.processed_nodes.insert(node)
    }

    /// Mark a splice-emitted node so later scans never re-match it.
    pub fn mark_node_processed(&mut self, node: NodeId) {
        self.processed_nodes.insert(node);
    }

    /// Register a placeholder → text-node association at queue time.
    pub fn begin_pending(&mut self, placeholder: NodeId, text_node: NodeId) {
        self.pending.insert(placeholder, text_node);
        self.transition(text_node, NodeState::Pending);
    }

    /// Resolve and remove a pending association at dispatch time.
    pub fn take_pending(&mut self, placeholder: NodeId) -> Option<NodeId> {
        self.pending.remove(&placeholder)
    }

    /// Abandon a pending node whose placeholder detached before firing.
    pub fn abandon(&mut self, placeholder: NodeId) {
        if let Some(text_node) = self.pending.remove(&placeholder) {
            self.transition(text_node, NodeState::Abandoned);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Placeholders currently awaiting visibility.
    pub fn pending_placeholders(&self) -> Vec<NodeId> {
        self.pending.keys().copied().collect()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reprocess: drop all membership and lifecycle state and advance the
    /// generation so results dispatched before the clear are stale.
    pub fn clear_and_advance(&mut self) -> u64 {
        self.processed_nodes.clear();
        self.processed_elements.clear();
        self.pending.clear();
        self.states.clear();
        self.generation += 1;
        self.generation
    }
}
