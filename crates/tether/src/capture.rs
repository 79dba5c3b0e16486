//! Read-dependency capture.
//!
//! A [`CaptureGroup`] is handed to reads explicitly; every node traversed by
//! such a read is recorded once, in first-read order. Computed values rebuild
//! their dependency list from the group after each evaluation.

use indexmap::IndexSet;

use crate::store::NodeId;

#[derive(Debug, Clone, Default)]
pub struct CaptureGroup {
    nodes: IndexSet<NodeId>,
}

impl CaptureGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, node: NodeId) {
        self.nodes.insert(node);
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<NodeId> {
        self.nodes.into_iter().collect()
    }
}
