//! View-side dependents of model nodes.
//!
//! Fragments, attributes and bindings register as dependents of the nodes
//! they display. They are notified once per batch, when the batch unwinds,
//! and never write back into the store from inside the notification; work
//! that needs the store goes through `Store::schedule_task`.

use serde_json::Value;

use crate::store::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The node's value changed.
    Changed,
    /// The node kept its identity but moved to another array index.
    Shifted { from: usize, to: usize },
    /// The node was removed from its array and is now detached.
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeChange {
    pub node: NodeId,
    pub keypath: String,
    pub kind: ChangeKind,
    /// Value of the node at flush time; `None` is undefined.
    pub value: Option<Value>,
}

pub trait Dependent {
    fn handle_change(&self, change: &NodeChange);
}
