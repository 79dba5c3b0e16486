//! Change propagation.
//!
//! Marking a node records it, and every node whose value moved with it, in
//! the open batch's change list. The walk goes down into materialized
//! children whose value actually changed, across to computed nodes that
//! read it and to nodes mapped onto it, and up through its ancestors.
//! Observers of the touched keypaths are evaluated synchronously once the
//! walk is done.

use std::collections::HashSet;

use serde_json::Value;

use super::graph::descend;
use super::{NodeId, NodeKind, Store};
use crate::dependent::ChangeKind;

#[derive(Default)]
struct Propagation {
    /// Top-level nodes whose keypaths observers are checked against.
    targets: Vec<NodeId>,
    visited: HashSet<NodeId>,
    upstream: HashSet<NodeId>,
}

impl Store {
    /// Marks `node` given its value before the write. With `force`, every
    /// materialized descendant is marked whether or not its value moved.
    pub(crate) fn mark_changed(&mut self, node: NodeId, old: Option<Value>, force: bool) {
        self.start(false);
        let mut walk = Propagation::default();
        self.propagate(node, old, force, &mut walk);
        self.notify_observers(&walk.targets);
        self.end();
    }

    fn propagate(&mut self, node: NodeId, old: Option<Value>, force: bool, walk: &mut Propagation) {
        if !walk.visited.insert(node) {
            return;
        }
        walk.targets.push(node);
        self.cascade(node, old, force, walk);
        self.mark_upstream(node, walk);
    }

    fn cascade(&mut self, node: NodeId, old: Option<Value>, force: bool, walk: &mut Propagation) {
        self.runloop.record(node, ChangeKind::Changed);
        self.touch_links(node, walk);

        let children: Vec<(String, NodeId)> = self
            .node(node)
            .children
            .iter()
            .map(|(key, child)| (key.clone(), *child))
            .collect();
        for (key, child) in children {
            let n = self.node(child);
            // derived children do not read their value from this one
            if n.detached || !matches!(n.kind, NodeKind::Plain) {
                continue;
            }
            if self.runloop.is_no_cascade(child) || walk.visited.contains(&child) {
                continue;
            }
            let old_child = old
                .as_ref()
                .and_then(|value| descend(value, std::slice::from_ref(&key)));
            if !force && old_child == self.peek(child) {
                continue;
            }
            walk.visited.insert(child);
            self.cascade(child, old_child, force, walk);
        }
    }

    fn mark_upstream(&mut self, node: NodeId, walk: &mut Propagation) {
        let mut current = node;
        while let Some(parent) = self.node(current).parent {
            self.runloop.record(parent, ChangeKind::Changed);
            if walk.upstream.insert(parent) {
                self.touch_links(parent, walk);
            }
            current = parent;
        }
    }

    /// Invalidates downstream computed nodes and touches aliases.
    fn touch_links(&mut self, node: NodeId, walk: &mut Propagation) {
        for computed in self.node(node).downstream.clone() {
            self.invalidate(computed, walk);
        }
        for alias in self.node(node).mapped_by.clone() {
            if !walk.visited.insert(alias) {
                continue;
            }
            walk.targets.push(alias);
            self.runloop.record(alias, ChangeKind::Changed);
            self.touch_links(alias, walk);
            self.mark_upstream(alias, walk);
        }
    }

    fn invalidate(&mut self, node: NodeId, walk: &mut Propagation) {
        if walk.visited.contains(&node) {
            return;
        }
        let before = self.peek(node);
        match &mut self.node_mut(node).kind {
            NodeKind::Computed { dirty, .. } | NodeKind::Expression { dirty, .. } => *dirty = true,
            _ => return,
        }
        self.recompute(node);
        let after = self.peek(node);
        if before != after {
            self.propagate(node, before, false, walk);
        }
    }

    fn notify_observers(&mut self, targets: &[NodeId]) {
        if self.observers.is_empty() || targets.is_empty() {
            return;
        }
        let touched: Vec<_> = targets
            .iter()
            .filter_map(|node| {
                let path = self.tree_path(*node)?;
                Some((self.node(*node).viewmodel, path))
            })
            .collect();
        let due: Vec<u64> = self
            .observers
            .iter()
            .filter(|(_, observer)| {
                touched
                    .iter()
                    .any(|(vm, path)| observer.viewmodel == *vm && observer.relates_to(path))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.evaluate_observer(id);
        }
    }
}
