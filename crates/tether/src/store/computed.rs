//! Computed and expression nodes.
//!
//! A computed node's getter reads the store through a [`ComputeContext`];
//! every node it touches is captured and becomes a dependency. When any
//! dependency changes the node is recomputed, and marked only if its value
//! moved. Expression nodes have a fixed dependency list instead.

use std::rc::Rc;

use serde_json::Value;

use super::{Node, NodeId, NodeKind, Store, ViewmodelId};
use crate::capture::CaptureGroup;
use crate::error::StoreError;
use crate::reference::Signature;

pub type Getter = Rc<dyn Fn(&mut ComputeContext<'_>) -> Option<Value>>;

/// Read access handed to a computed getter.
pub struct ComputeContext<'a> {
    store: &'a mut Store,
    viewmodel: ViewmodelId,
    capture: CaptureGroup,
}

impl ComputeContext<'_> {
    /// Reads `keypath` from the computed node's viewmodel and records the
    /// dependency. Malformed keypaths read as undefined.
    pub fn get(&mut self, keypath: &str) -> Option<Value> {
        match self
            .store
            .get_captured(self.viewmodel, keypath, &mut self.capture)
        {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, keypath, "computed read failed");
                None
            }
        }
    }

    pub fn viewmodel(&self) -> ViewmodelId {
        self.viewmodel
    }
}

impl Store {
    /// Installs a readonly computed value at root `key` of `vm`.
    pub fn computed(
        &mut self,
        vm: ViewmodelId,
        key: &str,
        getter: impl Fn(&mut ComputeContext<'_>) -> Option<Value> + 'static,
    ) -> Result<NodeId, StoreError> {
        let root = self.root(vm)?;
        let node = self.join_key(root, key)?;
        let old = self.peek(node);
        self.relink(node, Vec::new());
        self.node_mut(node).kind = NodeKind::Computed {
            getter: Rc::new(getter),
            cached: None,
            dirty: true,
            deps: Vec::new(),
            computing: false,
        };
        self.node_events += 1;
        self.recompute(node);
        if old != self.peek(node) {
            self.mark_changed(node, old, false);
        }
        self.retry_pending();
        Ok(node)
    }

    pub(crate) fn recompute(&mut self, node: NodeId) {
        let viewmodel = self.node(node).viewmodel;
        match &mut self.node_mut(node).kind {
            NodeKind::Computed {
                getter, computing, ..
            } => {
                if *computing {
                    tracing::warn!(node = node.0, "computed value depends on itself");
                    return;
                }
                *computing = true;
                let getter = Rc::clone(getter);
                let mut context = ComputeContext {
                    store: self,
                    viewmodel,
                    capture: CaptureGroup::new(),
                };
                let value = getter(&mut context);
                let captured = context.capture.into_nodes();
                let deps = self.relink(node, captured);
                if let NodeKind::Computed {
                    cached,
                    dirty,
                    deps: current,
                    computing,
                    ..
                } = &mut self.node_mut(node).kind
                {
                    *cached = value;
                    *dirty = false;
                    *computing = false;
                    *current = deps;
                }
            }
            NodeKind::Expression { deps, compute, .. } => {
                let deps = deps.clone();
                let compute = Rc::clone(compute);
                let values: Vec<Option<Value>> = deps
                    .iter()
                    .map(|dep| {
                        self.freshen(*dep);
                        self.peek(*dep)
                    })
                    .collect();
                let value = compute(&values);
                if let NodeKind::Expression { cached, dirty, .. } = &mut self.node_mut(node).kind {
                    *cached = value;
                    *dirty = false;
                }
            }
            _ => {}
        }
    }

    /// Replaces the dependency list of `node`, keeping the downstream links
    /// of its dependencies in step. Returns the new list.
    fn relink(&mut self, node: NodeId, deps: Vec<NodeId>) -> Vec<NodeId> {
        let previous = match &self.node(node).kind {
            NodeKind::Computed { deps, .. } | NodeKind::Expression { deps, .. } => deps.clone(),
            _ => Vec::new(),
        };
        for dep in previous {
            self.node_mut(dep).downstream.retain(|d| *d != node);
        }
        let deps: Vec<NodeId> = deps.into_iter().filter(|dep| *dep != node).collect();
        for dep in &deps {
            let downstream = &mut self.node_mut(*dep).downstream;
            if !downstream.contains(&node) {
                downstream.push(node);
            }
        }
        deps
    }

    /// Canonical expression node for `signature` over `deps` in `vm`.
    pub(crate) fn expression_node(
        &mut self,
        vm: ViewmodelId,
        signature: Signature,
        deps: Vec<NodeId>,
    ) -> Result<NodeId, StoreError> {
        let cache_key = (signature.label.clone(), deps.clone());
        if let Some(&existing) = self.viewmodel(vm)?.expressions.get(&cache_key) {
            return Ok(existing);
        }
        let node = self.alloc(Node::new(
            vm,
            signature.label,
            None,
            NodeKind::Expression {
                deps: Vec::new(),
                compute: signature.compute,
                cached: None,
                dirty: true,
            },
        ));
        let deps = self.relink(node, deps);
        if let NodeKind::Expression { deps: current, .. } = &mut self.node_mut(node).kind {
            *current = deps;
        }
        self.viewmodel_mut(vm)?.expressions.insert(cache_key, node);
        self.recompute(node);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewmodelOptions;
    use serde_json::json;

    #[test]
    fn test_computed_follows_dependencies() {
        let mut store = Store::default();
        let vm = store.create_viewmodel(ViewmodelOptions::with_data(json!({"first": "Ada", "last": "Lovelace"})));
        store
            .computed(vm, "full", |cx| {
                let first = cx.get("first")?;
                let last = cx.get("last")?;
                Some(json!(format!("{} {}", first.as_str()?, last.as_str()?)))
            })
            .unwrap();
        assert_eq!(store.get(vm, "full").unwrap(), Some(json!("Ada Lovelace")));

        store.set(vm, "last", json!("Byron")).unwrap();
        assert_eq!(store.get(vm, "full").unwrap(), Some(json!("Ada Byron")));
    }

    #[test]
    fn test_computed_is_readonly() {
        let mut store = Store::default();
        let vm = store.create_viewmodel(ViewmodelOptions::default());
        store.computed(vm, "answer", |_| Some(json!(42))).unwrap();
        let err = store.set(vm, "answer", json!(1)).unwrap_err();
        assert_eq!(
            err,
            StoreError::ReadOnlyViolation {
                keypath: "answer".to_string()
            }
        );
    }

    #[test]
    fn test_dependency_list_is_rebuilt() {
        let mut store = Store::default();
        let vm = store.create_viewmodel(ViewmodelOptions::with_data(json!({"flag": true, "a": 1, "b": 2})));
        let node = store
            .computed(vm, "pick", |cx| {
                if cx.get("flag")? == json!(true) {
                    cx.get("a")
                } else {
                    cx.get("b")
                }
            })
            .unwrap();
        let a = store.node_at(vm, "a").unwrap();
        let b = store.node_at(vm, "b").unwrap();
        assert!(store.node(a).downstream.contains(&node));
        assert!(!store.node(b).downstream.contains(&node));

        store.set(vm, "flag", json!(false)).unwrap();
        assert_eq!(store.get_node(node).unwrap(), Some(json!(2)));
        assert!(!store.node(a).downstream.contains(&node));
        assert!(store.node(b).downstream.contains(&node));
    }
}
