//! Node materialization, reads and writes.

use serde_json::{Map, Value};
use tether_keypath::{is_valid_index, join_keypath, parse_index, split_keypath};

use super::{Node, NodeId, NodeKind, Store, ViewmodelId};
use crate::capture::CaptureGroup;
use crate::error::StoreError;
use crate::runloop::BatchPromise;

impl Store {
    // ── Materialization ────────────────────────────────────────────────────

    /// Returns the canonical child of `node` under `key`, creating it on
    /// first access. Children of a mapped node are the target's children.
    ///
    /// # Errors
    ///
    /// Index and key reference nodes are scalar and have no children.
    pub fn join_key(&mut self, node: NodeId, key: &str) -> Result<NodeId, StoreError> {
        self.check_node(node)?;
        let parent = self.resolve_mapping(node);
        if matches!(
            self.node(parent).kind,
            NodeKind::Index { .. } | NodeKind::Key { .. }
        ) {
            let reference = format!("{}.{}", self.keypath_of(parent), key);
            return Err(StoreError::invalid(
                reference,
                "index and key references have no members",
            ));
        }
        if let Some(&child) = self.node(parent).children.get(key) {
            return Ok(child);
        }
        let viewmodel = self.node(parent).viewmodel;
        let child = self.alloc(Node::new(
            viewmodel,
            key.to_string(),
            Some(parent),
            NodeKind::Plain,
        ));
        self.node_mut(parent).children.insert(key.to_string(), child);
        Ok(child)
    }

    pub fn join_all(&mut self, node: NodeId, keys: &[String]) -> Result<NodeId, StoreError> {
        keys.iter()
            .try_fold(node, |current, key| self.join_key(current, key))
    }

    /// Canonical node for `keypath` in `vm`.
    pub fn node_at(&mut self, vm: ViewmodelId, keypath: &str) -> Result<NodeId, StoreError> {
        let keys = split_keypath(keypath)?;
        let root = self.root(vm)?;
        let node = self.join_all(root, &keys)?;
        self.retry_pending();
        Ok(node)
    }

    // ── Reads ──────────────────────────────────────────────────────────────

    pub fn get(&mut self, vm: ViewmodelId, keypath: &str) -> Result<Option<Value>, StoreError> {
        let node = self.node_at(vm, keypath)?;
        self.get_node(node)
    }

    /// Like [`Store::get`], recording every node walked into `capture`.
    pub fn get_captured(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        capture: &mut CaptureGroup,
    ) -> Result<Option<Value>, StoreError> {
        let keys = split_keypath(keypath)?;
        let mut node = self.root(vm)?;
        for key in &keys {
            node = self.join_key(node, key)?;
            capture.record(node);
        }
        self.get_node(node)
    }

    pub fn get_node(&mut self, node: NodeId) -> Result<Option<Value>, StoreError> {
        self.check_node(node)?;
        self.freshen(node);
        Ok(self.peek(node))
    }

    pub fn get_node_captured(
        &mut self,
        node: NodeId,
        capture: &mut CaptureGroup,
    ) -> Result<Option<Value>, StoreError> {
        capture.record(node);
        self.get_node(node)
    }

    /// Existence check: a key explicitly set to undefined still counts.
    pub fn has(&self, node: NodeId, key: &str) -> bool {
        if self.check_node(node).is_err() {
            return false;
        }
        let node = self.resolve_mapping(node);
        if let Some(&child) = self.node(node).children.get(key) {
            let child = self.node(child);
            if !child.detached
                && (child.assigned
                    || matches!(
                        child.kind,
                        NodeKind::Computed { .. } | NodeKind::Mapped(_)
                    ))
            {
                return true;
            }
        }
        match self.peek(node) {
            Some(Value::Object(map)) => map.contains_key(key),
            Some(Value::Array(items)) => {
                key == "length" || parse_index(key).map_or(false, |i| i < items.len())
            }
            Some(Value::String(_)) => key == "length",
            _ => false,
        }
    }

    /// Full keypath of `node` within its viewmodel. Synthetic nodes report
    /// their label.
    pub fn keypath_of(&self, node: NodeId) -> String {
        let mut keys = Vec::new();
        let mut current = node;
        while let Some(n) = self.nodes.get(current.0 as usize) {
            match n.parent {
                Some(parent) => {
                    keys.push(n.key.clone());
                    current = parent;
                }
                None => {
                    if !matches!(n.kind, NodeKind::Root { .. }) {
                        keys.push(n.key.clone());
                    }
                    break;
                }
            }
        }
        keys.reverse();
        join_keypath(&keys)
    }

    /// Segments from the viewmodel root, or `None` for synthetic nodes.
    pub(crate) fn tree_path(&self, node: NodeId) -> Option<Vec<String>> {
        let mut keys = Vec::new();
        let mut current = node;
        loop {
            let n = self.node(current);
            match n.parent {
                Some(parent) => {
                    keys.push(n.key.clone());
                    current = parent;
                }
                None if matches!(n.kind, NodeKind::Root { .. }) => break,
                None => return None,
            }
        }
        keys.reverse();
        Some(keys)
    }

    pub fn is_readonly(&self, node: NodeId) -> bool {
        if self.check_node(node).is_err() {
            return false;
        }
        let Some((anchor, _)) = self.anchor_path(node) else {
            return false;
        };
        match &self.node(anchor).kind {
            NodeKind::Mapped(_) => {
                let target = self.resolve_mapping(anchor);
                target != anchor && self.is_readonly(target)
            }
            kind => kind.is_readonly(),
        }
    }

    /// Walks up through plain nodes to the node that supplies the value.
    /// Returns the anchor and the keys leading back down, or `None` when the
    /// chain is detached.
    pub(crate) fn anchor_path(&self, node: NodeId) -> Option<(NodeId, Vec<String>)> {
        let mut keys = Vec::new();
        let mut current = node;
        loop {
            let n = self.node(current);
            if n.detached {
                return None;
            }
            match n.kind {
                NodeKind::Plain => {
                    keys.push(n.key.clone());
                    current = n.parent?;
                }
                _ => break,
            }
        }
        keys.reverse();
        Some((current, keys))
    }

    /// Current value without refreshing derived anchors.
    pub(crate) fn peek(&self, node: NodeId) -> Option<Value> {
        let (anchor, keys) = self.anchor_path(node)?;
        match &self.node(anchor).kind {
            NodeKind::Root { data } => descend(data, &keys),
            NodeKind::Computed { cached, .. } | NodeKind::Expression { cached, .. } => {
                cached.as_ref().and_then(|value| descend(value, &keys))
            }
            NodeKind::Index { value } => descend(&Value::from(*value), &keys),
            NodeKind::Key { value } => descend(&Value::String(value.clone()), &keys),
            NodeKind::Mapped(_) => {
                let target = self.resolve_mapping(anchor);
                if target == anchor {
                    return None;
                }
                self.peek(target).and_then(|value| descend(&value, &keys))
            }
            NodeKind::Plain => None,
        }
    }

    /// Recomputes a dirty computed or expression anchor before a read.
    pub(crate) fn freshen(&mut self, node: NodeId) {
        let Some((anchor, _)) = self.anchor_path(node) else {
            return;
        };
        match self.node(anchor).kind {
            NodeKind::Computed { dirty: true, .. } | NodeKind::Expression { dirty: true, .. } => {
                self.recompute(anchor);
            }
            NodeKind::Mapped(_) => {
                let target = self.resolve_mapping(anchor);
                if target != anchor {
                    self.freshen(target);
                }
            }
            _ => {}
        }
    }

    /// Reads through existing nodes only; used by observers.
    pub(crate) fn value_at(&mut self, vm: ViewmodelId, path: &[String]) -> Option<Value> {
        let mut current = self.viewmodel(vm).ok()?.root;
        for (i, key) in path.iter().enumerate() {
            let parent = self.resolve_mapping(current);
            let child = self.node(parent).children.get(key).copied();
            match child {
                Some(child) if !self.node(child).detached => current = child,
                _ => {
                    self.freshen(parent);
                    return self.peek(parent).and_then(|value| descend(&value, &path[i..]));
                }
            }
        }
        self.freshen(current);
        self.peek(current)
    }

    // ── Writes ─────────────────────────────────────────────────────────────

    pub fn set(&mut self, vm: ViewmodelId, keypath: &str, value: Value) -> Result<(), StoreError> {
        let node = self.node_at(vm, keypath)?;
        self.set_node(node, Some(value), false)
    }

    /// Writes without notifying anyone.
    pub fn set_silent(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let node = self.node_at(vm, keypath)?;
        self.set_node(node, Some(value), true)
    }

    /// Writes undefined. The key is removed from its object but the node
    /// still counts as present.
    pub fn unset(&mut self, vm: ViewmodelId, keypath: &str) -> Result<(), StoreError> {
        let node = self.node_at(vm, keypath)?;
        self.set_node(node, None, false)
    }

    /// Writes `value` (`None` is undefined) to `node`.
    ///
    /// Unless `silent`, the node is marked inside a batch, opening one if
    /// none is open. An array replacing an array goes through shuffle
    /// detection when `shuffle_on_set` is enabled.
    ///
    /// # Errors
    ///
    /// [`StoreError::ReadOnlyViolation`] for computed, expression, index and
    /// key nodes and anything below them.
    pub fn set_node(
        &mut self,
        node: NodeId,
        value: Option<Value>,
        silent: bool,
    ) -> Result<(), StoreError> {
        self.check_node(node)?;
        if self.is_readonly(node) {
            return Err(StoreError::ReadOnlyViolation {
                keypath: self.keypath_of(node),
            });
        }
        let value = value.map(|value| self.adapt(node, value));
        let old = self.peek(node);
        if old == value {
            self.node_mut(node).assigned = true;
            return Ok(());
        }
        if old.is_none() || value.as_ref().is_some_and(is_container) {
            // a key coming into existence, here or below, may settle pending resolvers
            self.node_events += 1;
        }

        if !silent && self.config.shuffle_on_set {
            if let (Some(Value::Array(before)), Some(Value::Array(after))) = (&old, value.clone()) {
                let indices = super::replace_indices(before, &after);
                self.apply_shuffle(node, &indices, after)?;
                self.node_mut(node).assigned = true;
                self.retry_pending();
                return Ok(());
            }
        }

        self.store_value(node, value)?;
        if !silent {
            self.mark_changed(node, old, false);
        }
        self.retry_pending();
        Ok(())
    }

    /// Re-notifies everything below `keypath`. The promise is fulfilled once
    /// the batch has flushed.
    pub fn update(&mut self, vm: ViewmodelId, keypath: &str) -> Result<BatchPromise, StoreError> {
        let node = self.node_at(vm, keypath)?;
        let promise = self.start(true).unwrap_or_default();
        self.mark_changed(node, None, true);
        self.end();
        Ok(promise)
    }

    /// Marks `node` and everything below it as changed.
    pub fn mark(&mut self, node: NodeId) -> Result<(), StoreError> {
        self.check_node(node)?;
        self.mark_changed(node, None, true);
        Ok(())
    }

    /// Replaces the whole data tree of `vm`.
    pub fn reset(&mut self, vm: ViewmodelId, data: Value) -> Result<(), StoreError> {
        let root = self.root(vm)?;
        let old = self.peek(root);
        if let NodeKind::Root { data: current } = &mut self.node_mut(root).kind {
            *current = data;
        }
        self.clear_assigned_below(root);
        self.node_events += 1;
        self.mark_changed(root, old, false);
        self.retry_pending();
        Ok(())
    }

    /// Writes into the owning root's data tree, following mappings.
    pub(crate) fn store_value(&mut self, node: NodeId, value: Option<Value>) -> Result<(), StoreError> {
        let (root, path) = self.storage_path(node)?;
        if let NodeKind::Root { data } = &mut self.node_mut(root).kind {
            if let Err(reason) = write_path(data, &path, value) {
                return Err(StoreError::invalid(self.keypath_of(node), reason));
            }
        }
        self.clear_assigned_below(node);
        self.node_mut(node).assigned = true;
        Ok(())
    }

    fn storage_path(&self, node: NodeId) -> Result<(NodeId, Vec<String>), StoreError> {
        let (anchor, keys) = self
            .anchor_path(node)
            .ok_or_else(|| StoreError::invalid(self.keypath_of(node), "node is detached"))?;
        match &self.node(anchor).kind {
            NodeKind::Root { .. } => Ok((anchor, keys)),
            NodeKind::Mapped(_) => {
                let target = self.resolve_mapping(anchor);
                if target == anchor {
                    return Err(StoreError::invalid(self.keypath_of(node), "mapping cycle"));
                }
                let (root, mut path) = self.storage_path(target)?;
                path.extend(keys);
                Ok((root, path))
            }
            _ => Err(StoreError::ReadOnlyViolation {
                keypath: self.keypath_of(node),
            }),
        }
    }

    fn clear_assigned_below(&mut self, node: NodeId) {
        let mut stack: Vec<NodeId> = self.node(node).children.values().copied().collect();
        while let Some(child) = stack.pop() {
            let n = self.node_mut(child);
            n.assigned = false;
            stack.extend(n.children.values().copied());
        }
    }
}

/// Value at `keys` below `value`. `length` is supported on arrays and
/// strings.
pub(crate) fn descend(value: &Value, keys: &[String]) -> Option<Value> {
    let mut current = value;
    for (i, key) in keys.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) if key == "length" => return length_of(items.len(), &keys[i + 1..]),
            Value::Array(items) => items.get(parse_index(key)?)?,
            Value::String(s) if key == "length" => {
                return length_of(s.chars().count(), &keys[i + 1..])
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn length_of(len: usize, rest: &[String]) -> Option<Value> {
    rest.is_empty().then(|| Value::from(len))
}

fn empty_container(key: &str) -> Value {
    if is_valid_index(key) {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

/// Arrays never grow past this many members through a keypath write.
pub(crate) const MAX_ARRAY_LEN: usize = 1 << 20;

const ARRAY_TOO_LARGE: &str = "array index exceeds the maximum array length";

/// Pads `items` with nulls so `index` is addressable.
fn grow(items: &mut Vec<Value>, index: usize) -> Result<(), &'static str> {
    if index >= items.len() {
        let len = index
            .checked_add(1)
            .filter(|&len| len <= MAX_ARRAY_LEN)
            .ok_or(ARRAY_TOO_LARGE)?;
        items.resize(len, Value::Null);
    }
    Ok(())
}

/// Rejects a write that would grow an array past [`MAX_ARRAY_LEN`] before
/// anything along `path` is touched.
fn check_growth(data: &Value, path: &[String], value: Option<&Value>) -> Result<(), &'static str> {
    let too_large = |key: &String| {
        is_valid_index(key) && parse_index(key).map_or(true, |index| index >= MAX_ARRAY_LEN)
    };
    let mut current = Some(data);
    for (i, key) in path.iter().enumerate() {
        current = match current {
            Some(Value::Object(map)) => map.get(key),
            Some(Value::Array(_)) if key == "length" && i + 1 == path.len() => {
                let len = value.and_then(Value::as_u64);
                if len.is_some_and(|len| len > MAX_ARRAY_LEN as u64) {
                    return Err(ARRAY_TOO_LARGE);
                }
                return Ok(());
            }
            Some(Value::Array(items)) => {
                if too_large(key) {
                    return Err(ARRAY_TOO_LARGE);
                }
                parse_index(key).and_then(|index| items.get(index))
            }
            // containers are created from here on; an index key makes an array
            _ => {
                if value.is_some() && path[i..].iter().any(too_large) {
                    return Err(ARRAY_TOO_LARGE);
                }
                return Ok(());
            }
        };
    }
    Ok(())
}

/// Writes `value` at `path`, creating intermediate containers: an array
/// when the next key is an index, an object otherwise. Scalars in the way
/// are replaced.
fn write_path(data: &mut Value, path: &[String], value: Option<Value>) -> Result<(), &'static str> {
    check_growth(data, path, value.as_ref())?;
    let Some((last, parents)) = path.split_last() else {
        *data = value.unwrap_or(Value::Null);
        return Ok(());
    };
    if !is_container(data) {
        if value.is_none() {
            return Ok(());
        }
        *data = empty_container(&path[0]);
    }

    let mut current = data;
    for (i, key) in parents.iter().enumerate() {
        let slot = match current {
            Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = parse_index(key).ok_or("array members are addressed by index")?;
                grow(items, index)?;
                &mut items[index]
            }
            _ => return Err("cannot write below a scalar"),
        };
        if !is_container(slot) {
            if value.is_none() {
                return Ok(());
            }
            *slot = empty_container(&path[i + 1]);
        }
        current = slot;
    }

    match current {
        Value::Object(map) => {
            match value {
                Some(value) => {
                    map.insert(last.clone(), value);
                }
                None => {
                    map.shift_remove(last);
                }
            }
            Ok(())
        }
        Value::Array(items) if last == "length" => {
            let len = value
                .as_ref()
                .and_then(Value::as_u64)
                .ok_or("array length must be a non-negative integer")?;
            let len = usize::try_from(len)
                .ok()
                .filter(|&len| len <= MAX_ARRAY_LEN)
                .ok_or(ARRAY_TOO_LARGE)?;
            items.resize(len, Value::Null);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(last).ok_or("array members are addressed by index")?;
            grow(items, index)?;
            items[index] = value.unwrap_or(Value::Null);
            Ok(())
        }
        _ => Err("cannot write below a scalar"),
    }
}
