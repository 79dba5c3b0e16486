//! Array mutation with node identity preserved.
//!
//! Each mutator describes its effect as `new_indices[old_index]`: the index
//! an existing member ends up at, or `None` if it was removed. Child nodes
//! are re-keyed according to that mapping, so a dependent bound to a member
//! follows the member rather than the position. Positional mutators
//! (`push`, `pop`, `shift`, `unshift`, `splice`, `reverse`, `sort_by`) derive
//! the mapping from the operation; `merge` derives it by value equality and
//! array-over-array `set` by value equality with positional fallback.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde_json::Value;
use tether_keypath::parse_index;

use super::{NodeId, Store, ViewmodelId};
use crate::dependent::ChangeKind;
use crate::error::StoreError;

/// Mapping for removing `delete_count` members at `start` and inserting
/// `insert_count` new ones in their place, over an array of `len` members.
///
/// # Example
///
/// ```
/// use tether::store::splice_indices;
///
/// assert_eq!(splice_indices(3, 1, 1, 0), vec![Some(0), None, Some(1)]);
/// assert_eq!(splice_indices(2, 0, 0, 2), vec![Some(2), Some(3)]);
/// ```
pub fn splice_indices(
    len: usize,
    start: usize,
    delete_count: usize,
    insert_count: usize,
) -> Vec<Option<usize>> {
    let start = start.min(len);
    let end = start.saturating_add(delete_count).min(len);
    (0..len)
        .map(|i| {
            if i < start {
                Some(i)
            } else if i < end {
                None
            } else {
                Some(i - (end - start) + insert_count)
            }
        })
        .collect()
}

pub fn reverse_indices(len: usize) -> Vec<Option<usize>> {
    (0..len).map(|i| Some(len - 1 - i)).collect()
}

/// Mapping for a permutation given as `order[new_index] = old_index`.
pub fn sort_indices(order: &[usize]) -> Vec<Option<usize>> {
    let mut indices = vec![None; order.len()];
    for (new_index, &old_index) in order.iter().enumerate() {
        if let Some(slot) = indices.get_mut(old_index) {
            *slot = Some(new_index);
        }
    }
    indices
}

/// Value-equality mapping. Each old member, in order, claims the earliest
/// unclaimed equal member of `new`; duplicates therefore keep their
/// relative order.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tether::store::merge_indices;
///
/// let old = [json!("a"), json!("b"), json!("a")];
/// let new = [json!("a"), json!("a"), json!("c")];
/// assert_eq!(merge_indices(&old, &new), vec![Some(0), None, Some(1)]);
/// ```
pub fn merge_indices(old: &[Value], new: &[Value]) -> Vec<Option<usize>> {
    let mut claimed = vec![false; new.len()];
    old.iter()
        .map(|item| {
            let found = (0..new.len()).find(|&i| !claimed[i] && new[i] == *item);
            if let Some(i) = found {
                claimed[i] = true;
            }
            found
        })
        .collect()
}

/// Mapping for replacing `old` with `new` wholesale. Members are matched by
/// value as in [`merge_indices`]; an unmatched member whose position still
/// exists and was not taken by a matched member keeps that position, so its
/// node survives and sees a plain change.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tether::store::replace_indices;
///
/// let old = [json!("a"), json!("b"), json!("c")];
/// let new = [json!("x"), json!("b")];
/// assert_eq!(replace_indices(&old, &new), vec![Some(0), Some(1), None]);
/// ```
pub fn replace_indices(old: &[Value], new: &[Value]) -> Vec<Option<usize>> {
    let mut indices = merge_indices(old, new);
    let mut taken = vec![false; new.len()];
    for index in indices.iter().flatten() {
        taken[*index] = true;
    }
    for (old_index, slot) in indices.iter_mut().enumerate() {
        if slot.is_none() && old_index < new.len() && !taken[old_index] {
            taken[old_index] = true;
            *slot = Some(old_index);
        }
    }
    indices
}

impl Store {
    /// Appends `items`; returns the new length.
    pub fn push(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        items: Vec<Value>,
    ) -> Result<usize, StoreError> {
        let (node, mut array) = self.array_at(vm, keypath)?;
        let indices = splice_indices(array.len(), array.len(), 0, items.len());
        array.extend(items);
        let len = array.len();
        self.apply_shuffle(node, &indices, array)?;
        Ok(len)
    }

    pub fn pop(&mut self, vm: ViewmodelId, keypath: &str) -> Result<Option<Value>, StoreError> {
        let (node, mut array) = self.array_at(vm, keypath)?;
        if array.is_empty() {
            return Ok(None);
        }
        let indices = splice_indices(array.len(), array.len() - 1, 1, 0);
        let removed = array.pop();
        self.apply_shuffle(node, &indices, array)?;
        Ok(removed)
    }

    pub fn shift(&mut self, vm: ViewmodelId, keypath: &str) -> Result<Option<Value>, StoreError> {
        let (node, mut array) = self.array_at(vm, keypath)?;
        if array.is_empty() {
            return Ok(None);
        }
        let indices = splice_indices(array.len(), 0, 1, 0);
        let removed = array.remove(0);
        self.apply_shuffle(node, &indices, array)?;
        Ok(Some(removed))
    }

    /// Prepends `items`; returns the new length.
    pub fn unshift(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        items: Vec<Value>,
    ) -> Result<usize, StoreError> {
        let (node, array) = self.array_at(vm, keypath)?;
        let indices = splice_indices(array.len(), 0, 0, items.len());
        let mut combined = items;
        combined.extend(array);
        let len = combined.len();
        self.apply_shuffle(node, &indices, combined)?;
        Ok(len)
    }

    /// Removes `delete_count` members at `start` and inserts `items` there.
    /// Returns the removed members.
    pub fn splice(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let (node, mut array) = self.array_at(vm, keypath)?;
        let start = start.min(array.len());
        let end = start.saturating_add(delete_count).min(array.len());
        let indices = splice_indices(array.len(), start, end - start, items.len());
        let removed: Vec<Value> = array.splice(start..end, items).collect();
        self.apply_shuffle(node, &indices, array)?;
        Ok(removed)
    }

    pub fn reverse(&mut self, vm: ViewmodelId, keypath: &str) -> Result<(), StoreError> {
        let (node, mut array) = self.array_at(vm, keypath)?;
        let indices = reverse_indices(array.len());
        array.reverse();
        self.apply_shuffle(node, &indices, array)
    }

    /// Stable sort by `compare`.
    pub fn sort_by(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        mut compare: impl FnMut(&Value, &Value) -> Ordering,
    ) -> Result<(), StoreError> {
        let (node, array) = self.array_at(vm, keypath)?;
        let mut order: Vec<usize> = (0..array.len()).collect();
        order.sort_by(|a, b| compare(&array[*a], &array[*b]));
        let indices = sort_indices(&order);
        let sorted = order.iter().map(|&i| array[i].clone()).collect();
        self.apply_shuffle(node, &indices, sorted)
    }

    /// Replaces the array, matching members by value so that surviving
    /// members keep their nodes.
    pub fn merge(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        items: Vec<Value>,
    ) -> Result<(), StoreError> {
        let (node, array) = self.array_at(vm, keypath)?;
        let indices = merge_indices(&array, &items);
        self.apply_shuffle(node, &indices, items)
    }

    fn array_at(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
    ) -> Result<(NodeId, Vec<Value>), StoreError> {
        let node = self.node_at(vm, keypath)?;
        if self.is_readonly(node) {
            return Err(StoreError::ReadOnlyViolation {
                keypath: self.keypath_of(node),
            });
        }
        self.freshen(node);
        match self.peek(node) {
            Some(Value::Array(items)) => Ok((node, items)),
            _ => Err(StoreError::NotAnArray {
                keypath: self.keypath_of(node),
            }),
        }
    }

    /// Re-keys the children of the array at `node`, writes `array` and marks
    /// the array. Moved members are kept out of the cascade; their
    /// dependents get `Shifted` and removed members' dependents `Removed`.
    pub(crate) fn apply_shuffle(
        &mut self,
        node: NodeId,
        new_indices: &[Option<usize>],
        array: Vec<Value>,
    ) -> Result<(), StoreError> {
        let target = self.resolve_mapping(node);
        if self.anchor_path(target).is_none() {
            return Err(StoreError::invalid(self.keypath_of(node), "node is detached"));
        }
        let old = self.peek(target);
        self.node_events += 1;

        self.start(false);
        let moved = self.rekey_children(target, new_indices);
        let written = self.store_value(target, Some(Value::Array(array)));
        if written.is_ok() {
            self.mark_changed(target, old, false);
        }
        for child in moved {
            self.runloop.remove_no_cascade(child);
        }
        self.end();
        written
    }

    fn rekey_children(&mut self, array: NodeId, new_indices: &[Option<usize>]) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.node_mut(array).children);
        let mut rebuilt = IndexMap::with_capacity(children.len());
        // (index, moved, node); moved members win a clash with stale nodes
        let mut indexed: Vec<(usize, bool, NodeId)> = Vec::new();
        let mut moved = Vec::new();

        for (key, child) in children {
            let Some(old_index) = parse_index(&key) else {
                rebuilt.insert(key, child);
                continue;
            };
            match new_indices.get(old_index) {
                // past the old end; nothing to move
                None => indexed.push((old_index, false, child)),
                Some(Some(new_index)) if *new_index == old_index => {
                    indexed.push((old_index, false, child));
                }
                Some(Some(new_index)) => {
                    self.record_subtree(
                        child,
                        ChangeKind::Shifted {
                            from: old_index,
                            to: *new_index,
                        },
                    );
                    self.runloop.add_no_cascade(child);
                    self.node_mut(child).key = new_index.to_string();
                    moved.push(child);
                    indexed.push((*new_index, true, child));
                }
                Some(None) => self.remove_subtree(child),
            }
        }

        indexed.sort_by_key(|(index, was_moved, _)| (*index, *was_moved));
        for (index, _, child) in indexed {
            if let Some(stale) = rebuilt.insert(index.to_string(), child) {
                self.remove_subtree(stale);
            }
        }
        self.node_mut(array).children = rebuilt;
        moved
    }

    fn record_subtree(&mut self, node: NodeId, kind: ChangeKind) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            self.runloop.record(current, kind);
            stack.extend(self.node(current).children.values().copied());
        }
    }

    fn remove_subtree(&mut self, node: NodeId) {
        self.record_subtree(node, ChangeKind::Removed);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let n = self.node_mut(current);
            n.detached = true;
            stack.extend(n.children.values().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_splice_insertion_shifts_tail() {
        assert_eq!(
            splice_indices(4, 1, 2, 1),
            vec![Some(0), None, None, Some(2)]
        );
    }

    #[test]
    fn test_splice_clamps_out_of_range() {
        assert_eq!(splice_indices(2, 5, 3, 0), vec![Some(0), Some(1)]);
        assert_eq!(splice_indices(3, 1, usize::MAX, 0), vec![Some(0), None, None]);
    }

    #[test]
    fn test_reverse_and_sort_mappings() {
        assert_eq!(reverse_indices(3), vec![Some(2), Some(1), Some(0)]);
        // new order is [old 2, old 0, old 1]
        assert_eq!(sort_indices(&[2, 0, 1]), vec![Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn test_replace_keeps_unmatched_positions_in_range() {
        let old = [json!("a"), json!("b")];
        assert_eq!(replace_indices(&old, &[json!("x"), json!("b")]), vec![Some(0), Some(1)]);
        // position 0 is taken by the moved "b"
        assert_eq!(replace_indices(&old, &[json!("b"), json!("y")]), vec![None, Some(0)]);
        assert_eq!(replace_indices(&old, &[json!("b")]), vec![None, Some(0)]);
        assert_eq!(replace_indices(&old, &[json!("x")]), vec![Some(0), None]);
    }

    #[test]
    fn test_merge_drops_missing_members() {
        let old = [json!(1), json!(2), json!(3)];
        let new = [json!(3), json!(1)];
        assert_eq!(merge_indices(&old, &new), vec![Some(1), None, Some(0)]);
    }
}
