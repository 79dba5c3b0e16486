//! Keypath observers.
//!
//! An observer watches an exact keypath (`user.name`) or a pattern with `*`
//! segments (`items.*.done`) in one viewmodel. It remembers the last value
//! it saw for every concrete keypath the pattern expands to, and fires
//! synchronously, in registration order, whenever a mark touches a related
//! keypath whose value actually moved.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;
use tether_keypath::{is_related, join_keypath, split_keypath, WILDCARD};

use crate::error::StoreError;
use crate::store::{Store, ViewmodelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

/// One firing of an observer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub keypath: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Fire once with the current value(s) on registration.
    pub init: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self { init: true }
    }
}

pub type ObserverFn = Box<dyn FnMut(&mut Store, &Observation)>;

pub(crate) struct Observer {
    pub viewmodel: ViewmodelId,
    pub pattern: Vec<String>,
    /// Taken out while the callback runs; a reentrant firing finds it empty.
    pub callback: Option<ObserverFn>,
    pub last: IndexMap<Vec<String>, Value>,
}

impl Observer {
    pub(crate) fn relates_to(&self, keypath: &[String]) -> bool {
        is_related(&self.pattern, keypath)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("viewmodel", &self.viewmodel)
            .field("pattern", &join_keypath(&self.pattern))
            .field("last", &self.last.len())
            .finish()
    }
}

impl Store {
    pub fn observe(
        &mut self,
        vm: ViewmodelId,
        keypath: &str,
        callback: impl FnMut(&mut Store, &Observation) + 'static,
        options: ObserveOptions,
    ) -> Result<ObserverId, StoreError> {
        self.viewmodel(vm)?;
        let pattern = split_keypath(keypath)?;
        let id = self.next_observer;
        self.next_observer += 1;

        let mut last = IndexMap::new();
        let mut initial = Vec::new();
        for path in self.expand_pattern(vm, &pattern) {
            let value = self.value_at(vm, &path);
            if let Some(value) = &value {
                last.insert(path.clone(), value.clone());
            }
            initial.push((path, value));
        }
        self.observers.insert(
            id,
            Observer {
                viewmodel: vm,
                pattern,
                callback: Some(Box::new(callback)),
                last,
            },
        );

        if options.init {
            for (path, value) in initial {
                self.fire_observer(
                    id,
                    Observation {
                        new: value,
                        old: None,
                        keypath: join_keypath(&path),
                    },
                );
            }
        }
        Ok(ObserverId(id))
    }

    /// Returns whether the observer was still registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id.0).is_some()
    }

    /// Compares every keypath the observer covers with what it last saw and
    /// fires for each difference.
    pub(crate) fn evaluate_observer(&mut self, id: u64) {
        let Some(observer) = self.observers.get(&id) else {
            return;
        };
        let vm = observer.viewmodel;
        let pattern = observer.pattern.clone();
        let known: Vec<Vec<String>> = observer.last.keys().cloned().collect();

        let mut paths = self.expand_pattern(vm, &pattern);
        for path in known {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        for path in paths {
            let value = self.value_at(vm, &path);
            let Some(observer) = self.observers.get_mut(&id) else {
                return;
            };
            let old = observer.last.get(&path).cloned();
            if old == value {
                continue;
            }
            match &value {
                Some(value) => {
                    observer.last.insert(path.clone(), value.clone());
                }
                None => {
                    observer.last.shift_remove(&path);
                }
            }
            self.fire_observer(
                id,
                Observation {
                    new: value,
                    old,
                    keypath: join_keypath(&path),
                },
            );
        }
    }

    fn fire_observer(&mut self, id: u64, observation: Observation) {
        let Some(mut callback) = self
            .observers
            .get_mut(&id)
            .and_then(|observer| observer.callback.take())
        else {
            tracing::trace!(observer = id, keypath = %observation.keypath, "reentrant firing skipped");
            return;
        };
        callback(self, &observation);
        if let Some(observer) = self.observers.get_mut(&id) {
            if observer.callback.is_none() {
                observer.callback = Some(callback);
            }
        }
    }

    /// Concrete keypaths a pattern currently covers.
    fn expand_pattern(&mut self, vm: ViewmodelId, pattern: &[String]) -> Vec<Vec<String>> {
        let mut paths: Vec<Vec<String>> = vec![Vec::new()];
        for segment in pattern {
            if segment != WILDCARD {
                for path in &mut paths {
                    path.push(segment.clone());
                }
                continue;
            }
            let mut expanded = Vec::new();
            for base in paths {
                let keys: Vec<String> = match self.value_at(vm, &base) {
                    Some(Value::Object(map)) => map.keys().cloned().collect(),
                    Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
                    _ => Vec::new(),
                };
                for key in keys {
                    let mut path = base.clone();
                    path.push(key);
                    expanded.push(path);
                }
            }
            paths = expanded;
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewmodelOptions;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn store_with(data: Value) -> (Store, ViewmodelId) {
        let mut store = Store::default();
        let vm = store.create_viewmodel(ViewmodelOptions::with_data(data));
        (store, vm)
    }

    #[test]
    fn test_init_fires_with_current_value() {
        let (mut store, vm) = store_with(json!({"a": 1}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        store
            .observe(vm, "a", move |_, o| log.borrow_mut().push(o.clone()), ObserveOptions::default())
            .unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Observation {
                new: Some(json!(1)),
                old: None,
                keypath: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_pattern_fires_per_changed_member() {
        let (mut store, vm) = store_with(json!({"items": [{"done": false}, {"done": false}]}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        store
            .observe(
                vm,
                "items.*.done",
                move |_, o| log.borrow_mut().push(o.keypath.clone()),
                ObserveOptions { init: false },
            )
            .unwrap();
        store.set(vm, "items.1.done", json!(true)).unwrap();
        assert_eq!(*seen.borrow(), vec!["items.1.done".to_string()]);
    }

    #[test]
    fn test_unobserve_stops_firing() {
        let (mut store, vm) = store_with(json!({"a": 1}));
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let id = store
            .observe(vm, "a", move |_, _| *c.borrow_mut() += 1, ObserveOptions { init: false })
            .unwrap();
        assert!(store.unobserve(id));
        store.set(vm, "a", json!(2)).unwrap();
        assert_eq!(*count.borrow(), 0);
        assert!(!store.unobserve(id));
    }

    #[test]
    fn test_reentrant_set_does_not_refire() {
        let (mut store, vm) = store_with(json!({"a": 1}));
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        store
            .observe(
                vm,
                "a",
                move |store, o| {
                    *c.borrow_mut() += 1;
                    if o.new == Some(json!(2)) {
                        store.set(vm, "a", json!(3)).unwrap();
                    }
                },
                ObserveOptions { init: false },
            )
            .unwrap();
        store.set(vm, "a", json!(2)).unwrap();
        assert_eq!(*count.borrow(), 1);
        assert_eq!(store.get(vm, "a").unwrap(), Some(json!(3)));
    }
}
