//! Batch scheduler state.
//!
//! A batch is opened by `start` and closed by the matching `end`; nesting is
//! tracked with a depth counter, so nested pairs coalesce into one logical
//! batch. While a batch is open, marked nodes accumulate in the change list
//! and tasks accumulate in the task queue. When the depth returns to zero the
//! owning store flushes: dependents first, then tasks, then batch promises.
//!
//! The scheduler itself holds no reference to the store; `Store` drives it.

use std::cell::Cell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::dependent::ChangeKind;
use crate::store::{NodeId, Store};

/// Liveness token for objects that schedule tasks.
///
/// A task whose owner was killed before the flush is skipped. The queue is
/// never edited mid-flush.
#[derive(Debug, Clone)]
pub struct Liveness(Rc<Cell<bool>>);

impl Liveness {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.get()
    }

    pub fn kill(&self) {
        self.0.set(false);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Settleable handle returned by `start(.., true)`; fulfilled once the
/// batch fully unwinds and flushes.
#[derive(Debug, Clone, Default)]
pub struct BatchPromise(Rc<Cell<bool>>);

impl BatchPromise {
    pub fn is_fulfilled(&self) -> bool {
        self.0.get()
    }

    fn fulfil(&self) {
        self.0.set(true);
    }
}

pub(crate) type TaskFn = Box<dyn FnOnce(&mut Store)>;

pub(crate) struct Task {
    owner: Option<Liveness>,
    run: TaskFn,
}

impl Task {
    pub(crate) fn new(owner: Option<Liveness>, run: TaskFn) -> Self {
        Self { owner, run }
    }

    /// Returns the closure if the owner is still alive.
    pub(crate) fn into_live(self) -> Option<TaskFn> {
        match &self.owner {
            Some(owner) if !owner.is_alive() => None,
            _ => Some(self.run),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("owner_alive", &self.owner.as_ref().map(Liveness::is_alive))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PendingChange {
    pub node: NodeId,
    pub kind: ChangeKind,
}

#[derive(Debug, Default)]
pub struct Runloop {
    depth: usize,
    flushing: bool,
    changes: IndexSet<PendingChange>,
    no_cascade: HashSet<NodeId>,
    tasks: VecDeque<Task>,
    promises: Vec<BatchPromise>,
    batches: u64,
}

impl Runloop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Number of outermost batches opened so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub(crate) fn start(&mut self, wants_promise: bool) -> Option<BatchPromise> {
        if self.depth == 0 && !self.flushing {
            self.no_cascade.clear();
            self.batches = self.batches.saturating_add(1);
        }
        self.depth += 1;
        if wants_promise {
            let promise = BatchPromise::default();
            self.promises.push(promise.clone());
            Some(promise)
        } else {
            None
        }
    }

    /// Closes one level. Returns `true` when the caller must flush.
    pub(crate) fn end(&mut self) -> bool {
        if self.depth == 0 {
            tracing::warn!("runloop end() called without a matching start()");
            return false;
        }
        self.depth -= 1;
        self.depth == 0 && !self.flushing
    }

    pub(crate) fn record(&mut self, node: NodeId, kind: ChangeKind) {
        self.changes.insert(PendingChange { node, kind });
    }

    pub(crate) fn add_no_cascade(&mut self, node: NodeId) {
        self.no_cascade.insert(node);
    }

    pub(crate) fn remove_no_cascade(&mut self, node: NodeId) {
        self.no_cascade.remove(&node);
    }

    pub(crate) fn is_no_cascade(&self, node: NodeId) -> bool {
        self.no_cascade.contains(&node)
    }

    pub(crate) fn schedule(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.changes.is_empty() || !self.tasks.is_empty()
    }

    pub(crate) fn begin_flush(&mut self) {
        self.flushing = true;
    }

    pub(crate) fn take_changes(&mut self) -> Vec<PendingChange> {
        std::mem::take(&mut self.changes).into_iter().collect()
    }

    pub(crate) fn take_tasks(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }

    /// Ends the flush and fulfils every promise handed out so far.
    pub(crate) fn finish_flush(&mut self) {
        self.flushing = false;
        self.no_cascade.clear();
        for promise in self.promises.drain(..) {
            promise.fulfil();
        }
    }
}
