//! Reactive model store.
//!
//! # Overview
//!
//! A [`Store`] owns every model node of every viewmodel in an arena indexed
//! by [`NodeId`]. Nodes are materialized lazily the first time a keypath is
//! walked and are canonical: the same (viewmodel, keypath) always yields the
//! same id, so dependents can be registered on a node and compared by id.
//!
//! Values live in the root node of each viewmodel as one `serde_json::Value`
//! tree. A plain node reads its value by walking up to its nearest anchor
//! (the root, a computed or synthetic node, or a mapping) and descending
//! with its keys. Mapped nodes hold no storage of their own; reads and
//! writes pass through to the mapping target.
//!
//! Writes are synchronous. Marking a node fires matching observers at once
//! and records the node in the open batch; dependents are notified when the
//! outermost batch unwinds (see [`crate::runloop`]).

mod adapt;
mod computed;
mod graph;
mod mark;
mod resolve;
mod shuffle;

pub use adapt::Adaptor;
pub use computed::{ComputeContext, Getter};
pub use resolve::ResolveCallback;
pub use shuffle::{
    merge_indices, replace_indices, reverse_indices, sort_indices, splice_indices,
};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::{StoreConfig, ViewmodelOptions};
use crate::dependent::{Dependent, NodeChange};
use crate::error::StoreError;
use crate::observer::Observer;
use crate::reference::{ExpressionFn, Reference, Signature};
use crate::runloop::{BatchPromise, Liveness, Runloop, Task};
use crate::scope::{Scope, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewmodelId(pub(crate) u32);

impl ViewmodelId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(pub(crate) u32);

pub(crate) enum NodeKind {
    /// Viewmodel root; owns the data tree.
    Root { data: Value },
    /// Reads and writes a slot of its anchor's value.
    Plain,
    Computed {
        getter: Getter,
        cached: Option<Value>,
        dirty: bool,
        deps: Vec<NodeId>,
        computing: bool,
    },
    /// Alias of a node, usually in another viewmodel.
    Mapped(NodeId),
    Index { value: usize },
    Key { value: String },
    Expression {
        deps: Vec<NodeId>,
        compute: ExpressionFn,
        cached: Option<Value>,
        dirty: bool,
    },
}

impl NodeKind {
    /// True for nodes whose value is derived and cannot be written.
    pub(crate) fn is_readonly(&self) -> bool {
        matches!(
            self,
            NodeKind::Computed { .. }
                | NodeKind::Index { .. }
                | NodeKind::Key { .. }
                | NodeKind::Expression { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "root",
            NodeKind::Plain => "plain",
            NodeKind::Computed { .. } => "computed",
            NodeKind::Mapped(_) => "mapped",
            NodeKind::Index { .. } => "index",
            NodeKind::Key { .. } => "key",
            NodeKind::Expression { .. } => "expression",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Mapped(target) => write!(f, "Mapped({target:?})"),
            NodeKind::Index { value } => write!(f, "Index({value})"),
            NodeKind::Key { value } => write!(f, "Key({value:?})"),
            other => f.write_str(other.name()),
        }
    }
}

pub(crate) struct Node {
    pub viewmodel: ViewmodelId,
    pub key: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    pub kind: NodeKind,
    pub dependents: Vec<Rc<dyn Dependent>>,
    /// Nodes mapped onto this one.
    pub mapped_by: Vec<NodeId>,
    /// Computed and expression nodes that read this one.
    pub downstream: Vec<NodeId>,
    /// Explicitly written, even with undefined.
    pub assigned: bool,
    /// Removed from its array by a shuffle or torn down with its viewmodel.
    pub detached: bool,
}

impl Node {
    fn new(viewmodel: ViewmodelId, key: String, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            viewmodel,
            key,
            parent,
            children: IndexMap::new(),
            kind,
            dependents: Vec::new(),
            mapped_by: Vec::new(),
            downstream: Vec::new(),
            assigned: false,
            detached: false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("viewmodel", &self.viewmodel)
            .field("key", &self.key)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("children", &self.children.len())
            .field("dependents", &self.dependents.len())
            .finish()
    }
}

pub(crate) struct Viewmodel {
    pub root: NodeId,
    pub component: bool,
    pub isolated: bool,
    pub adaptors: Vec<Rc<dyn Adaptor>>,
    /// Expression nodes keyed by label and dependency ids.
    pub expressions: HashMap<(String, Vec<NodeId>), NodeId>,
    pub alive: bool,
}

pub(crate) enum ResolverState {
    Pending,
    Resolved(NodeId),
    Unbound,
}

pub(crate) struct ResolverSlot {
    pub scope: ScopeId,
    pub reference: Reference,
    pub callback: Option<ResolveCallback>,
    pub state: ResolverState,
}

pub struct Store {
    pub(crate) config: StoreConfig,
    pub(crate) nodes: Vec<Node>,
    pub(crate) viewmodels: Vec<Viewmodel>,
    pub(crate) scopes: Vec<Option<Scope>>,
    pub(crate) resolvers: Vec<ResolverSlot>,
    /// Unresolved resolvers in registration order.
    pub(crate) pending: Vec<ResolverId>,
    pub(crate) observers: BTreeMap<u64, Observer>,
    pub(crate) next_observer: u64,
    pub(crate) functions: HashMap<String, ExpressionFn>,
    pub(crate) runloop: Runloop,
    /// Bumped on node creation and mapping; pending resolvers are retried
    /// when it moves.
    pub(crate) node_events: u64,
    pub(crate) retried_at: u64,
    pub(crate) retrying: bool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("nodes", &self.nodes.len())
            .field("viewmodels", &self.viewmodels.len())
            .field("pending", &self.pending.len())
            .field("observers", &self.observers.len())
            .field("runloop", &self.runloop)
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            viewmodels: Vec::new(),
            scopes: Vec::new(),
            resolvers: Vec::new(),
            pending: Vec::new(),
            observers: BTreeMap::new(),
            next_observer: 0,
            functions: HashMap::new(),
            runloop: Runloop::new(),
            node_events: 0,
            retried_at: 0,
            retrying: false,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ── Viewmodels ─────────────────────────────────────────────────────────

    pub fn create_viewmodel(&mut self, options: ViewmodelOptions) -> ViewmodelId {
        let id = ViewmodelId(self.viewmodels.len() as u32);
        let root = self.alloc(Node::new(
            id,
            String::new(),
            None,
            NodeKind::Root { data: options.data },
        ));
        self.viewmodels.push(Viewmodel {
            root,
            component: options.component,
            isolated: options.isolated,
            adaptors: Vec::new(),
            expressions: HashMap::new(),
            alive: true,
        });
        tracing::debug!(viewmodel = id.0, "viewmodel created");
        id
    }

    pub fn root(&self, vm: ViewmodelId) -> Result<NodeId, StoreError> {
        Ok(self.viewmodel(vm)?.root)
    }

    /// Tears a viewmodel down: its observers, scopes and resolvers are
    /// dropped and its nodes are detached from any mapping targets.
    pub fn teardown_viewmodel(&mut self, vm: ViewmodelId) -> Result<(), StoreError> {
        self.viewmodel(vm)?;
        self.observers.retain(|_, observer| observer.viewmodel != vm);

        let resolvers: Vec<ResolverId> = self
            .resolvers
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                self.scopes
                    .get(slot.scope.0 as usize)
                    .and_then(Option::as_ref)
                    .map_or(false, |scope| scope.spec.viewmodel == vm)
            })
            .map(|(i, _)| ResolverId(i as u32))
            .collect();
        for id in resolvers {
            self.unbind(id);
        }
        for slot in self.scopes.iter_mut() {
            if slot.as_ref().map_or(false, |s| s.spec.viewmodel == vm) {
                *slot = None;
            }
        }

        let owned: HashSet<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.viewmodel == vm)
            .map(|(i, _)| NodeId(i as u32))
            .collect();
        for node in self.nodes.iter_mut() {
            if node.viewmodel == vm {
                node.detached = true;
                node.dependents.clear();
                node.downstream.clear();
                node.mapped_by.clear();
            } else {
                // links from surviving nodes into the torn-down viewmodel
                node.downstream.retain(|d| !owned.contains(d));
                node.mapped_by.retain(|m| !owned.contains(m));
            }
        }
        if let Some(model) = self.viewmodels.get_mut(vm.0 as usize) {
            model.alive = false;
            model.expressions.clear();
            model.adaptors.clear();
        }
        tracing::debug!(viewmodel = vm.0, "viewmodel torn down");
        Ok(())
    }

    // ── Batches ────────────────────────────────────────────────────────────

    /// Opens a batch. With `wants_promise` the returned handle is fulfilled
    /// once the outermost batch has flushed.
    pub fn start(&mut self, wants_promise: bool) -> Option<BatchPromise> {
        if !self.runloop.is_batching() && !self.runloop.is_flushing() {
            tracing::debug!("batch opened");
        }
        self.runloop.start(wants_promise)
    }

    /// Closes a batch; the outermost `end` flushes dependents and tasks.
    pub fn end(&mut self) {
        if self.runloop.end() {
            self.flush();
        }
    }

    pub fn depth(&self) -> usize {
        self.runloop.depth()
    }

    pub fn is_batching(&self) -> bool {
        self.runloop.is_batching()
    }

    pub fn runloop(&self) -> &Runloop {
        &self.runloop
    }

    /// Queues `task` for the next unwind. Outside any batch it runs now.
    ///
    /// A task whose `owner` has been killed by then is skipped.
    pub fn schedule_task(
        &mut self,
        owner: Option<Liveness>,
        task: impl FnOnce(&mut Store) + 'static,
    ) {
        let task = Task::new(owner, Box::new(task));
        if self.runloop.is_batching() || self.runloop.is_flushing() {
            self.runloop.schedule(task);
        } else if let Some(run) = task.into_live() {
            run(self);
        }
    }

    fn flush(&mut self) {
        self.runloop.begin_flush();
        let mut passes = 0;
        loop {
            // resolver callbacks may queue more changes and tasks
            self.retry_pending();
            if !self.runloop.has_work() {
                break;
            }
            if passes >= self.config.max_flush_passes {
                tracing::warn!(passes, "flush did not settle; remaining work deferred");
                break;
            }
            passes += 1;

            for change in self.runloop.take_changes() {
                let dependents = self.node(change.node).dependents.clone();
                if dependents.is_empty() {
                    continue;
                }
                self.freshen(change.node);
                let notice = NodeChange {
                    node: change.node,
                    keypath: self.keypath_of(change.node),
                    kind: change.kind,
                    value: self.peek(change.node),
                };
                for dependent in dependents {
                    dependent.handle_change(&notice);
                }
            }

            for task in self.runloop.take_tasks() {
                if let Some(run) = task.into_live() {
                    run(self);
                }
            }
        }
        tracing::debug!(passes, "batch flushed");
        self.runloop.finish_flush();
    }

    // ── Dependents ─────────────────────────────────────────────────────────

    pub fn register_dependent(
        &mut self,
        node: NodeId,
        dependent: Rc<dyn Dependent>,
    ) -> Result<(), StoreError> {
        self.check_node(node)?;
        self.nodes[node.0 as usize].dependents.push(dependent);
        Ok(())
    }

    /// Removes `dependent` from `node`. Returns whether it was registered.
    pub fn unregister_dependent(
        &mut self,
        node: NodeId,
        dependent: &Rc<dyn Dependent>,
    ) -> Result<bool, StoreError> {
        self.check_node(node)?;
        let dependents = &mut self.nodes[node.0 as usize].dependents;
        let before = dependents.len();
        dependents.retain(|d| !same_dependent(d, dependent));
        Ok(dependents.len() != before)
    }

    pub fn dependent_count(&self, node: NodeId) -> Result<usize, StoreError> {
        self.check_node(node)?;
        Ok(self.nodes[node.0 as usize].dependents.len())
    }

    // ── Functions ──────────────────────────────────────────────────────────

    /// Registers a function callable from `Reference::Call`.
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: impl Fn(&[Option<Value>]) -> Option<Value> + 'static,
    ) {
        self.functions.insert(name.into(), Rc::new(function));
    }

    pub(crate) fn function_signature(&self, name: &str) -> Result<Signature, StoreError> {
        let compute = self
            .functions
            .get(name)
            .ok_or_else(|| StoreError::UnknownFunction {
                name: name.to_string(),
            })?;
        Ok(Signature {
            label: name.to_string(),
            compute: Rc::clone(compute),
        })
    }

    // ── Arena helpers ──────────────────────────────────────────────────────

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        tracing::trace!(node = id.0, key = %node.key, kind = node.kind.name(), "node created");
        self.nodes.push(node);
        self.node_events += 1;
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn check_node(&self, id: NodeId) -> Result<(), StoreError> {
        if (id.0 as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(StoreError::UnknownNode(id.0))
        }
    }

    pub(crate) fn viewmodel(&self, vm: ViewmodelId) -> Result<&Viewmodel, StoreError> {
        self.viewmodels
            .get(vm.0 as usize)
            .filter(|model| model.alive)
            .ok_or(StoreError::UnknownViewmodel(vm.0))
    }

    pub(crate) fn viewmodel_mut(&mut self, vm: ViewmodelId) -> Result<&mut Viewmodel, StoreError> {
        self.viewmodels
            .get_mut(vm.0 as usize)
            .filter(|model| model.alive)
            .ok_or(StoreError::UnknownViewmodel(vm.0))
    }

    /// Follows mapping links to the node that owns the storage.
    pub(crate) fn resolve_mapping(&self, mut id: NodeId) -> NodeId {
        let mut hops = 0;
        while let NodeKind::Mapped(target) = self.node(id).kind {
            if target == id || hops > self.nodes.len() {
                break;
            }
            id = target;
            hops += 1;
        }
        id
    }

    /// The viewmodel the node belongs to.
    pub fn viewmodel_of(&self, node: NodeId) -> Result<ViewmodelId, StoreError> {
        self.check_node(node)?;
        Ok(self.node(node).viewmodel)
    }

    pub(crate) fn warn_enabled(&self) -> bool {
        self.config.debug
    }
}

fn same_dependent(a: &Rc<dyn Dependent>, b: &Rc<dyn Dependent>) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a) as *const (),
        Rc::as_ptr(b) as *const (),
    )
}
