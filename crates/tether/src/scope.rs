//! Lexical context chain.
//!
//! The view layer describes its fragment tree to the store as scopes. Each
//! scope knows its lexical parent, an optional component parent (the scope
//! hosting the component instance it belongs to), its context node and,
//! for repeated-block iterations, the iteration's index and key.

use crate::store::{NodeId, ViewmodelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One iteration of a repeated block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Iteration {
    pub index: usize,
    /// Object key for keyed iteration; arrays use the index.
    pub key: Option<String>,
    /// Name bound to the index (`{{#each items:i}}`).
    pub index_ref: Option<String>,
    /// Name bound to the key (`{{#each obj:k}}`).
    pub key_ref: Option<String>,
}

impl Iteration {
    pub fn indexed(index: usize, index_ref: impl Into<String>) -> Self {
        Self {
            index,
            index_ref: Some(index_ref.into()),
            ..Self::default()
        }
    }

    pub fn keyed(index: usize, key: impl Into<String>, key_ref: impl Into<String>) -> Self {
        Self {
            index,
            key: Some(key.into()),
            key_ref: Some(key_ref.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSpec {
    pub viewmodel: ViewmodelId,
    pub parent: Option<ScopeId>,
    pub component_parent: Option<ScopeId>,
    pub context: Option<NodeId>,
    pub is_root: bool,
    pub iteration: Option<Iteration>,
}

impl ScopeSpec {
    /// The root fragment of a viewmodel; `context` is normally its root node.
    pub fn root(viewmodel: ViewmodelId, context: NodeId) -> Self {
        Self {
            viewmodel,
            parent: None,
            component_parent: None,
            context: Some(context),
            is_root: true,
            iteration: None,
        }
    }

    /// A nested fragment. `context` is `None` for fragments that inherit
    /// their parent's context.
    pub fn child(viewmodel: ViewmodelId, parent: ScopeId, context: Option<NodeId>) -> Self {
        Self {
            viewmodel,
            parent: Some(parent),
            component_parent: None,
            context,
            is_root: false,
            iteration: None,
        }
    }

    pub fn with_iteration(mut self, iteration: Iteration) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_component_parent(mut self, host: ScopeId) -> Self {
        self.component_parent = Some(host);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub spec: ScopeSpec,
    pub index_node: Option<NodeId>,
    pub key_node: Option<NodeId>,
}

impl Scope {
    pub(crate) fn new(spec: ScopeSpec) -> Self {
        Self {
            spec,
            index_node: None,
            key_node: None,
        }
    }
}
