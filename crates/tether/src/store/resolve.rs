//! Reference resolution.
//!
//! A resolver binds a [`Reference`] used inside a scope to exactly one node.
//! Resolution is attempted at once; a reference that cannot be resolved yet
//! stays pending and is retried, in registration order, whenever nodes are
//! created, keys come into existence or mappings are added. The callback
//! runs at most once.
//!
//! Plain names go through the ambiguous-reference walk:
//!
//! 1. an enclosing iteration whose index or key reference has that name;
//! 2. a context that has the key, mapping it into the local viewmodel when
//!    the walk crossed a component boundary;
//! 3. otherwise ascend, through the component host unless the instance is
//!    isolated, else through the lexical parent.
//!
//! A walk that runs out without passing any non-root or open component
//! context falls back to the local viewmodel root; otherwise the reference
//! stays pending.

use serde_json::Value;
use tether_keypath::{join_keypath, split_keypath};

use super::{Node, NodeId, NodeKind, ResolverId, ResolverSlot, ResolverState, Store, ViewmodelId};
use crate::error::StoreError;
use crate::reference::{Member, Reference};
use crate::scope::{Scope, ScopeId, ScopeSpec};

pub type ResolveCallback = Box<dyn FnOnce(&mut Store, NodeId)>;

impl Store {
    // ── Scopes ─────────────────────────────────────────────────────────────

    pub fn add_scope(&mut self, spec: ScopeSpec) -> Result<ScopeId, StoreError> {
        self.viewmodel(spec.viewmodel)?;
        for linked in [spec.parent, spec.component_parent].into_iter().flatten() {
            self.scope(linked)?;
        }
        if let Some(context) = spec.context {
            self.check_node(context)?;
        }
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Some(Scope::new(spec)));
        Ok(id)
    }

    /// Root scope of `vm`, with the viewmodel root as its context.
    pub fn root_scope(&mut self, vm: ViewmodelId) -> Result<ScopeId, StoreError> {
        let root = self.root(vm)?;
        self.add_scope(ScopeSpec::root(vm, root))
    }

    /// Drops a scope, unbinding the resolvers registered in it.
    pub fn remove_scope(&mut self, id: ScopeId) -> Result<(), StoreError> {
        let scope = self.scope(id)?.clone();
        let owned: Vec<ResolverId> = self
            .resolvers
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.scope == id)
            .map(|(i, _)| ResolverId(i as u32))
            .collect();
        for resolver in owned {
            self.unbind(resolver);
        }
        for node in [scope.index_node, scope.key_node].into_iter().flatten() {
            self.node_mut(node).detached = true;
        }
        self.scopes[id.0 as usize] = None;
        Ok(())
    }

    /// Moves an iteration scope to a new index (and key), updating its
    /// `@index`/`@key` nodes.
    pub fn set_iteration_index(
        &mut self,
        id: ScopeId,
        index: usize,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        let scope = self.scope_mut(id)?;
        let iteration = scope.spec.iteration.as_mut().ok_or_else(|| {
            StoreError::invalid(format!("scope {}", id.0), "scope is not an iteration")
        })?;
        iteration.index = index;
        if key.is_some() {
            iteration.key = key;
        }
        let key_value = iteration.key.clone().unwrap_or_else(|| index.to_string());
        let (index_node, key_node) = (scope.index_node, scope.key_node);

        if let Some(node) = index_node {
            self.update_synthetic(node, NodeKind::Index { value: index });
        }
        if let Some(node) = key_node {
            self.update_synthetic(node, NodeKind::Key { value: key_value });
        }
        Ok(())
    }

    fn update_synthetic(&mut self, node: NodeId, kind: NodeKind) {
        let old = self.peek(node);
        self.node_mut(node).kind = kind;
        if old != self.peek(node) {
            self.mark_changed(node, old, false);
        }
    }

    pub(crate) fn scope(&self, id: ScopeId) -> Result<&Scope, StoreError> {
        self.scopes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StoreError::UnknownScope(id.0))
    }

    fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope, StoreError> {
        self.scopes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StoreError::UnknownScope(id.0))
    }

    /// Innermost context node along the lexical chain, or the viewmodel
    /// root.
    pub fn context_of(&self, id: ScopeId) -> Result<NodeId, StoreError> {
        let vm = self.scope(id)?.spec.viewmodel;
        let mut current = Some(id);
        while let Some(sid) = current {
            let scope = self.scope(sid)?;
            if let Some(context) = scope.spec.context {
                return Ok(context);
            }
            current = scope.spec.parent;
        }
        self.root(vm)
    }

    /// `@index` (or `@key` with `key`) of the nearest enclosing iteration.
    fn iteration_node(&mut self, id: ScopeId, key: bool) -> Result<Option<NodeId>, StoreError> {
        let mut current = Some(id);
        while let Some(sid) = current {
            let scope = self.scope(sid)?;
            if scope.spec.iteration.is_some() {
                return self.synthetic_node(sid, key).map(Some);
            }
            current = scope.spec.parent;
        }
        Ok(None)
    }

    fn synthetic_node(&mut self, id: ScopeId, key: bool) -> Result<NodeId, StoreError> {
        let scope = self.scope(id)?;
        let existing = if key { scope.key_node } else { scope.index_node };
        if let Some(node) = existing {
            return Ok(node);
        }
        let vm = scope.spec.viewmodel;
        let iteration = scope.spec.iteration.clone().unwrap_or_default();
        let node = if key {
            let value = iteration.key.unwrap_or_else(|| iteration.index.to_string());
            self.alloc(Node::new(vm, "@key".to_string(), None, NodeKind::Key { value }))
        } else {
            let value = iteration.index;
            self.alloc(Node::new(vm, "@index".to_string(), None, NodeKind::Index { value }))
        };
        let scope = self.scope_mut(id)?;
        if key {
            scope.key_node = Some(node);
        } else {
            scope.index_node = Some(node);
        }
        Ok(node)
    }

    // ── Mapping ────────────────────────────────────────────────────────────

    /// Aliases root `key` of `vm` to `target`. Reads and writes of the
    /// alias go to the target, and changes to the target reach the alias's
    /// dependents and observers.
    pub fn map(&mut self, vm: ViewmodelId, key: &str, target: NodeId) -> Result<NodeId, StoreError> {
        self.check_node(target)?;
        let root = self.root(vm)?;
        let node = self.join_key(root, key)?;
        if self.resolve_mapping(target) == node {
            return Err(StoreError::invalid(key, "cannot map a node onto itself"));
        }
        match self.node(node).kind {
            NodeKind::Mapped(existing) if existing == target => return Ok(node),
            NodeKind::Mapped(existing) => {
                self.node_mut(existing).mapped_by.retain(|m| *m != node);
            }
            _ => {}
        }
        let old = self.peek(node);
        self.node_mut(node).kind = NodeKind::Mapped(target);
        self.node_mut(target).mapped_by.push(node);
        self.node_events += 1;
        tracing::debug!(viewmodel = vm.0, key, target = target.0, "mapping added");
        self.mark_changed(node, old, false);
        self.retry_pending();
        Ok(node)
    }

    // ── Resolvers ──────────────────────────────────────────────────────────

    /// Resolves `reference` in `scope`. If it resolves now, `on_resolved`
    /// runs before this returns; otherwise the resolver is left pending.
    ///
    /// # Errors
    ///
    /// Malformed references fail at once and nothing is registered.
    pub fn resolve(
        &mut self,
        scope: ScopeId,
        reference: Reference,
        on_resolved: impl FnOnce(&mut Store, NodeId) + 'static,
    ) -> Result<ResolverId, StoreError> {
        self.scope(scope)?;
        let found = self.try_resolve(scope, &reference)?;
        self.resolvers.push(ResolverSlot {
            scope,
            reference,
            callback: Some(Box::new(on_resolved)),
            state: ResolverState::Pending,
        });
        let id = ResolverId((self.resolvers.len() - 1) as u32);
        match found {
            Some(node) => self.fire_resolver(id, node),
            None => {
                tracing::debug!(resolver = id.0, "reference pending");
                self.pending.push(id);
            }
        }
        self.retry_pending();
        Ok(id)
    }

    pub fn resolver_node(&self, id: ResolverId) -> Option<NodeId> {
        match self.resolvers.get(id.0 as usize)?.state {
            ResolverState::Resolved(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_pending(&self, id: ResolverId) -> bool {
        matches!(
            self.resolvers.get(id.0 as usize).map(|slot| &slot.state),
            Some(ResolverState::Pending)
        )
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolves now, creating the reference at the innermost enclosing
    /// context if nothing matches.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnresolvedReference`] for unbound resolvers and for
    /// expressions whose operands cannot be created.
    pub fn force_resolution(&mut self, id: ResolverId) -> Result<NodeId, StoreError> {
        let slot = self
            .resolvers
            .get(id.0 as usize)
            .ok_or_else(|| StoreError::UnresolvedReference {
                reference: format!("resolver {}", id.0),
            })?;
        match slot.state {
            ResolverState::Resolved(node) => return Ok(node),
            ResolverState::Unbound => {
                return Err(StoreError::UnresolvedReference {
                    reference: slot.reference.describe(),
                })
            }
            ResolverState::Pending => {}
        }
        let scope = slot.scope;
        let reference = slot.reference.clone();
        let node = match self.try_resolve(scope, &reference)? {
            Some(node) => node,
            None => self.create_at_context(scope, &reference)?,
        };
        self.fire_resolver(id, node);
        self.retry_pending();
        Ok(node)
    }

    /// Drops the resolver; its callback will never run. Idempotent.
    pub fn unbind(&mut self, id: ResolverId) {
        if let Some(slot) = self.resolvers.get_mut(id.0 as usize) {
            slot.state = ResolverState::Unbound;
            slot.callback = None;
        }
        self.pending.retain(|p| *p != id);
    }

    fn fire_resolver(&mut self, id: ResolverId, node: NodeId) {
        self.pending.retain(|p| *p != id);
        let Some(slot) = self.resolvers.get_mut(id.0 as usize) else {
            return;
        };
        slot.state = ResolverState::Resolved(node);
        if let Some(callback) = slot.callback.take() {
            callback(self, node);
        }
    }

    /// Retries pending resolvers if nodes appeared since the last attempt.
    /// Inside a batch this waits for the flush.
    pub(crate) fn retry_pending(&mut self) {
        if self.retrying || self.runloop.is_batching() || self.node_events == self.retried_at {
            return;
        }
        if self.pending.is_empty() {
            self.retried_at = self.node_events;
            return;
        }
        self.retrying = true;
        let mut passes = 0;
        while self.node_events != self.retried_at && passes < self.config.max_flush_passes {
            passes += 1;
            self.retried_at = self.node_events;
            tracing::debug!(pending = self.pending.len(), "retrying pending references");
            for id in self.pending.clone() {
                if !self.is_pending(id) {
                    continue;
                }
                let slot = &self.resolvers[id.0 as usize];
                let (scope, reference) = (slot.scope, slot.reference.clone());
                match self.try_resolve(scope, &reference) {
                    Ok(Some(node)) => self.fire_resolver(id, node),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, resolver = id.0, "pending reference failed");
                        self.unbind(id);
                    }
                }
            }
        }
        self.retrying = false;
    }

    // ── Algorithm ──────────────────────────────────────────────────────────

    fn try_resolve(
        &mut self,
        scope: ScopeId,
        reference: &Reference,
    ) -> Result<Option<NodeId>, StoreError> {
        match reference {
            Reference::Keypath(keypath) => self.resolve_keypath(scope, keypath),
            Reference::IndexRef(name) | Reference::KeyRef(name) => {
                self.resolve_ambiguous(scope, std::slice::from_ref(name))
            }
            Reference::Member { base, members } => {
                let Some(mut node) = self.resolve_keypath(scope, base)? else {
                    return Ok(None);
                };
                for member in members {
                    let key = match member {
                        Member::Literal(key) => key.clone(),
                        Member::Ref(inner) => match self.member_key(scope, inner)? {
                            Some(key) => key,
                            None => return Ok(None),
                        },
                    };
                    node = self.join_key(node, &key)?;
                }
                Ok(Some(node))
            }
            Reference::Call { method, args } => {
                let signature = self.function_signature(method)?;
                match self.resolve_operands(scope, args)? {
                    Some(deps) => {
                        let vm = self.scope(scope)?.spec.viewmodel;
                        self.expression_node(vm, signature, deps).map(Some)
                    }
                    None => Ok(None),
                }
            }
            Reference::Expression { refs, signature } => match self.resolve_operands(scope, refs)? {
                Some(deps) => {
                    let vm = self.scope(scope)?.spec.viewmodel;
                    self.expression_node(vm, signature.clone(), deps).map(Some)
                }
                None => Ok(None),
            },
        }
    }

    fn resolve_operands(
        &mut self,
        scope: ScopeId,
        refs: &[String],
    ) -> Result<Option<Vec<NodeId>>, StoreError> {
        let mut deps = Vec::with_capacity(refs.len());
        for reference in refs {
            match self.resolve_keypath(scope, reference)? {
                Some(node) => deps.push(node),
                None => return Ok(None),
            }
        }
        Ok(Some(deps))
    }

    /// Key supplied by a computed member: its current string or number
    /// value. Undefined keeps the reference pending.
    fn member_key(&mut self, scope: ScopeId, inner: &str) -> Result<Option<String>, StoreError> {
        let Some(node) = self.resolve_keypath(scope, inner)? else {
            return Ok(None);
        };
        self.freshen(node);
        match self.peek(node) {
            Some(Value::String(key)) => Ok(Some(key)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(StoreError::invalid(
                inner,
                format!("member key must be a string or number, got {other}"),
            )),
            None => Ok(None),
        }
    }

    fn resolve_keypath(
        &mut self,
        scope: ScopeId,
        keypath: &str,
    ) -> Result<Option<NodeId>, StoreError> {
        match keypath {
            "." | "this" => return self.context_of(scope).map(Some),
            "@index" => return self.special(scope, keypath, false),
            "@key" => return self.special(scope, keypath, true),
            _ => {}
        }
        if let Some(rest) = keypath.strip_prefix("~/") {
            let vm = self.scope(scope)?.spec.viewmodel;
            let root = self.root(vm)?;
            return self.join_all(root, &split_keypath(rest)?).map(Some);
        }
        if keypath == ".." || keypath.starts_with("../") {
            let mut node = self.context_of(scope)?;
            let mut rest = keypath;
            loop {
                let (next, stepped) = match rest.strip_prefix("../") {
                    Some(next) => (next, true),
                    None if rest == ".." => ("", true),
                    None => (rest, false),
                };
                if !stepped {
                    break;
                }
                node = self
                    .node(node)
                    .parent
                    .ok_or_else(|| StoreError::invalid(keypath, "no parent context"))?;
                rest = next;
            }
            return self.join_all(node, &split_keypath(rest)?).map(Some);
        }
        if let Some(rest) = keypath
            .strip_prefix("./")
            .or_else(|| keypath.strip_prefix('.'))
        {
            let context = self.context_of(scope)?;
            return self.join_all(context, &split_keypath(rest)?).map(Some);
        }
        let segments = split_keypath(keypath)?;
        self.resolve_ambiguous(scope, &segments)
    }

    fn special(
        &mut self,
        scope: ScopeId,
        keypath: &str,
        key: bool,
    ) -> Result<Option<NodeId>, StoreError> {
        match self.iteration_node(scope, key)? {
            Some(node) => Ok(Some(node)),
            None => Err(StoreError::invalid(keypath, "no enclosing iteration")),
        }
    }

    fn resolve_ambiguous(
        &mut self,
        scope: ScopeId,
        segments: &[String],
    ) -> Result<Option<NodeId>, StoreError> {
        let Some(key) = segments.first() else {
            return self.context_of(scope).map(Some);
        };
        let local_vm = self.scope(scope)?.spec.viewmodel;
        let mut has_context_chain = false;
        let mut crossed = false;
        let mut current = Some(scope);

        while let Some(sid) = current {
            let spec = self.scope(sid)?.spec.clone();
            let model = self.viewmodel(spec.viewmodel)?;
            let (component, isolated) = (model.component, model.isolated);

            if let Some(iteration) = &spec.iteration {
                let is_index = iteration.index_ref.as_deref() == Some(key.as_str());
                let is_key = iteration.key_ref.as_deref() == Some(key.as_str());
                if is_index || is_key {
                    if segments.len() > 1 {
                        return Err(StoreError::invalid(
                            join_keypath(segments),
                            "index and key references have no members",
                        ));
                    }
                    // a name bound as both resolves to the key
                    return self.synthetic_node(sid, is_key).map(Some);
                }
            }

            if let Some(context) = spec.context {
                if !spec.is_root || (component && !isolated) {
                    has_context_chain = true;
                }
                if self.has(context, key) {
                    if crossed {
                        let target = self.join_key(context, key)?;
                        self.map(local_vm, key, target)?;
                    }
                    return self.join_all(context, segments).map(Some);
                }
            }

            current = match spec.component_parent {
                Some(host) if !isolated => {
                    crossed = true;
                    Some(host)
                }
                _ => spec.parent,
            };
        }

        if has_context_chain {
            return Ok(None);
        }
        let root = self.root(local_vm)?;
        self.join_all(root, segments).map(Some)
    }

    fn create_at_context(
        &mut self,
        scope: ScopeId,
        reference: &Reference,
    ) -> Result<NodeId, StoreError> {
        let unresolved = || StoreError::UnresolvedReference {
            reference: reference.describe(),
        };
        let context = self.context_of(scope)?;
        match reference {
            Reference::Keypath(keypath) => self.join_all(context, &split_keypath(keypath)?),
            Reference::IndexRef(name) | Reference::KeyRef(name) => {
                self.join_key(context, name)
            }
            Reference::Member { base, members } => {
                let mut node = match self.resolve_keypath(scope, base)? {
                    Some(node) => node,
                    None => self.join_all(context, &split_keypath(base)?)?,
                };
                for member in members {
                    let key = match member {
                        Member::Literal(key) => key.clone(),
                        Member::Ref(inner) => self.member_key(scope, inner)?.ok_or_else(unresolved)?,
                    };
                    node = self.join_key(node, &key)?;
                }
                Ok(node)
            }
            Reference::Call { .. } | Reference::Expression { .. } => Err(unresolved()),
        }
    }
}
