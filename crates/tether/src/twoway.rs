//! Two-way binding between a view input and a model node.
//!
//! The view writes through [`TwoWayBinding::handle_change`]. While that
//! write's batch is open the bound attribute is locked, so the change
//! notification produced by the view's own value does not render it back
//! into the element. The lock is released by a task at batch unwind.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Value};

use crate::dependent::{ChangeKind, Dependent, NodeChange};
use crate::error::{StoreError, Warning};
use crate::reference::Reference;
use crate::runloop::Liveness;
use crate::scope::ScopeId;
use crate::store::{NodeId, ResolverId, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Number,
    Range,
    File,
    Checkbox,
    Radio,
    Select,
    SelectMultiple,
    ContentEditable { content: String },
}

impl InputKind {
    /// Value seeded into an undefined node when the binding is created.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            InputKind::Text | InputKind::Select => Some(json!("")),
            InputKind::Number | InputKind::Range | InputKind::File | InputKind::Radio => None,
            InputKind::Checkbox => Some(json!(false)),
            InputKind::SelectMultiple => Some(json!([])),
            InputKind::ContentEditable { content } => Some(json!(content)),
        }
    }
}

/// View attribute displaying a node's value.
#[derive(Debug, Default)]
pub struct BoundAttribute {
    name: String,
    locked: Cell<bool>,
    twoway: Cell<bool>,
    rendered: RefCell<Option<Value>>,
    renders: Cell<usize>,
}

impl BoundAttribute {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            ..Self::default()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn is_twoway(&self) -> bool {
        self.twoway.get()
    }

    /// Value last pushed into the element.
    pub fn rendered(&self) -> Option<Value> {
        self.rendered.borrow().clone()
    }

    pub fn render_count(&self) -> usize {
        self.renders.get()
    }

    fn render(&self, value: Option<Value>) {
        *self.rendered.borrow_mut() = value;
        self.renders.set(self.renders.get() + 1);
    }
}

impl Dependent for BoundAttribute {
    fn handle_change(&self, change: &NodeChange) {
        if self.locked.get() || change.kind == ChangeKind::Removed {
            return;
        }
        self.render(change.value.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    TwoWay,
    /// The target cannot be written; the attribute only displays it.
    OneWay { reason: Warning },
}

#[derive(Debug)]
pub struct TwoWayBinding {
    attribute: Rc<BoundAttribute>,
    node: NodeId,
    resolver: ResolverId,
    liveness: Liveness,
    outcome: BindOutcome,
    warnings: Vec<Warning>,
}

impl TwoWayBinding {
    /// Binds `attribute` to the node `reference` resolves to in `scope`.
    ///
    /// An ambiguous reference is force-resolved with a warning. A readonly
    /// target degrades the binding to one-way with a warning. An undefined
    /// target is silently seeded with the input kind's default.
    pub fn bind(
        store: &mut Store,
        scope: ScopeId,
        reference: Reference,
        attribute: Rc<BoundAttribute>,
        kind: InputKind,
    ) -> Result<Self, StoreError> {
        let described = reference.describe();
        let resolved = Rc::new(Cell::new(None));
        let slot = Rc::clone(&resolved);
        let resolver = store.resolve(scope, reference, move |_, node| slot.set(Some(node)))?;

        let mut warnings = Vec::new();
        if store.is_pending(resolver) {
            let warning = Warning::AmbiguousReference {
                reference: described.clone(),
            };
            if store.warn_enabled() {
                tracing::warn!(%warning, "two-way binding");
            }
            warnings.push(warning);
            store.force_resolution(resolver)?;
        }
        let node = resolved.get().ok_or(StoreError::UnresolvedReference {
            reference: described,
        })?;

        let outcome = if store.is_readonly(node) {
            let warning = Warning::ReadOnlyBinding {
                keypath: store.keypath_of(node),
            };
            if store.warn_enabled() {
                tracing::warn!(%warning, "two-way binding");
            }
            warnings.push(warning.clone());
            BindOutcome::OneWay { reason: warning }
        } else {
            if store.get_node(node)?.is_none() {
                if let Some(seed) = kind.default_value() {
                    store.set_node(node, Some(seed), true)?;
                }
            }
            attribute.twoway.set(true);
            BindOutcome::TwoWay
        };

        attribute.render(store.get_node(node)?);
        store.register_dependent(node, Rc::clone(&attribute) as Rc<dyn Dependent>)?;
        tracing::debug!(attribute = attribute.name(), keypath = %store.keypath_of(node), "binding created");

        Ok(Self {
            attribute,
            node,
            resolver,
            liveness: Liveness::new(),
            outcome,
            warnings,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn outcome(&self) -> &BindOutcome {
        &self.outcome
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn attribute(&self) -> &Rc<BoundAttribute> {
        &self.attribute
    }

    /// Writes a value produced by the view. The attribute stays locked
    /// until the enclosing batch unwinds.
    pub fn handle_change(&self, store: &mut Store, value: Option<Value>) -> Result<(), StoreError> {
        if !self.attribute.is_twoway() {
            tracing::debug!(attribute = self.attribute.name(), "one-way binding ignores view change");
            return Ok(());
        }
        store.start(false);
        self.attribute.locked.set(true);
        let written = store.set_node(self.node, value, false);
        let attribute = Rc::clone(&self.attribute);
        store.schedule_task(Some(self.liveness.clone()), move |_| {
            attribute.locked.set(false);
        });
        store.end();
        written
    }

    /// Current model value.
    pub fn value(&self, store: &mut Store) -> Result<Option<Value>, StoreError> {
        store.get_node(self.node)
    }

    /// Tears the binding down. A pending unlock becomes a no-op.
    pub fn unbind(self, store: &mut Store) -> Result<(), StoreError> {
        self.liveness.kill();
        let dependent: Rc<dyn Dependent> = self.attribute;
        store.unregister_dependent(self.node, &dependent)?;
        store.unbind(self.resolver);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_defaults() {
        assert_eq!(InputKind::Text.default_value(), Some(json!("")));
        assert_eq!(InputKind::Checkbox.default_value(), Some(json!(false)));
        assert_eq!(InputKind::SelectMultiple.default_value(), Some(json!([])));
        assert_eq!(InputKind::Number.default_value(), None);
        assert_eq!(
            InputKind::ContentEditable {
                content: "<b>hi</b>".to_string()
            }
            .default_value(),
            Some(json!("<b>hi</b>"))
        );
    }

    #[test]
    fn test_locked_attribute_skips_render() {
        let attribute = BoundAttribute::new("value");
        let change = NodeChange {
            node: NodeId(1),
            keypath: "a".to_string(),
            kind: ChangeKind::Changed,
            value: Some(json!(1)),
        };
        attribute.locked.set(true);
        attribute.handle_change(&change);
        assert_eq!(attribute.render_count(), 0);
        attribute.locked.set(false);
        attribute.handle_change(&change);
        assert_eq!(attribute.rendered(), Some(json!(1)));
    }
}
