mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use common::store_with;
use tether::{
    Iteration, Member, NodeId, Reference, ResolverId, ScopeId, ScopeSpec, Signature, Store,
    StoreError, ViewmodelOptions,
};

/// Resolves `reference` and returns the resolver plus a slot the callback
/// fills in.
fn resolve(store: &mut Store, scope: ScopeId, reference: Reference) -> (ResolverId, Rc<Cell<Option<NodeId>>>) {
    let slot = Rc::new(Cell::new(None));
    let sink = slot.clone();
    let id = store
        .resolve(scope, reference, move |_, node| sink.set(Some(node)))
        .unwrap();
    (id, slot)
}

fn resolve_now(store: &mut Store, scope: ScopeId, keypath: &str) -> NodeId {
    let (id, slot) = resolve(store, scope, Reference::keypath(keypath));
    assert!(!store.is_pending(id), "{keypath} should resolve at once");
    slot.get().unwrap()
}

#[test]
fn index_reference_shadows_data_key() {
    let (mut store, vm) = store_with(json!({"i": "data", "items": ["x"]}));
    let root = store.root_scope(vm).unwrap();
    let item = store.node_at(vm, "items.0").unwrap();
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(item)).with_iteration(Iteration::indexed(0, "i")))
        .unwrap();

    let index = resolve_now(&mut store, each, "i");
    assert_eq!(store.get_node(index).unwrap(), Some(json!(0)));
    let data = resolve_now(&mut store, root, "i");
    assert_eq!(store.get_node(data).unwrap(), Some(json!("data")));
}

#[test]
fn outer_index_reference_is_reachable_from_inner_iteration() {
    let (mut store, vm) = store_with(json!({"rows": [[10], [20, 30]]}));
    let root = store.root_scope(vm).unwrap();
    let row = store.node_at(vm, "rows.1").unwrap();
    let cell = store.node_at(vm, "rows.1.0").unwrap();
    let outer = store
        .add_scope(ScopeSpec::child(vm, root, Some(row)).with_iteration(Iteration::indexed(1, "i")))
        .unwrap();
    let inner = store
        .add_scope(ScopeSpec::child(vm, outer, Some(cell)).with_iteration(Iteration::indexed(0, "j")))
        .unwrap();

    let i = resolve_now(&mut store, inner, "i");
    let j = resolve_now(&mut store, inner, "j");
    assert_eq!(store.get_node(i).unwrap(), Some(json!(1)));
    assert_eq!(store.get_node(j).unwrap(), Some(json!(0)));
}

#[test]
fn context_key_wins_over_outer_keys() {
    let (mut store, vm) = store_with(json!({"name": "root", "title": "T", "user": {"name": "Ada"}}));
    let root = store.root_scope(vm).unwrap();
    let user = store.node_at(vm, "user").unwrap();
    let with = store.add_scope(ScopeSpec::child(vm, root, Some(user))).unwrap();

    let name = resolve_now(&mut store, with, "name");
    assert_eq!(name, store.node_at(vm, "user.name").unwrap());

    let title = resolve_now(&mut store, with, "title");
    assert_eq!(title, store.node_at(vm, "title").unwrap());
}

#[test]
fn unresolvable_reference_waits_for_its_key() {
    let (mut store, vm) = store_with(json!({"user": {}}));
    let root = store.root_scope(vm).unwrap();
    let user = store.node_at(vm, "user").unwrap();
    let with = store.add_scope(ScopeSpec::child(vm, root, Some(user))).unwrap();

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let id = store
        .resolve(with, Reference::keypath("missing"), move |_, _| {
            counter.set(counter.get() + 1)
        })
        .unwrap();
    assert!(store.is_pending(id));
    assert_eq!(store.pending_count(), 1);

    store.set(vm, "missing", json!(1)).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(store.resolver_node(id), Some(store.node_at(vm, "missing").unwrap()));
    assert_eq!(store.pending_count(), 0);

    store.set(vm, "missing", json!(2)).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn pending_references_settle_in_registration_order() {
    let (mut store, vm) = store_with(json!({"user": {}}));
    let root = store.root_scope(vm).unwrap();
    let user = store.node_at(vm, "user").unwrap();
    let with = store.add_scope(ScopeSpec::child(vm, root, Some(user))).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let mut ids = Vec::new();
    for name in ["c", "a", "b"] {
        let sink = order.clone();
        let id = store
            .resolve(with, Reference::keypath(name), move |_, _| sink.borrow_mut().push(name))
            .unwrap();
        ids.push(id);
    }
    assert_eq!(store.pending_count(), 3);

    store.set(vm, "user", json!({"a": 1, "b": 2, "c": 3})).unwrap();
    assert_eq!(*order.borrow(), vec!["c", "a", "b"]);
    assert_eq!(store.pending_count(), 0);
    for (id, name) in ids.iter().zip(["c", "a", "b"]) {
        assert_eq!(
            store.resolver_node(*id),
            Some(store.node_at(vm, &format!("user.{name}")).unwrap())
        );
    }

    store.set(vm, "user", json!({"a": 4, "b": 5, "c": 6})).unwrap();
    assert_eq!(order.borrow().len(), 3);
}

#[test]
fn key_reference_wins_over_index_reference_of_the_same_name() {
    let (mut store, vm) = store_with(json!({"obj": {"a": 1}}));
    let root = store.root_scope(vm).unwrap();
    let member = store.node_at(vm, "obj.a").unwrap();
    let iteration = Iteration {
        index: 0,
        key: Some("a".to_string()),
        index_ref: Some("k".to_string()),
        key_ref: Some("k".to_string()),
    };
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(member)).with_iteration(iteration))
        .unwrap();

    let k = resolve_now(&mut store, each, "k");
    assert_eq!(store.get_node(k).unwrap(), Some(json!("a")));
}

#[test]
fn unbound_resolver_never_fires() {
    let (mut store, vm) = store_with(json!({"user": {}}));
    let root = store.root_scope(vm).unwrap();
    let user = store.node_at(vm, "user").unwrap();
    let with = store.add_scope(ScopeSpec::child(vm, root, Some(user))).unwrap();

    let (id, slot) = resolve(&mut store, with, Reference::keypath("later"));
    store.unbind(id);
    store.unbind(id);
    store.set(vm, "later", json!(true)).unwrap();

    assert!(slot.get().is_none());
    assert!(!store.is_pending(id));
    assert_eq!(store.pending_count(), 0);
    assert!(matches!(
        store.force_resolution(id),
        Err(StoreError::UnresolvedReference { .. })
    ));
}

#[test]
fn isolated_component_falls_back_to_its_own_root() {
    let mut store = Store::default();
    let host = store.create_viewmodel(ViewmodelOptions::with_data(json!({"shared": 1})));
    let host_scope = store.root_scope(host).unwrap();
    let component = store.create_viewmodel(ViewmodelOptions::component(json!({})).isolated(true));
    let component_root = store.root(component).unwrap();
    let scope = store
        .add_scope(ScopeSpec::root(component, component_root).with_component_parent(host_scope))
        .unwrap();

    let node = resolve_now(&mut store, scope, "shared");
    assert_eq!(store.viewmodel_of(node).unwrap(), component);
    assert_eq!(store.get_node(node).unwrap(), None);
}

#[test]
fn open_component_keeps_unknown_reference_pending() {
    let mut store = Store::default();
    let host = store.create_viewmodel(ViewmodelOptions::with_data(json!({})));
    let host_scope = store.root_scope(host).unwrap();
    let component = store.create_viewmodel(ViewmodelOptions::component(json!({})));
    let component_root = store.root(component).unwrap();
    let scope = store
        .add_scope(ScopeSpec::root(component, component_root).with_component_parent(host_scope))
        .unwrap();

    let (id, _) = resolve(&mut store, scope, Reference::keypath("nothing"));
    assert!(store.is_pending(id));
}

#[test]
fn crossing_a_component_boundary_maps_the_key() {
    let mut store = Store::default();
    let host = store.create_viewmodel(ViewmodelOptions::with_data(json!({"user": {"name": "Ada"}})));
    let host_scope = store.root_scope(host).unwrap();
    let component = store.create_viewmodel(ViewmodelOptions::component(json!({})));
    let component_root = store.root(component).unwrap();
    let scope = store
        .add_scope(ScopeSpec::root(component, component_root).with_component_parent(host_scope))
        .unwrap();

    let user = resolve_now(&mut store, scope, "user");
    assert_eq!(user, store.node_at(host, "user").unwrap());
    let name = resolve_now(&mut store, scope, "user.name");
    assert_eq!(name, store.node_at(host, "user.name").unwrap());
    assert_eq!(store.get(component, "user").unwrap(), Some(json!({"name": "Ada"})));

    store.set(component, "user.name", json!("Grace")).unwrap();
    assert_eq!(store.get(host, "user.name").unwrap(), Some(json!("Grace")));
}

#[test]
fn special_forms() {
    let (mut store, vm) = store_with(json!({"title": "T", "list": [{"name": "a"}, {"name": "b"}]}));
    let root = store.root_scope(vm).unwrap();
    let item = store.node_at(vm, "list.1").unwrap();
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(item)).with_iteration(Iteration::indexed(1, "i")))
        .unwrap();

    assert_eq!(resolve_now(&mut store, each, "."), item);
    assert_eq!(resolve_now(&mut store, each, "this"), item);

    let name = store.node_at(vm, "list.1.name").unwrap();
    assert_eq!(resolve_now(&mut store, each, "./name"), name);
    assert_eq!(resolve_now(&mut store, each, ".name"), name);

    assert_eq!(resolve_now(&mut store, each, ".."), store.node_at(vm, "list").unwrap());
    assert_eq!(resolve_now(&mut store, each, "../0"), store.node_at(vm, "list.0").unwrap());
    assert_eq!(resolve_now(&mut store, each, "~/title"), store.node_at(vm, "title").unwrap());

    let index = resolve_now(&mut store, each, "@index");
    let key = resolve_now(&mut store, each, "@key");
    assert_eq!(store.get_node(index).unwrap(), Some(json!(1)));
    assert_eq!(store.get_node(key).unwrap(), Some(json!("1")));

    store.set_iteration_index(each, 0, None).unwrap();
    assert_eq!(store.get_node(index).unwrap(), Some(json!(0)));
    assert_eq!(store.get_node(key).unwrap(), Some(json!("0")));
}

#[test]
fn special_index_outside_iteration_is_invalid() {
    let (mut store, vm) = store_with(json!({}));
    let root = store.root_scope(vm).unwrap();
    let err = store
        .resolve(root, Reference::keypath("@index"), |_, _| {})
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidReference { .. }));
}

#[test]
fn call_reference_recomputes_on_argument_change() {
    let (mut store, vm) = store_with(json!({"name": "Ada"}));
    store.register_function("upper", |args| {
        let text = args.first()?.as_ref()?.as_str()?;
        Some(json!(text.to_uppercase()))
    });
    let root = store.root_scope(vm).unwrap();
    let call = Reference::Call {
        method: "upper".to_string(),
        args: vec!["name".to_string()],
    };
    let (_, slot) = resolve(&mut store, root, call);
    let node = slot.get().unwrap();
    assert_eq!(store.get_node(node).unwrap(), Some(json!("ADA")));
    assert!(store.is_readonly(node));

    store.set(vm, "name", json!("Grace")).unwrap();
    assert_eq!(store.get_node(node).unwrap(), Some(json!("GRACE")));

    let missing = Reference::Call {
        method: "lower".to_string(),
        args: vec!["name".to_string()],
    };
    let err = store.resolve(root, missing, |_, _| {}).unwrap_err();
    assert_eq!(
        err,
        StoreError::UnknownFunction {
            name: "lower".to_string()
        }
    );
}

#[test]
fn expression_nodes_are_shared_per_signature_and_operands() {
    let (mut store, vm) = store_with(json!({"a": 1, "b": 2}));
    let root = store.root_scope(vm).unwrap();
    let sum = Signature::new("a + b", |values| {
        let a = values.first()?.as_ref()?.as_i64()?;
        let b = values.get(1)?.as_ref()?.as_i64()?;
        Some(json!(a + b))
    });
    let refs = vec!["a".to_string(), "b".to_string()];

    let (_, first) = resolve(&mut store, root, Reference::expression(refs.clone(), sum.clone()));
    let (_, second) = resolve(&mut store, root, Reference::expression(refs, sum));
    let node = first.get().unwrap();
    assert_eq!(second.get(), Some(node));
    assert_eq!(store.get_node(node).unwrap(), Some(json!(3)));

    store.set(vm, "a", json!(5)).unwrap();
    assert_eq!(store.get_node(node).unwrap(), Some(json!(7)));
}

#[test]
fn member_reference_uses_key_at_resolution_time() {
    let (mut store, vm) = store_with(json!({"items": {"x": 1, "y": 2}, "sel": "x"}));
    let root = store.root_scope(vm).unwrap();
    let reference = Reference::Member {
        base: "items".to_string(),
        members: vec![Member::Ref("sel".to_string())],
    };
    let (_, slot) = resolve(&mut store, root, reference);
    let node = slot.get().unwrap();
    assert_eq!(node, store.node_at(vm, "items.x").unwrap());

    store.set(vm, "sel", json!("y")).unwrap();
    assert_eq!(store.get_node(node).unwrap(), Some(json!(1)));
}

#[test]
fn forced_resolution_creates_at_innermost_context() {
    let (mut store, vm) = store_with(json!({"items": [{}]}));
    let root = store.root_scope(vm).unwrap();
    let item = store.node_at(vm, "items.0").unwrap();
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(item)).with_iteration(Iteration::indexed(0, "i")))
        .unwrap();

    let (id, slot) = resolve(&mut store, each, Reference::keypath("draft"));
    assert!(store.is_pending(id));
    let node = store.force_resolution(id).unwrap();
    assert_eq!(node, store.node_at(vm, "items.0.draft").unwrap());
    assert_eq!(slot.get(), Some(node));
    assert!(!store.is_pending(id));
}

#[test]
fn removing_a_scope_unbinds_its_resolvers() {
    let (mut store, vm) = store_with(json!({"user": {}}));
    let root = store.root_scope(vm).unwrap();
    let user = store.node_at(vm, "user").unwrap();
    let with = store.add_scope(ScopeSpec::child(vm, root, Some(user))).unwrap();
    let (id, slot) = resolve(&mut store, with, Reference::keypath("later"));

    store.remove_scope(with).unwrap();
    store.set(vm, "later", json!(1)).unwrap();
    assert!(slot.get().is_none());
    assert!(!store.is_pending(id));
    assert_eq!(
        store.add_scope(ScopeSpec::child(vm, with, None)).unwrap_err(),
        StoreError::UnknownScope(with.index())
    );
}
