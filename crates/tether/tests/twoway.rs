mod common;

use serde_json::json;

use common::{store_with, watch};
use tether::{
    BindOutcome, BoundAttribute, InputKind, Iteration, Reference, ScopeSpec, TwoWayBinding,
    Warning,
};

#[test]
fn view_write_does_not_render_back() {
    let (mut store, vm) = store_with(json!({"name": "Ada"}));
    let scope = store.root_scope(vm).unwrap();
    let attribute = BoundAttribute::new("value");
    let binding = TwoWayBinding::bind(
        &mut store,
        scope,
        Reference::keypath("name"),
        attribute.clone(),
        InputKind::Text,
    )
    .unwrap();
    assert_eq!(binding.outcome(), &BindOutcome::TwoWay);
    assert_eq!(attribute.rendered(), Some(json!("Ada")));
    assert_eq!(attribute.render_count(), 1);

    store.start(false);
    binding.handle_change(&mut store, Some(json!("Grace"))).unwrap();
    assert!(attribute.is_locked());
    store.end();

    assert!(!attribute.is_locked());
    assert_eq!(attribute.render_count(), 1);
    assert_eq!(store.get(vm, "name").unwrap(), Some(json!("Grace")));

    // outside any batch the write opens and closes its own
    binding.handle_change(&mut store, Some(json!("Lin"))).unwrap();
    assert!(!attribute.is_locked());
    assert_eq!(attribute.render_count(), 1);
    assert_eq!(binding.value(&mut store).unwrap(), Some(json!("Lin")));
}

#[test]
fn model_write_renders() {
    let (mut store, vm) = store_with(json!({"name": "Ada"}));
    let scope = store.root_scope(vm).unwrap();
    let attribute = BoundAttribute::new("value");
    TwoWayBinding::bind(&mut store, scope, Reference::keypath("name"), attribute.clone(), InputKind::Text)
        .unwrap();

    store.set(vm, "name", json!("Bob")).unwrap();
    assert_eq!(attribute.rendered(), Some(json!("Bob")));
    assert_eq!(attribute.render_count(), 2);
}

#[test]
fn undefined_target_is_seeded_silently() {
    let (mut store, vm) = store_with(json!({}));
    let scope = store.root_scope(vm).unwrap();
    let log = watch(&mut store, vm, "agree");
    let attribute = BoundAttribute::new("checked");

    let binding = TwoWayBinding::bind(
        &mut store,
        scope,
        Reference::keypath("agree"),
        attribute.clone(),
        InputKind::Checkbox,
    )
    .unwrap();
    assert!(binding.warnings().is_empty());
    assert_eq!(store.get(vm, "agree").unwrap(), Some(json!(false)));
    assert_eq!(attribute.rendered(), Some(json!(false)));
    assert!(log.borrow().is_empty());
}

#[test]
fn ambiguous_reference_is_forced_with_a_warning() {
    let (mut store, vm) = store_with(json!({"items": [{}]}));
    let root = store.root_scope(vm).unwrap();
    let item = store.node_at(vm, "items.0").unwrap();
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(item)).with_iteration(Iteration::indexed(0, "i")))
        .unwrap();

    let binding = TwoWayBinding::bind(
        &mut store,
        each,
        Reference::keypath("draft"),
        BoundAttribute::new("value"),
        InputKind::Text,
    )
    .unwrap();
    assert_eq!(
        binding.warnings(),
        &[Warning::AmbiguousReference {
            reference: "draft".to_string()
        }]
    );
    assert_eq!(binding.node(), store.node_at(vm, "items.0.draft").unwrap());
    assert_eq!(store.get(vm, "items.0.draft").unwrap(), Some(json!("")));
}

#[test]
fn readonly_target_degrades_to_one_way() {
    let (mut store, vm) = store_with(json!({}));
    store.computed(vm, "total", |_| Some(json!(42))).unwrap();
    let scope = store.root_scope(vm).unwrap();
    let attribute = BoundAttribute::new("value");

    let binding = TwoWayBinding::bind(
        &mut store,
        scope,
        Reference::keypath("total"),
        attribute.clone(),
        InputKind::Number,
    )
    .unwrap();
    let warning = Warning::ReadOnlyBinding {
        keypath: "total".to_string(),
    };
    assert_eq!(binding.outcome(), &BindOutcome::OneWay { reason: warning });
    assert!(!attribute.is_twoway());
    assert_eq!(attribute.rendered(), Some(json!(42)));

    binding.handle_change(&mut store, Some(json!(1))).unwrap();
    assert_eq!(store.get(vm, "total").unwrap(), Some(json!(42)));
}

#[test]
fn unbinding_cancels_the_pending_unlock() {
    let (mut store, vm) = store_with(json!({"name": "Ada"}));
    let scope = store.root_scope(vm).unwrap();
    let attribute = BoundAttribute::new("value");
    let binding = TwoWayBinding::bind(
        &mut store,
        scope,
        Reference::keypath("name"),
        attribute.clone(),
        InputKind::Text,
    )
    .unwrap();
    let node = binding.node();
    assert_eq!(store.dependent_count(node).unwrap(), 1);

    store.start(false);
    binding.handle_change(&mut store, Some(json!("Grace"))).unwrap();
    binding.unbind(&mut store).unwrap();
    store.end();

    assert!(attribute.is_locked());
    assert_eq!(store.dependent_count(node).unwrap(), 0);
    assert_eq!(store.get(vm, "name").unwrap(), Some(json!("Grace")));
}

#[test]
fn member_binding_survives_replacing_the_array() {
    let (mut store, vm) = store_with(json!({"items": ["a", "b"]}));
    let root = store.root_scope(vm).unwrap();
    let item = store.node_at(vm, "items.0").unwrap();
    let each = store
        .add_scope(ScopeSpec::child(vm, root, Some(item)).with_iteration(Iteration::indexed(0, "i")))
        .unwrap();
    let attribute = BoundAttribute::new("value");
    let binding = TwoWayBinding::bind(&mut store, each, Reference::keypath("."), attribute.clone(), InputKind::Text)
        .unwrap();
    assert_eq!(binding.node(), item);

    store.set(vm, "items", json!(["x", "b"])).unwrap();
    assert_eq!(attribute.rendered(), Some(json!("x")));
    assert_eq!(binding.node(), store.node_at(vm, "items.0").unwrap());

    binding.handle_change(&mut store, Some(json!("y"))).unwrap();
    assert_eq!(store.get(vm, "items").unwrap(), Some(json!(["y", "b"])));
    assert_eq!(attribute.rendered(), Some(json!("x")));
}
