#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tether::{
    Dependent, NodeChange, NodeId, ObserveOptions, Observation, Store, ViewmodelId,
    ViewmodelOptions,
};

/// Dependent that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct Recorder {
    changes: RefCell<Vec<NodeChange>>,
}

impl Recorder {
    pub fn changes(&self) -> Vec<NodeChange> {
        self.changes.borrow().clone()
    }

    pub fn count(&self) -> usize {
        self.changes.borrow().len()
    }
}

impl Dependent for Recorder {
    fn handle_change(&self, change: &NodeChange) {
        self.changes.borrow_mut().push(change.clone());
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn store_with(data: Value) -> (Store, ViewmodelId) {
    init_tracing();
    let mut store = Store::default();
    let vm = store.create_viewmodel(ViewmodelOptions::with_data(data));
    (store, vm)
}

/// Registers a fresh recorder on `node`.
pub fn record(store: &mut Store, node: NodeId) -> Rc<Recorder> {
    let recorder = Rc::new(Recorder::default());
    store
        .register_dependent(node, recorder.clone() as Rc<dyn Dependent>)
        .unwrap();
    recorder
}

/// Observes `keypath` without the initial firing and logs each observation.
pub fn watch(store: &mut Store, vm: ViewmodelId, keypath: &str) -> Rc<RefCell<Vec<Observation>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    store
        .observe(
            vm,
            keypath,
            move |_, observation| sink.borrow_mut().push(observation.clone()),
            ObserveOptions { init: false },
        )
        .unwrap();
    log
}
