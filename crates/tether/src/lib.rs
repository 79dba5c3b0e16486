//! Reactive keypath model.
//!
//! `tether` keeps application state as a tree of keypath-addressed nodes,
//! resolves template references against nested lexical scopes, batches
//! change notification and keeps view inputs and model nodes in sync.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tether::{ObserveOptions, Store, ViewmodelOptions};
//!
//! let mut store = Store::default();
//! let vm = store.create_viewmodel(ViewmodelOptions::with_data(json!({"a": 1})));
//! store
//!     .observe(vm, "a", |_, o| println!("{} -> {:?}", o.keypath, o.new), ObserveOptions::default())
//!     .unwrap();
//!
//! store.start(false);
//! store.set(vm, "a", json!(2)).unwrap();
//! store.end();
//! assert_eq!(store.get(vm, "a").unwrap(), Some(json!(2)));
//! ```

pub mod capture;
pub mod config;
pub mod dependent;
pub mod error;
pub mod observer;
pub mod reference;
pub mod runloop;
pub mod scope;
pub mod store;
pub mod twoway;

pub use capture::CaptureGroup;
pub use config::{StoreConfig, ViewmodelOptions};
pub use dependent::{ChangeKind, Dependent, NodeChange};
pub use error::{StoreError, Warning};
pub use observer::{ObserveOptions, Observation, ObserverId};
pub use reference::{Member, Reference, Signature};
pub use runloop::{BatchPromise, Liveness};
pub use scope::{Iteration, ScopeId, ScopeSpec};
pub use store::{Adaptor, ComputeContext, NodeId, ResolverId, Store, ViewmodelId};
pub use twoway::{BindOutcome, BoundAttribute, InputKind, TwoWayBinding};
