//! Value adaptors.
//!
//! An adaptor rewrites values of a shape it recognises as they are written
//! into a viewmodel, e.g. to normalise a foreign representation into plain
//! JSON. The first registered adaptor whose filter matches wins.

use std::rc::Rc;

use serde_json::Value;

use super::{NodeId, Store, ViewmodelId};
use crate::error::StoreError;

pub trait Adaptor {
    fn name(&self) -> &str;

    /// Whether this adaptor handles `value` written at `keypath`.
    fn filter(&self, value: &Value, keypath: &str) -> bool;

    fn wrap(&self, value: Value, keypath: &str) -> Value;
}

impl Store {
    pub fn register_adaptor(
        &mut self,
        vm: ViewmodelId,
        adaptor: Rc<dyn Adaptor>,
    ) -> Result<(), StoreError> {
        self.viewmodel_mut(vm)?.adaptors.push(adaptor);
        Ok(())
    }

    pub(crate) fn adapt(&self, node: NodeId, value: Value) -> Value {
        let Ok(model) = self.viewmodel(self.node(node).viewmodel) else {
            return value;
        };
        if model.adaptors.is_empty() {
            return value;
        }
        let keypath = self.keypath_of(node);
        match model.adaptors.iter().find(|a| a.filter(&value, &keypath)) {
            Some(adaptor) => {
                tracing::trace!(adaptor = adaptor.name(), %keypath, "value adapted");
                adaptor.wrap(value, &keypath)
            }
            None => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewmodelOptions;
    use serde_json::json;

    struct Celsius;

    impl Adaptor for Celsius {
        fn name(&self) -> &str {
            "celsius"
        }

        fn filter(&self, value: &Value, keypath: &str) -> bool {
            keypath.ends_with("temperature") && value.get("fahrenheit").is_some()
        }

        fn wrap(&self, value: Value, _keypath: &str) -> Value {
            let f = value["fahrenheit"].as_f64().unwrap_or_default();
            json!({"celsius": (f - 32.0) * 5.0 / 9.0})
        }
    }

    #[test]
    fn test_matching_adaptor_rewrites_value() {
        let mut store = Store::default();
        let vm = store.create_viewmodel(ViewmodelOptions::default());
        store.register_adaptor(vm, Rc::new(Celsius)).unwrap();

        store.set(vm, "temperature", json!({"fahrenheit": 212.0})).unwrap();
        assert_eq!(store.get(vm, "temperature.celsius").unwrap(), Some(json!(100.0)));

        store.set(vm, "other", json!({"fahrenheit": 212.0})).unwrap();
        assert_eq!(store.get(vm, "other.fahrenheit").unwrap(), Some(json!(212.0)));
    }
}
