//! The variable-store collaborator contract. This crate never implements
//! variable storage/autoloading itself — only the trait a real store
//! must satisfy, plus a minimal in-memory stand-in for tests, grounded on
//! ion's `Variables`/`Expander` surface
//! (`src/shell/variables.rs`, `src/lib/shell/mod.rs`).

use fnv::FnvHashMap;

use crate::types::{Array, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope { Local, Exported, Universal }

/// What the tree walker needs from the variable store: get/set/remove, plus
/// scoped shadowing for function calls and loops (C5 consults this when
/// saving/restoring shadowed bindings).
pub trait VariableStore {
    fn get(&self, name: &str) -> Option<Value>;
    fn get_array(&self, name: &str) -> Option<Array>;
    fn set(&mut self, name: &str, value: Value, scope: Scope);
    fn set_array(&mut self, name: &str, value: Array, scope: Scope);
    fn remove(&mut self, name: &str) -> Option<Value>;
    fn names(&self) -> Vec<String>;
}

/// Minimal in-memory implementation used by tests and as a default for
/// standalone use of the engine; a real shell wires in its own store
/// (autoloading, universal-variable IPC, etc).
#[derive(Debug, Default)]
pub struct MapVariableStore {
    scalars: FnvHashMap<String, Value>,
    arrays: FnvHashMap<String, Array>,
}

impl MapVariableStore {
    pub fn new() -> Self { Self::default() }
}

impl VariableStore for MapVariableStore {
    fn get(&self, name: &str) -> Option<Value> { self.scalars.get(name).cloned() }
    fn get_array(&self, name: &str) -> Option<Array> { self.arrays.get(name).cloned() }

    fn set(&mut self, name: &str, value: Value, _scope: Scope) {
        self.arrays.remove(name);
        self.scalars.insert(name.to_string(), value);
    }

    fn set_array(&mut self, name: &str, value: Array, _scope: Scope) {
        self.scalars.remove(name);
        self.arrays.insert(name.to_string(), value);
    }

    fn remove(&mut self, name: &str) -> Option<Value> {
        self.arrays.remove(name);
        self.scalars.remove(name)
    }

    fn names(&self) -> Vec<String> {
        self.scalars.keys().chain(self.arrays.keys()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut store = MapVariableStore::new();
        store.set("x", "1".into(), Scope::Local);
        assert_eq!(store.get("x"), Some("1".to_string()));
    }

    #[test]
    fn setting_array_clears_prior_scalar() {
        let mut store = MapVariableStore::new();
        store.set("x", "1".into(), Scope::Local);
        store.set_array("x", vec!["a".into(), "b".into()], Scope::Local);
        assert_eq!(store.get("x"), None);
        assert_eq!(store.get_array("x"), Some(vec!["a".to_string(), "b".to_string()]));
    }
}
