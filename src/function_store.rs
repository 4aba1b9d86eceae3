//! The function-store collaborator contract, mirroring ion's
//! `FnvHashMap<Identifier, Function>` (`src/shell/mod.rs`) as a trait so
//! this crate never owns function *definition* (only invocation).

use fnv::FnvHashMap;

use crate::ast::JobList;

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: JobList,
}

pub trait FunctionStore {
    fn get(&self, name: &str) -> Option<FunctionDef>;
    fn define(&mut self, def: FunctionDef);
    fn names(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MapFunctionStore {
    functions: FnvHashMap<String, FunctionDef>,
}

impl MapFunctionStore {
    pub fn new() -> Self { Self::default() }
}

impl FunctionStore for MapFunctionStore {
    fn get(&self, name: &str) -> Option<FunctionDef> { self.functions.get(name).cloned() }

    fn define(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.clone(), def);
    }

    fn names(&self) -> Vec<String> { self.functions.keys().cloned().collect() }
}
