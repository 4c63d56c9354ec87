//! Module resolution and memoization (spec §4.H).
//!
//! Parsing and resolving an import specifier to an AST is an external
//! collaborator's job (spec §1), exactly like parsing a whole program is —
//! `ModuleLoader` is the seam. `ModuleRegistry` is the part this crate owns:
//! evaluate a module's body at most once per specifier, cache the exported
//! record, and turn a re-entrant import (an import cycle) into an error
//! instead of infinite recursion.

use std::{cell::RefCell, collections::HashMap, fmt};

use crate::{ast::Node, error::UniError, value::Value};

/// Resolves an import specifier to the AST of the module body. Implemented
/// by the embedder; this crate ships no file-system or network resolution.
pub trait ModuleLoader: fmt::Debug {
    fn load(&self, specifier: &str) -> Result<Node, UniError>;
}

#[derive(Debug, Clone)]
enum ModuleState {
    Loading,
    Ready(Value),
    Failed(UniError),
}

/// Per-`Runner` cache of evaluated modules, keyed by import specifier.
/// Evaluation is single-threaded, so "single-flight" here just means a
/// specifier requested while already `Loading` is a cycle, reported as an
/// import error rather than deadlocking or looping (spec §4.H).
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RefCell<HashMap<String, ModuleState>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result if this specifier has been requested
    /// before (whether it succeeded, failed, or is mid-load — the latter is
    /// reported as a cycle).
    pub fn get(&self, specifier: &str) -> Option<Result<Value, UniError>> {
        match self.modules.borrow().get(specifier) {
            Some(ModuleState::Ready(v)) => Some(Ok(v.clone())),
            Some(ModuleState::Failed(e)) => Some(Err(e.clone())),
            Some(ModuleState::Loading) => {
                Some(Err(UniError::import(format!("circular import of '{specifier}'"))))
            }
            None => None,
        }
    }

    pub fn begin(&self, specifier: &str) {
        self.modules.borrow_mut().insert(specifier.to_owned(), ModuleState::Loading);
    }

    pub fn finish(&self, specifier: &str, result: Result<Value, UniError>) -> Result<Value, UniError> {
        let state = match &result {
            Ok(v) => ModuleState::Ready(v.clone()),
            Err(e) => ModuleState::Failed(e.clone()),
        };
        self.modules.borrow_mut().insert(specifier.to_owned(), state);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_load_reports_a_cycle() {
        let registry = ModuleRegistry::new();
        registry.begin("a");
        assert!(registry.get("a").unwrap().is_err());
    }

    #[test]
    fn finished_module_is_cached() {
        let registry = ModuleRegistry::new();
        registry.begin("a");
        registry.finish("a", Ok(Value::Number(1.0))).unwrap();
        assert_eq!(registry.get("a").unwrap().unwrap(), Value::Number(1.0));
    }
}
