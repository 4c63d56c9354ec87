//! The public entry point: wires a `Context` and a single-threaded `tokio`
//! runtime together and drives one program to completion (spec §4.G, §A.4).
//!
//! Mirrors the shape of the teacher's own `Runner`/`run.rs`: one struct that
//! owns the interner and `EvalConfig` for the lifetime of a process (or a
//! REPL session), and a method that takes already-validated AST and returns
//! a `Value` or a `UniError`. Scheduling is a `tokio::task::LocalSet` run to
//! completion on a current-thread runtime — every `Task`/`Channel` created
//! during evaluation stays confined to that one thread (see `task.rs`).

use std::rc::Rc;

use crate::{
    ast::Node,
    context::{Context, EvalConfig},
    environment::Environment,
    error::UniError,
    intern::Interner,
    value::Value,
};

pub struct Runner {
    interner: Interner,
    config: Rc<EvalConfig>,
    env: Environment,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EvalConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EvalConfig) -> Self {
        Self { interner: Interner::new(), config: Rc::new(config), env: Environment::root() }
    }

    #[must_use]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// The root environment every top-level evaluation shares — exposed so
    /// an embedder (or the CLI's REPL) can pre-populate globals before the
    /// first `run`.
    #[must_use]
    pub fn root_env(&self) -> &Environment {
        &self.env
    }

    /// Evaluates `program` to completion on a dedicated current-thread
    /// runtime, blocking the caller until every forked task the program
    /// spawned (directly or transitively) has either finished or been
    /// abandoned with the `LocalSet` itself.
    ///
    /// # Errors
    /// Returns the first unhandled `UniError` the evaluation raises.
    pub fn run(&self, program: &Node) -> Result<Value, UniError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("building a current-thread tokio runtime should not fail");
        let local = tokio::task::LocalSet::new();
        let ctx = Context::root(self.env.clone(), self.interner.clone(), 0, self.config.clone());
        local.block_on(&runtime, crate::evaluator::run(program, &ctx))
    }

    /// Evaluates `program` as a module import would: in a fresh root
    /// environment, independent of any globals previously declared on this
    /// `Runner` (spec §4.H module bodies don't see the importer's scope).
    pub fn run_isolated(&self, program: &Node) -> Result<Value, UniError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("building a current-thread tokio runtime should not fail");
        let local = tokio::task::LocalSet::new();
        let ctx = Context::root(Environment::root(), self.interner.clone(), 0, self.config.clone());
        local.block_on(&runtime, crate::evaluator::run(program, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{ast::NodeKind, span::Span};

    #[test]
    fn runs_a_trivial_sequence_to_its_last_value() {
        let runner = Runner::new();
        let program = Node::new(
            Span::synthetic(),
            NodeKind::Sequence,
            vec![Node::leaf(Span::synthetic(), NodeKind::Number(1.0)), Node::leaf(Span::synthetic(), NodeKind::Number(2.0))],
        );
        assert_eq!(runner.run(&program).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn undeclared_name_is_a_name_error() {
        let runner = Runner::new();
        let program = Node::leaf(Span::synthetic(), NodeKind::Name(Rc::from("missing")));
        let err = runner.run(&program).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Name { .. }));
    }
}
