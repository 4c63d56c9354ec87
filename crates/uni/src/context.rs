//! Per-evaluation context (spec §4.G evaluator contract, §A.2-A.4).
//!
//! `Context` is cheap to clone (every field is `Rc`-backed or `Copy`) and is
//! threaded by value through `evaluator::evaluate`, the same way the
//! teacher's VM threads `&mut Frame` through its dispatch loop — except here
//! a child scope gets its *own* `Context` (new `env`, extended `handlers`)
//! rather than mutating the caller's in place, since closures and forked
//! tasks must be able to keep referring to the outer one.

use std::{cell::RefCell, rc::Rc};

use crate::{
    effect::HandlerChain,
    environment::Environment,
    intern::Interner,
    module::ModuleRegistry,
    resource::{NoLimitTracker, ResourceLimits, ResourceTracker},
    task::{Scope, Task},
    tracer::{NoopTracer, VmTracer},
};

/// Shared, process-lifetime configuration: resource limits, the tracer, and
/// the module loader. One `EvalConfig` is built by `Runner` and shared by
/// every `Context` derived from it.
pub struct EvalConfig {
    pub resource_limits: ResourceLimits,
    pub tracer: RefCell<Box<dyn VmTracer>>,
    pub resource_tracker: RefCell<Box<dyn ResourceTracker>>,
    pub modules: ModuleRegistry,
    pub module_loader: Option<Rc<dyn crate::module::ModuleLoader>>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let resource_limits = ResourceLimits::new();
        Self {
            resource_tracker: RefCell::new(Box::new(NoLimitTracker::with_limits(resource_limits.clone()))),
            resource_limits,
            tracer: RefCell::new(Box::new(NoopTracer)),
            modules: ModuleRegistry::new(),
            module_loader: None,
        }
    }
}

impl std::fmt::Debug for EvalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalConfig").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Context {
    pub file_id: u32,
    pub env: Environment,
    pub handlers: HandlerChain,
    pub interner: Interner,
    pub config: Rc<EvalConfig>,
    /// The innermost enclosing structured-concurrency scope, if any (spec
    /// §4.E `sync`/`cancel_on_error`/`cancel_on_return`).
    pub scope: Option<Rc<Scope>>,
    /// The task this evaluation is running under, used to observe
    /// cooperative cancellation at suspension points.
    pub current_task: Option<Task>,
    /// Recursion depth, checked against `resource_limits.max_recursion_depth`
    /// at every `evaluate` call (spec §A.2).
    pub depth: usize,
}

impl Context {
    #[must_use]
    pub fn root(env: Environment, interner: Interner, file_id: u32, config: Rc<EvalConfig>) -> Self {
        Self { file_id, env, handlers: HandlerChain::empty(), interner, config, scope: None, current_task: None, depth: 0 }
    }

    /// A child context sharing everything but the environment — used for
    /// blocks, loop bodies, and function calls (spec §4.B `fork`).
    #[must_use]
    pub fn with_env(&self, env: Environment) -> Self {
        Self { env, depth: self.depth + 1, ..self.clone() }
    }

    #[must_use]
    pub fn with_handlers(&self, handlers: HandlerChain) -> Self {
        Self { handlers, ..self.clone() }
    }

    #[must_use]
    pub fn with_scope(&self, scope: Rc<Scope>) -> Self {
        Self { scope: Some(scope), ..self.clone() }
    }

    #[must_use]
    pub fn with_task(&self, task: Task) -> Self {
        Self { current_task: Some(task), ..self.clone() }
    }

    pub fn check_recursion(&self) -> Result<(), crate::error::UniError> {
        self.config.resource_tracker.borrow().check_recursion_depth(self.depth)?;
        Ok(())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current_task.as_ref().is_some_and(Task::is_cancel_requested)
    }
}
