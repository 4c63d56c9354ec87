//! Tasks and structured concurrency (spec §4.E).
//!
//! Every task runs as a `tokio::task::spawn_local` future inside a single
//! `LocalSet` owned by the `Runner` (see `runner.rs`) — cooperative
//! scheduling on one OS thread, matching the teacher's single-threaded
//! bytecode VM but swapping the dispatch loop for `tokio`'s executor so
//! `fork`/`await`/`parallel` compose as ordinary `async`/`.await` rather than
//! a hand-rolled trampoline. `Rc<RefCell<..>>` state is sound because nothing
//! ever crosses a thread boundary.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tokio::sync::watch;

use crate::{error::UniError, value::Value};

fn next_task_id() -> u64 {
    thread_local! {
        static NEXT: Cell<u64> = const { Cell::new(0) };
    }
    NEXT.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    })
}

#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    Completed(Value),
    Failed(Rc<UniError>),
    Cancelled,
}

#[derive(Debug)]
struct TaskState {
    outcome: Outcome,
    cancel_requested: bool,
    on_cancel: Vec<Value>,
}

/// A handle to one forked computation (spec §4.E `fork`/`Task` value).
///
/// Cloning shares the same underlying state — tasks are reference types,
/// compared by identity (spec §3 Equality).
#[derive(Debug, Clone)]
pub struct Task {
    id: u64,
    state: Rc<RefCell<TaskState>>,
    done: watch::Receiver<bool>,
}

/// The writing half kept by the spawned future driving this task to
/// completion; not exposed outside `task.rs`/`evaluator.rs`.
pub struct TaskCompletion {
    state: Rc<RefCell<TaskState>>,
    done_tx: watch::Sender<bool>,
}

impl Task {
    /// Creates a task handle plus the completion sink the spawned future uses
    /// to report its result.
    #[must_use]
    pub fn new() -> (Self, TaskCompletion) {
        let state = Rc::new(RefCell::new(TaskState {
            outcome: Outcome::Pending,
            cancel_requested: false,
            on_cancel: Vec::new(),
        }));
        let (done_tx, done_rx) = watch::channel(false);
        (
            Self { id: next_task_id(), state: state.clone(), done: done_rx },
            TaskCompletion { state, done_tx },
        )
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Requests cancellation. Cooperative: the running evaluator checks
    /// `is_cancel_requested` at suspension points (spec §4.E "cancellation is
    /// observed at the next suspension point, not pre-emptive").
    pub fn cancel(&self) {
        self.state.borrow_mut().cancel_requested = true;
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.state.borrow().cancel_requested
    }

    /// Registers a callback value to run (via the evaluator) when this task
    /// is cancelled or fails (spec §4.E `on_cancel`).
    pub fn on_cancel(&self, callback: Value) {
        self.state.borrow_mut().on_cancel.push(callback);
    }

    #[must_use]
    pub fn cancel_callbacks(&self) -> Vec<Value> {
        self.state.borrow().on_cancel.clone()
    }

    /// Suspends until the task completes, returning its result (spec §4.E
    /// `await`: success value, propagated error, or `Cancelled`).
    pub async fn join(&self) -> Result<Value, UniError> {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
        match &self.state.borrow().outcome {
            Outcome::Completed(v) => Ok(v.clone()),
            Outcome::Failed(e) => Err((**e).clone()),
            Outcome::Cancelled => Err(UniError::cancelled()),
            Outcome::Pending => Err(UniError::channel("task finished without recording an outcome")),
        }
    }
}

impl TaskCompletion {
    pub fn complete(self, result: Result<Value, UniError>) {
        let outcome = match result {
            Ok(v) => Outcome::Completed(v),
            Err(e) if matches!(e.kind, crate::error::ErrorKind::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(Rc::new(e)),
        };
        self.state.borrow_mut().outcome = outcome;
        let _ = self.done_tx.send(true);
    }
}

/// Policy for a structured-concurrency scope (spec §4.E `sync`): when one
/// child's completion should cancel its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePolicy {
    /// Wait for every child regardless of outcome.
    WaitAll,
    /// Cancel remaining siblings as soon as any child fails.
    CancelOnError,
    /// Cancel remaining siblings as soon as any child returns, success or not.
    CancelOnReturn,
}

/// Tracks the children forked directly within one `sync { ... }` block so the
/// block can join/cancel them as a unit (spec §4.E structured scopes).
#[derive(Debug, Default)]
pub struct Scope {
    children: RefCell<Vec<Task>>,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: Task) {
        self.children.borrow_mut().push(task);
    }

    #[must_use]
    pub fn children(&self) -> Vec<Task> {
        self.children.borrow().clone()
    }

    pub fn cancel_all(&self) {
        for child in self.children.borrow().iter() {
            child.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn join_returns_completed_value() {
        let (task, completion) = Task::new();
        completion.complete(Ok(Value::Number(42.0)));
        assert_eq!(task.join().await.unwrap(), Value::Number(42.0));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_is_observed_cooperatively() {
        let (task, _completion) = Task::new();
        assert!(!task.is_cancel_requested());
        task.cancel();
        assert!(task.is_cancel_requested());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scope_cancel_all_reaches_every_child() {
        let scope = Scope::new();
        let (t1, _c1) = Task::new();
        let (t2, _c2) = Task::new();
        scope.register(t1.clone());
        scope.register(t2.clone());
        scope.cancel_all();
        assert!(t1.is_cancel_requested());
        assert!(t2.is_cancel_requested());
    }
}
