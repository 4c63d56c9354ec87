#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at call sites")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional for index conversion")]
#![expect(clippy::cast_precision_loss, reason = "list lengths never approach f64's mantissa limit")]
#![expect(clippy::too_many_arguments, reason = "a few evaluator helpers thread the full context by design")]
#![expect(clippy::type_complexity, reason = "the handler-chain and pattern-delta types are intentionally rich")]

mod ast;
mod channel;
mod context;
mod effect;
mod environment;
mod error;
mod evaluator;
mod intern;
mod module;
mod pattern;
mod prelude;
pub mod resource;
mod runner;
mod span;
mod task;
pub mod tracer;
mod value;

pub use crate::{
    ast::{BinOp, Literal, Node, NodeKind, UnaryOp},
    channel::Channel,
    context::{Context, EvalConfig},
    effect::HandlerChain,
    environment::{AlreadyDeclared, BindingKey, Environment},
    error::{ErrorKind, UniError},
    evaluator::{run, Unwind},
    intern::{Interner, SymbolId},
    module::{ModuleLoader, ModuleRegistry},
    resource::{DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    runner::Runner,
    span::Span,
    task::{Scope, ScopePolicy, Task},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::{CycleDetected, EffectData, EffectTag, FunctionData, Handler, RecordData, RecordKey, Value},
};
