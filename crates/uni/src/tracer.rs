//! Evaluator execution tracing (spec §A.3 of `SPEC_FULL.md`).
//!
//! Trait-based tracing with zero-cost no-op default, the same shape as the
//! teacher's `VmTracer` for its bytecode dispatch loop — here the hook points
//! are evaluator events (node dispatch, effect raised, task spawned, channel
//! op, handler invoked) rather than opcode dispatch, since there is no
//! bytecode here.

use crate::{ast::NodeKind, intern::SymbolId, span::Span};

/// A single recorded trace event, used by [`RecordingTracer`].
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// A node was about to be evaluated.
    Eval { kind_name: &'static str, span: Span },
    /// An effect was raised (via a built-in control-flow tag or `handle`).
    EffectRaised { tag_name: String },
    /// A handler bound by `inject` was invoked for a raised effect.
    HandlerInvoked { tag_name: String },
    /// A task was forked.
    TaskSpawned { task_id: u64 },
    /// A channel operation (`send`, `receive`, `close`) occurred.
    ChannelOp { op: &'static str, channel_id: u64 },
}

/// Trait for evaluator execution tracing. All methods default to no-ops, so
/// [`NoopTracer`] compiles away entirely (mirrors `ResourceTracker`'s
/// zero-cost default).
pub trait VmTracer: std::fmt::Debug {
    #[inline(always)]
    fn on_eval(&mut self, _kind: &NodeKind, _span: Span) {}

    #[inline(always)]
    fn on_effect_raised(&mut self, _tag_name: &str) {}

    #[inline(always)]
    fn on_handler_invoked(&mut self, _tag_name: &str) {}

    #[inline(always)]
    fn on_task_spawned(&mut self, _task_id: u64) {}

    #[inline(always)]
    fn on_channel_op(&mut self, _op: &'static str, _channel_id: u64) {}
}

/// Zero-cost production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Human-readable execution log to stderr, useful for interactive debugging.
#[derive(Debug)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { limit: None, count: 0, stopped: false }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), count: 0, stopped: false }
    }

    fn tick(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} events) ---");
            self.stopped = true;
        }
        true
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    fn on_eval(&mut self, kind: &NodeKind, span: Span) {
        if self.tick() {
            eprintln!("[{span}] eval {kind}");
        }
    }

    fn on_effect_raised(&mut self, tag_name: &str) {
        if self.tick() {
            eprintln!("  !!! effect raised: {tag_name}");
        }
    }

    fn on_handler_invoked(&mut self, tag_name: &str) {
        if self.tick() {
            eprintln!("  >>> handler invoked: {tag_name}");
        }
    }

    fn on_task_spawned(&mut self, task_id: u64) {
        if self.tick() {
            eprintln!("  +++ task spawned: {task_id}");
        }
    }

    fn on_channel_op(&mut self, op: &'static str, channel_id: u64) {
        if self.tick() {
            eprintln!("  ... channel {channel_id} {op}");
        }
    }
}

/// Records every event for post-mortem inspection or deterministic replay
/// comparisons; the most expensive tracer, intended for tests and debugging.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { events: Vec::with_capacity(limit.min(1024)), limit: Some(limit) }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|l| self.events.len() >= l)
    }
}

impl VmTracer for RecordingTracer {
    fn on_eval(&mut self, kind: &NodeKind, span: Span) {
        if !self.at_limit() {
            self.events.push(TraceEvent::Eval { kind_name: kind.name(), span });
        }
    }

    fn on_effect_raised(&mut self, tag_name: &str) {
        if !self.at_limit() {
            self.events.push(TraceEvent::EffectRaised { tag_name: tag_name.to_owned() });
        }
    }

    fn on_handler_invoked(&mut self, tag_name: &str) {
        if !self.at_limit() {
            self.events.push(TraceEvent::HandlerInvoked { tag_name: tag_name.to_owned() });
        }
    }

    fn on_task_spawned(&mut self, task_id: u64) {
        if !self.at_limit() {
            self.events.push(TraceEvent::TaskSpawned { task_id });
        }
    }

    fn on_channel_op(&mut self, op: &'static str, channel_id: u64) {
        if !self.at_limit() {
            self.events.push(TraceEvent::ChannelOp { op, channel_id });
        }
    }
}

/// Helper so a `SymbolId`-tagged effect can produce a display name for trace
/// events without threading an `Interner` through every tracer call site.
pub fn symbol_trace_name(interner: &crate::intern::Interner, id: SymbolId) -> String {
    interner.name(id).to_string()
}
