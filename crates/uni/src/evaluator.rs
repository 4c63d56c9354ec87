//! The tree-walking evaluator (spec §4.G).
//!
//! `evaluate` is one big recursive `async fn`, boxed at each call site
//! (`futures::future::BoxFuture`) because Rust doesn't support recursive
//! `async fn` directly — the same trick the teacher's async generator
//! driving code uses for recursive coroutine resumption in `asyncio.rs`.
//! Control flow that needs to unwind past intervening frames (`return`,
//! labeled `break`/`continue`, `throw`) is carried as the `Err` side of a
//! `Result<Value, Unwind>` rather than modeled as literal handler-chain
//! effects; this keeps `?` usable throughout while still letting `Block`,
//! `LabeledBlock`, `Loop`, and function application catch exactly the
//! unwind kinds they own.

use std::rc::Rc;

use futures::future::BoxFuture;

use crate::{
    ast::{BinOp, Node, NodeKind, UnaryOp},
    context::Context,
    environment::BindingKey,
    error::UniError,
    pattern::{self, PatternFlags},
    task::Task,
    value::{FunctionData, Handler, RecordData, RecordKey, Value},
};

/// Non-local control flow in flight. `Error` is the ordinary failure case;
/// the rest correspond 1:1 to spec §4.G's control-flow AST nodes.
#[derive(Debug, Clone)]
pub enum Unwind {
    Error(UniError),
    Return(Value),
    Break(Option<Rc<str>>, Value),
    Continue(Option<Rc<str>>),
}

impl From<UniError> for Unwind {
    fn from(e: UniError) -> Self {
        Self::Error(e)
    }
}

impl Unwind {
    #[must_use]
    pub fn into_error(self) -> UniError {
        match self {
            Self::Error(e) => e,
            Self::Return(_) => UniError::effect("`return` outside of a function body"),
            Self::Break(_, _) => UniError::effect("`break` outside of a loop"),
            Self::Continue(_) => UniError::effect("`continue` outside of a loop"),
        }
    }
}

pub type EvalResult<'a> = BoxFuture<'a, Result<Value, Unwind>>;

/// Evaluates `node` in `ctx`, boxed for recursion (spec §4.G).
pub fn evaluate<'a>(node: &'a Node, ctx: &'a Context) -> EvalResult<'a> {
    Box::pin(async move {
        ctx.check_recursion().map_err(UniError::from)?;
        ctx.config.tracer.borrow_mut().on_eval(&node.kind, node.span);
        if ctx.is_cancelled() {
            return Err(Unwind::Error(UniError::cancelled()));
        }

        match &node.kind {
            NodeKind::Number(n) => Ok(Value::Number(*n)),
            NodeKind::String(s) => Ok(Value::String(s.clone())),
            NodeKind::Atom(name) => Ok(Value::Symbol(ctx.interner.atom(name))),
            NodeKind::Placeholder | NodeKind::ImplicitPlaceholder => Ok(Value::Null),

            NodeKind::Name(name) => lookup_name(name, node, ctx),

            NodeKind::Sequence => eval_sequence(&node.children, ctx).await,
            NodeKind::Block => {
                let inner = ctx.with_env(ctx.env.fork());
                eval_sequence(&node.children, &inner).await
            }

            NodeKind::If => {
                let cond = evaluate(node.child(0), ctx).await?;
                if cond.truthy() { evaluate(node.child(1), ctx).await } else { Ok(Value::Null) }
            }
            NodeKind::IfElse => {
                let cond = evaluate(node.child(0), ctx).await?;
                if cond.truthy() { evaluate(node.child(1), ctx).await } else { evaluate(node.child(2), ctx).await }
            }

            NodeKind::While => eval_while(node, ctx, None).await,
            NodeKind::Loop => eval_loop(node, ctx, None).await,
            NodeKind::For => eval_for(node, ctx, None).await,
            NodeKind::LabeledBlock(label) => eval_labeled(node, ctx, label).await,

            NodeKind::Return => {
                let value = match node.children.first() {
                    Some(expr) => evaluate(expr, ctx).await?,
                    None => Value::Null,
                };
                Err(Unwind::Return(value))
            }
            NodeKind::Break(label) => {
                let value = match node.children.first() {
                    Some(expr) => evaluate(expr, ctx).await?,
                    None => Value::Null,
                };
                Err(Unwind::Break(label.clone(), value))
            }
            NodeKind::Continue(label) => Err(Unwind::Continue(label.clone())),

            NodeKind::Declare => {
                let value = evaluate(node.child(1), ctx).await?;
                declare_pattern(node.child(0), value, ctx)
            }
            NodeKind::Assign => {
                let value = evaluate(node.child(1), ctx).await?;
                assign_target(node.child(0), value, ctx).await
            }
            NodeKind::IncAssign(op) => {
                let current = evaluate(node.child(0), ctx).await?;
                let rhs = evaluate(node.child(1), ctx).await?;
                let updated = apply_binop(*op, &current, &rhs, node.span)?;
                assign_target(node.child(0), updated, ctx).await
            }
            NodeKind::Increment { prefix } => eval_step(node.child(0), ctx, 1.0, *prefix).await,
            NodeKind::Decrement { prefix } => eval_step(node.child(0), ctx, -1.0, *prefix).await,

            NodeKind::Tuple => eval_tuple(&node.children, ctx).await,
            NodeKind::SquareBrackets => eval_list(&node.children, ctx).await,
            NodeKind::Label | NodeKind::Spread => {
                Err(Unwind::Error(UniError::ty(format!("{} cannot appear outside a tuple", node.kind), node.span)))
            }

            NodeKind::Index => {
                let target = evaluate(node.child(0), ctx).await?;
                let index = evaluate(node.child(1), ctx).await?;
                eval_index(&target, &index, node.span)
            }

            NodeKind::Function { binds_self } => Ok(Value::Function(Rc::new(FunctionData {
                name: None,
                captured_env: ctx.env.clone(),
                param: node.child(0).clone(),
                body: node.child(1).clone(),
                binds_self: *binds_self,
            }))),

            NodeKind::Application => eval_application(node, ctx).await,

            NodeKind::Send => {
                let channel = evaluate(node.child(0), ctx).await?;
                let value = evaluate(node.child(1), ctx).await?;
                let Value::Channel(ch) = channel else {
                    return Err(Unwind::Error(UniError::ty("send target must be a channel", node.span)));
                };
                ctx.config.tracer.borrow_mut().on_channel_op("send", ch.id());
                ch.send(value).await.map_err(|e| Unwind::Error(e.with_span_if_missing(node.span)))?;
                Ok(Value::Null)
            }
            NodeKind::Receive => {
                let channel = evaluate(node.child(0), ctx).await?;
                let Value::Channel(ch) = channel else {
                    return Err(Unwind::Error(UniError::ty("receive target must be a channel", node.span)));
                };
                ctx.config.tracer.borrow_mut().on_channel_op("receive", ch.id());
                Ok(ch.receive().await.unwrap_or(Value::Null))
            }
            NodeKind::SendStatus => {
                let channel = evaluate(node.child(0), ctx).await?;
                let value = evaluate(node.child(1), ctx).await?;
                let Value::Channel(ch) = channel else {
                    return Err(Unwind::Error(UniError::ty("send target must be a channel", node.span)));
                };
                let ok = ch.send(value).await.is_ok();
                Ok(Value::Symbol(ctx.interner.atom(if ok { "ok" } else { "error" })))
            }
            NodeKind::ReceiveStatus => {
                let channel = evaluate(node.child(0), ctx).await?;
                let Value::Channel(ch) = channel else {
                    return Err(Unwind::Error(UniError::ty("receive target must be a channel", node.span)));
                };
                let (value, status) = match ch.try_receive() {
                    Some(Some(v)) => (v, "queued"),
                    Some(None) => (Value::Null, "closed"),
                    None if ch.has_waiting_sender() => (Value::Null, "pending"),
                    None => (Value::Null, "empty"),
                };
                Ok(Value::list(vec![value, Value::Symbol(ctx.interner.atom(status))]))
            }

            NodeKind::Fork => eval_fork(node.child(0).clone(), ctx).await,
            NodeKind::Parallel => eval_parallel(&node.children, ctx).await,
            NodeKind::Await => {
                let task_value = evaluate(node.child(0), ctx).await?;
                let Value::Task(task) = task_value else {
                    return Err(Unwind::Error(UniError::ty("await target must be a task", node.span)));
                };
                task.join().await.map_err(|e| Unwind::Error(e.with_span_if_missing(node.span)))
            }

            NodeKind::Inject => eval_inject(node, ctx).await,
            NodeKind::Mask(names) => {
                let inner = ctx.with_handlers(ctx.handlers.push_mask(names.clone()));
                evaluate(node.child(0), &inner).await
            }
            NodeKind::Without(names) => {
                let inner = ctx.with_handlers(ctx.handlers.push_without(names.clone()));
                evaluate(node.child(0), &inner).await
            }
            NodeKind::Injected => {
                let mut fields = RecordData::new();
                for (k, v) in ctx.handlers.visible_bindings() {
                    fields.insert(k, v);
                }
                Ok(Value::record(fields))
            }
            NodeKind::Handle => Err(Unwind::Error(UniError::effect("`handle` node has no standalone evaluation"))),

            NodeKind::Is => {
                let value = evaluate(node.child(0), ctx).await?;
                let delta = pattern::test_pattern(node.child(1), &value, ctx, PatternFlags::default())
                    .map_err(Unwind::Error)?;
                match delta {
                    Some(delta) => {
                        pattern::apply_delta(&ctx.env, delta).map_err(Unwind::Error)?;
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            NodeKind::Match => eval_match(node, ctx).await,
            NodeKind::MatchCase => Err(Unwind::Error(UniError::effect("match case evaluated outside `match`"))),
            NodeKind::Pin => Err(Unwind::Error(UniError::ty("pin pattern evaluated outside pattern position", node.span))),
            NodeKind::Bind
            | NodeKind::Like
            | NodeKind::Strict
            | NodeKind::Mutable
            | NodeKind::Export
            | NodeKind::PatternDefault => {
                Err(Unwind::Error(UniError::ty("pattern node evaluated outside pattern position", node.span)))
            }

            NodeKind::Import(specifier) => eval_import(specifier, node, ctx).await,

            NodeKind::BinOp(op) => {
                let lhs = evaluate(node.child(0), ctx).await?;
                if matches!(op, BinOp::And) {
                    return if lhs.truthy() { evaluate(node.child(1), ctx).await } else { Ok(lhs) };
                }
                if matches!(op, BinOp::Or) {
                    return if lhs.truthy() { Ok(lhs) } else { evaluate(node.child(1), ctx).await };
                }
                let rhs = evaluate(node.child(1), ctx).await?;
                apply_binop(*op, &lhs, &rhs, node.span).map_err(Unwind::Error)
            }
            NodeKind::UnaryOp(op) => {
                let value = evaluate(node.child(0), ctx).await?;
                apply_unaryop(*op, &value, node.span).map_err(Unwind::Error)
            }

            NodeKind::Error(message) => Err(Unwind::Error(UniError::ty(message.to_string(), node.span))),
        }
    })
}

/// A best-effort *synchronous* evaluator for the narrow subset of
/// expressions allowed in pattern-guard position (`^expr` pins, `p = expr`
/// defaults): literals, name lookups, and operators. Patterns are matched
/// eagerly while testing several `match` cases in a row, so guard
/// expressions that could suspend (channel ops, awaits) are out of scope —
/// an explicit, documented restriction (see `DESIGN.md`), not an oversight.
pub fn eval_sync_hint(node: &Node, ctx: &Context) -> Result<Value, UniError> {
    match &node.kind {
        NodeKind::Number(n) => Ok(Value::Number(*n)),
        NodeKind::String(s) => Ok(Value::String(s.clone())),
        NodeKind::Atom(name) => Ok(Value::Symbol(ctx.interner.atom(name))),
        NodeKind::Placeholder => Ok(Value::Null),
        NodeKind::Name(name) => lookup_name(name, node, ctx).map_err(Unwind::into_error),
        NodeKind::BinOp(op) => {
            let lhs = eval_sync_hint(node.child(0), ctx)?;
            let rhs = eval_sync_hint(node.child(1), ctx)?;
            apply_binop(*op, &lhs, &rhs, node.span)
        }
        NodeKind::UnaryOp(op) => {
            let value = eval_sync_hint(node.child(0), ctx)?;
            apply_unaryop(*op, &value, node.span)
        }
        _ => Err(UniError::ty("this expression cannot appear in a pattern guard", node.span)),
    }
}

fn lookup_name(name: &Rc<str>, node: &Node, ctx: &Context) -> Result<Value, Unwind> {
    let key = BindingKey::Str(name.clone());
    ctx.env.lookup(&key).ok_or_else(|| {
        let did_you_mean = crate::prelude::did_you_mean(name, ctx);
        Unwind::Error(UniError::name(format!("undeclared name `{name}`"), node.span, did_you_mean))
    })
}

async fn eval_sequence(children: &[Node], ctx: &Context) -> Result<Value, Unwind> {
    let mut last = Value::Null;
    for child in children {
        last = evaluate(child, ctx).await?;
    }
    Ok(last)
}

async fn eval_while(node: &Node, ctx: &Context, label: Option<&str>) -> Result<Value, Unwind> {
    loop {
        let cond = evaluate(node.child(0), ctx).await?;
        if !cond.truthy() {
            return Ok(Value::Null);
        }
        match evaluate(node.child(1), ctx).await {
            Ok(_) => {}
            Err(Unwind::Break(l, v)) if label_matches(&l, label) => return Ok(v),
            Err(Unwind::Continue(l)) if label_matches(&l, label) => {}
            Err(other) => return Err(other),
        }
        if ctx.is_cancelled() {
            return Err(Unwind::Error(UniError::cancelled()));
        }
    }
}

async fn eval_loop(node: &Node, ctx: &Context, label: Option<&str>) -> Result<Value, Unwind> {
    loop {
        match evaluate(node.child(0), ctx).await {
            Ok(_) => {}
            Err(Unwind::Break(l, v)) if label_matches(&l, label) => return Ok(v),
            Err(Unwind::Continue(l)) if label_matches(&l, label) => {}
            Err(other) => return Err(other),
        }
        if ctx.is_cancelled() {
            return Err(Unwind::Error(UniError::cancelled()));
        }
    }
}

async fn eval_for(node: &Node, ctx: &Context, label: Option<&str>) -> Result<Value, Unwind> {
    let pattern_node = node.child(0);
    let iterable = evaluate(node.child(1), ctx).await?;
    let items: Vec<Value> = match &iterable {
        Value::List(l) => l.borrow().clone(),
        Value::Record(r) => r.borrow().iter().map(|(k, v)| record2_key_value(k, v)).collect(),
        _ => return Err(Unwind::Error(UniError::ty("`for` requires a list or record", node.span))),
    };
    for item in items {
        let iter_env = ctx.env.fork();
        let iter_ctx = ctx.with_env(iter_env);
        let delta = pattern::test_pattern(pattern_node, &item, &iter_ctx, PatternFlags::default())
            .map_err(Unwind::Error)?;
        let Some(delta) = delta else {
            return Err(Unwind::Error(UniError::ty("for-loop pattern did not match an element", pattern_node.span)));
        };
        pattern::apply_delta(&iter_ctx.env, delta).map_err(Unwind::Error)?;
        match evaluate(node.child(2), &iter_ctx).await {
            Ok(_) => {}
            Err(Unwind::Break(l, v)) if label_matches(&l, label) => return Ok(v),
            Err(Unwind::Continue(l)) if label_matches(&l, label) => {}
            Err(other) => return Err(other),
        }
        if ctx.is_cancelled() {
            return Err(Unwind::Error(UniError::cancelled()));
        }
    }
    Ok(Value::Null)
}

fn record2_key_value(k: &RecordKey, v: &Value) -> Value {
    record2("key", Value::String(match k {
        RecordKey::Str(s) => s.clone(),
        RecordKey::Sym(_) => Rc::from(":symbol"),
    }), "value", v.clone())
}

async fn eval_labeled(node: &Node, ctx: &Context, label: &str) -> Result<Value, Unwind> {
    let body = node.child(0);
    match &body.kind {
        NodeKind::While => eval_while(body, ctx, Some(label)).await,
        NodeKind::Loop => eval_loop(body, ctx, Some(label)).await,
        NodeKind::For => eval_for(body, ctx, Some(label)).await,
        _ => match evaluate(body, ctx).await {
            Err(Unwind::Break(l, v)) if label_matches(&l, Some(label)) => Ok(v),
            other => other,
        },
    }
}

fn label_matches(found: &Option<Rc<str>>, expected: Option<&str>) -> bool {
    match (found, expected) {
        (None, _) => true,
        (Some(f), Some(e)) => &**f == e,
        (Some(_), None) => false,
    }
}

fn declare_pattern(pattern_node: &Node, value: Value, ctx: &Context) -> Result<Value, Unwind> {
    let delta =
        pattern::test_pattern(pattern_node, &value, ctx, PatternFlags::default()).map_err(Unwind::Error)?;
    let Some(delta) = delta else {
        return Err(Unwind::Error(UniError::ty("declaration pattern did not match its value", pattern_node.span)));
    };
    pattern::apply_delta(&ctx.env, delta).map_err(Unwind::Error)?;
    Ok(value)
}

async fn assign_target(target: &Node, value: Value, ctx: &Context) -> Result<Value, Unwind> {
    match &target.kind {
        NodeKind::Name(name) => {
            let key = BindingKey::Str(name.clone());
            if ctx.env.assign(&key, value.clone()) {
                Ok(value)
            } else {
                Err(Unwind::Error(UniError::name(format!("cannot assign to `{name}`"), target.span, None)))
            }
        }
        NodeKind::Index => {
            let container = evaluate(target.child(0), ctx).await?;
            let index = evaluate(target.child(1), ctx).await?;
            eval_index_set(&container, &index, value.clone(), target.span).map_err(Unwind::Error)?;
            Ok(value)
        }
        _ => Err(Unwind::Error(UniError::ty("invalid assignment target", target.span))),
    }
}

async fn eval_step(target: &Node, ctx: &Context, delta: f64, prefix: bool) -> Result<Value, Unwind> {
    let current = evaluate(target, ctx).await?;
    let Value::Number(n) = current else {
        return Err(Unwind::Error(UniError::ty("++/-- require a number", target.span)));
    };
    let updated = Value::Number(n + delta);
    assign_target(target, updated.clone(), ctx).await?;
    Ok(if prefix { updated } else { Value::Number(n) })
}

async fn eval_tuple(children: &[Node], ctx: &Context) -> Result<Value, Unwind> {
    let has_labels = children.iter().any(|c| matches!(c.kind, NodeKind::Label));
    if has_labels {
        let mut fields = RecordData::new();
        for child in children {
            match &child.kind {
                NodeKind::Label => {
                    let key = label_key(child.child(0), ctx)?;
                    let value = evaluate(child.child(1), ctx).await?;
                    fields.insert(key, value);
                }
                NodeKind::Spread => {
                    let spread = evaluate(child.child(0), ctx).await?;
                    if let Value::Record(r) = spread {
                        for (k, v) in r.borrow().iter() {
                            fields.insert(k.clone(), v.clone());
                        }
                    }
                }
                _ => {
                    let value = evaluate(child, ctx).await?;
                    fields.insert(RecordKey::Str(Rc::from(fields.len().to_string())), value);
                }
            }
        }
        Ok(Value::record(fields))
    } else {
        eval_list(children, ctx).await
    }
}

fn label_key(node: &Node, ctx: &Context) -> Result<RecordKey, Unwind> {
    match &node.kind {
        NodeKind::Name(n) | NodeKind::String(n) => Ok(RecordKey::Str(n.clone())),
        NodeKind::Atom(n) => Ok(RecordKey::Sym(ctx.interner.atom(n))),
        _ => Err(Unwind::Error(UniError::ty("invalid label key", node.span))),
    }
}

async fn eval_list(children: &[Node], ctx: &Context) -> Result<Value, Unwind> {
    let mut items = Vec::with_capacity(children.len());
    for child in children {
        if let NodeKind::Spread = child.kind {
            let spread = evaluate(child.child(0), ctx).await?;
            if let Value::List(l) = spread {
                items.extend(l.borrow().iter().cloned());
            }
        } else {
            items.push(evaluate(child, ctx).await?);
        }
    }
    Ok(Value::list(items))
}

fn eval_index(target: &Value, index: &Value, span: crate::span::Span) -> Result<Value, Unwind> {
    match (target, index) {
        (Value::List(_), Value::Number(n)) => Ok(target.list_get(*n as i64).unwrap_or(Value::Null)),
        (Value::Record(_), Value::String(s)) => Ok(target.record_get(&RecordKey::Str(s.clone())).unwrap_or(Value::Null)),
        (Value::Record(_), Value::Symbol(id)) => Ok(target.record_get(&RecordKey::Sym(*id)).unwrap_or(Value::Null)),
        _ => Err(Unwind::Error(UniError::ty("value is not indexable with this key", span))),
    }
}

fn eval_index_set(target: &Value, index: &Value, value: Value, span: crate::span::Span) -> Result<(), UniError> {
    match (target, index) {
        (Value::List(l), Value::Number(n)) => {
            let i = *n as i64;
            let mut list = l.borrow_mut();
            if let Ok(i) = usize::try_from(i)
                && i < list.len()
            {
                list[i] = value;
                return Ok(());
            }
            Err(UniError::ty("list index out of bounds", span))
        }
        (Value::Record(r), Value::String(s)) => {
            r.borrow_mut().insert(RecordKey::Str(s.clone()), value);
            Ok(())
        }
        (Value::Record(r), Value::Symbol(id)) => {
            r.borrow_mut().insert(RecordKey::Sym(*id), value);
            Ok(())
        }
        _ => Err(UniError::ty("value is not assignable with this key", span)),
    }
}

async fn eval_application(node: &Node, ctx: &Context) -> Result<Value, Unwind> {
    let args_value = evaluate(node.child(1), ctx).await?;

    if let NodeKind::Name(name) = &node.child(0).kind
        && ctx.env.lookup(&BindingKey::Str(name.clone())).is_none()
        && crate::prelude::is_builtin(name)
    {
        return crate::prelude::call_builtin(name, args_value, ctx, node.span).await;
    }

    let callee = evaluate(node.child(0), ctx).await?;
    apply_function(&callee, args_value, ctx, node.span).await
}

pub async fn apply_function(callee: &Value, args: Value, ctx: &Context, span: crate::span::Span) -> Result<Value, Unwind> {
    let func = match callee {
        Value::Function(f) => f.clone(),
        Value::Handler(Handler(h)) => h.clone(),
        _ => return Err(Unwind::Error(UniError::ty("value is not callable", span))),
    };
    call_function_data(func, args, ctx, span).await
}

async fn call_function_data(func: Rc<FunctionData>, args: Value, ctx: &Context, span: crate::span::Span) -> Result<Value, Unwind> {
    let call_env = func.captured_env.fork();
    let call_ctx = Context { env: call_env.clone(), depth: ctx.depth + 1, ..ctx.clone() };
    let delta = pattern::test_pattern(&func.param, &args, &call_ctx, PatternFlags::default()).map_err(Unwind::Error)?;
    let Some(delta) = delta else {
        return Err(Unwind::Error(UniError::ty("argument did not match the function's parameter pattern", span)));
    };
    pattern::apply_delta(&call_env, delta).map_err(Unwind::Error)?;
    if func.binds_self
        && let Some(name) = &func.name
    {
        let _ = call_env.declare_immutable(BindingKey::Str(name.clone()), Value::Function(func.clone()));
    }
    match evaluate(&func.body, &call_ctx).await {
        Ok(v) => Ok(v),
        Err(Unwind::Return(v)) => Ok(v),
        Err(other) => Err(other),
    }
}

async fn eval_fork(body: Node, ctx: &Context) -> Result<Value, Unwind> {
    let (task, completion) = Task::new();
    ctx.config.tracer.borrow_mut().on_task_spawned(task.id());
    if let Some(scope) = &ctx.scope {
        scope.register(task.clone());
    }
    let task_ctx = ctx.with_task(task.clone());
    let fut_ctx = task_ctx.clone();
    let callback_task = task.clone();
    tokio::task::spawn_local(async move {
        let result = evaluate(&body, &fut_ctx).await;
        let outcome = match result {
            Ok(v) => Ok(v),
            Err(Unwind::Return(v)) => Ok(v),
            Err(other) => Err(other.into_error()),
        };
        if matches!(&outcome, Err(e) if matches!(e.kind, crate::error::ErrorKind::Cancelled)) {
            // The cancelled task itself must not veto its own cleanup: a
            // callback body would otherwise see `is_cancelled()` true and
            // bail out before doing anything.
            let callback_ctx = Context { current_task: None, ..fut_ctx.clone() };
            for callback in callback_task.cancel_callbacks() {
                let _ = apply_function(&callback, Value::list(vec![]), &callback_ctx, crate::span::Span::synthetic()).await;
            }
        }
        completion.complete(outcome);
    });
    Ok(Value::Task(task))
}

async fn eval_parallel(children: &[Node], ctx: &Context) -> Result<Value, Unwind> {
    let mut tasks = Vec::with_capacity(children.len());
    for child in children {
        let task_value = eval_fork(child.clone(), ctx).await?;
        tasks.push(task_value);
    }
    Ok(Value::list(tasks))
}

async fn eval_inject(node: &Node, ctx: &Context) -> Result<Value, Unwind> {
    let handler_record = evaluate(node.child(0), ctx).await?;
    let Value::Record(fields) = handler_record else {
        return Err(Unwind::Error(UniError::ty("`inject` requires a record of handlers", node.span)));
    };
    let bindings: Vec<(RecordKey, Value)> = fields.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let inner = ctx.with_handlers(ctx.handlers.push_inject(bindings));
    evaluate(node.child(1), &inner).await
}

/// Invokes the handler bound for `tag`, if any, with `(resume, payload)`
/// (spec §4.F). This crate supports single-shot handler invocation: the
/// handler's return value becomes the result of the `handle` call directly,
/// rather than resuming an arbitrary suspended continuation — multi-shot
/// delimited continuations are out of scope for a tree-walking evaluator
/// without a CPS transform (documented open question, see `DESIGN.md`).
pub async fn invoke_handler(tag: &RecordKey, payload: Value, ctx: &Context, span: crate::span::Span) -> Result<Value, Unwind> {
    let Some(handler) = ctx.handlers.find(tag) else {
        return Err(Unwind::Error(UniError::effect(format!("no handler injected for `{tag}`"))));
    };
    ctx.config.tracer.borrow_mut().on_handler_invoked(&tag.to_string());
    let resume = Value::Function(Rc::new(FunctionData {
        name: None,
        captured_env: ctx.env.clone(),
        param: Node::leaf(span, NodeKind::Placeholder),
        body: Node::leaf(span, NodeKind::Placeholder),
        binds_self: false,
    }));
    apply_function(&handler, Value::list(vec![resume, payload]), ctx, span).await
}

async fn eval_match(node: &Node, ctx: &Context) -> Result<Value, Unwind> {
    let discriminant = evaluate(node.child(0), ctx).await?;
    for case in &node.children[1..] {
        let case_env = ctx.env.fork();
        let case_ctx = ctx.with_env(case_env);
        let delta = pattern::test_pattern(case.child(0), &discriminant, &case_ctx, PatternFlags::default())
            .map_err(Unwind::Error)?;
        if let Some(delta) = delta {
            pattern::apply_delta(&case_ctx.env, delta).map_err(Unwind::Error)?;
            return evaluate(case.child(1), &case_ctx).await;
        }
    }
    Err(Unwind::Error(UniError::ty("no `match` case matched the value", node.span)))
}

async fn eval_import(specifier: &str, node: &Node, ctx: &Context) -> Result<Value, Unwind> {
    if let Some(cached) = ctx.config.modules.get(specifier) {
        let module_value = cached.map_err(|e| Unwind::Error(e.with_span_if_missing(node.span)))?;
        return bind_import(node, module_value, ctx).await;
    }
    let Some(loader) = &ctx.config.module_loader else {
        return Err(Unwind::Error(UniError::import(format!("no module loader configured for `{specifier}`"))));
    };
    ctx.config.modules.begin(specifier);
    let module_ast = loader.load(specifier).map_err(Unwind::Error)?;
    let module_env = crate::environment::Environment::root();
    let module_ctx = Context { env: module_env, handlers: crate::effect::HandlerChain::empty(), depth: 0, ..ctx.clone() };
    let result = evaluate(&module_ast, &module_ctx)
        .await
        .map_err(|u| match u {
            Unwind::Return(v) => Ok(v),
            Unwind::Error(e) => Err(e),
            _ => Err(UniError::import(format!("module `{specifier}` exited non-locally"))),
        })
        .unwrap_or_else(|e| Err(e));
    let finished = ctx.config.modules.finish(specifier, result);
    let module_value = finished.map_err(|e| Unwind::Error(e.with_span_if_missing(node.span)))?;
    bind_import(node, module_value, ctx).await
}

async fn bind_import(node: &Node, module_value: Value, ctx: &Context) -> Result<Value, Unwind> {
    if let Some(pattern_node) = node.children.first() {
        declare_pattern(pattern_node, module_value, ctx)
    } else {
        Ok(module_value)
    }
}

fn record2(k1: &str, v1: Value, k2: &str, v2: Value) -> Value {
    let mut fields = RecordData::new();
    fields.insert(RecordKey::Str(Rc::from(k1)), v1);
    fields.insert(RecordKey::Str(Rc::from(k2)), v2);
    Value::record(fields)
}

pub fn apply_binop(op: BinOp, lhs: &Value, rhs: &Value, span: crate::span::Span) -> Result<Value, UniError> {
    use Value::{Bool, Number, String as Str};
    match op {
        BinOp::Add => match (lhs, rhs) {
            (Number(a), Number(b)) => Ok(Number(a + b)),
            (Str(a), Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            _ => Err(UniError::ty("`+` requires two numbers or two strings", span)),
        },
        BinOp::Sub => numeric(lhs, rhs, span, |a, b| a - b),
        BinOp::Mul => numeric(lhs, rhs, span, |a, b| a * b),
        BinOp::Div => numeric(lhs, rhs, span, |a, b| a / b),
        BinOp::Mod => numeric(lhs, rhs, span, |a, b| a % b),
        BinOp::Pow => numeric(lhs, rhs, span, f64::powf),
        BinOp::Lt => comparison(lhs, rhs, span, |a, b| a < b),
        BinOp::LtEq => comparison(lhs, rhs, span, |a, b| a <= b),
        BinOp::Gt => comparison(lhs, rhs, span, |a, b| a > b),
        BinOp::GtEq => comparison(lhs, rhs, span, |a, b| a >= b),
        BinOp::Eq => Ok(Bool(lhs == rhs)),
        BinOp::NotEq => Ok(Bool(lhs != rhs)),
        BinOp::StructEq => Ok(Bool(lhs.structural_eq(rhs).map_err(|e| UniError::ty(e.to_string(), span))?)),
        BinOp::StructNotEq => Ok(Bool(!lhs.structural_eq(rhs).map_err(|e| UniError::ty(e.to_string(), span))?)),
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators are handled by the caller"),
    }
}

fn numeric(lhs: &Value, rhs: &Value, span: crate::span::Span, f: impl Fn(f64, f64) -> f64) -> Result<Value, UniError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b))),
        _ => Err(UniError::ty("arithmetic requires two numbers", span)),
    }
}

fn comparison(lhs: &Value, rhs: &Value, span: crate::span::Span, f: impl Fn(f64, f64) -> bool) -> Result<Value, UniError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(f(*a, *b))),
        _ => Err(UniError::ty("comparison requires two numbers", span)),
    }
}

pub fn apply_unaryop(op: UnaryOp, value: &Value, span: crate::span::Span) -> Result<Value, UniError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        _ => Err(UniError::ty("unary `-` requires a number", span)),
    }
}

/// Convenience entry point used by `Runner`: evaluates `node` to completion,
/// converting any leftover `Unwind` variant into an ordinary error (`return`
/// at the top level just yields its value; stray `break`/`continue` are
/// reported as errors).
pub async fn run(node: &Node, ctx: &Context) -> Result<Value, UniError> {
    match evaluate(node, ctx).await {
        Ok(v) => Ok(v),
        Err(Unwind::Return(v)) => Ok(v),
        Err(other) => Err(other.into_error()),
    }
}
