//! Built-in prelude functions (spec §A.5 in `SPEC_FULL.md`, §4.F/§4.D/§4.E
//! wiring for `handle`/`throw`/`try`/`channel`/`wait`/`atom`/`symbol`/
//! `cancel`/`sync`/`cancel_on_error`/`cancel_on_return`).
//!
//! These aren't ordinary `Value::Function`s — they're native, so they're
//! recognized by name at the call site in `evaluator::eval_application`
//! rather than looked up through `Environment` (the same shortcut the
//! teacher's `builtins.rs` took for the handful of opcodes that needed
//! direct VM access instead of going through the namespace).  A user
//! binding of the same name always wins: the evaluator only reaches here
//! once `Environment::lookup` has already come back empty.

use std::{rc::Rc, time::Duration};

use crate::{
    channel::Channel,
    context::Context,
    error::UniError,
    evaluator::{apply_function, Unwind},
    span::Span,
    task::{Scope, ScopePolicy},
    value::{RecordKey, Value},
};

const BUILTINS: &[&str] = &[
    "handle",
    "throw",
    "try",
    "channel",
    "wait",
    "atom",
    "symbol",
    "cancel",
    "on_cancel",
    "sync",
    "cancel_on_error",
    "cancel_on_return",
];

#[must_use]
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

fn args_list(args: &Value) -> Vec<Value> {
    match args {
        Value::List(l) => l.borrow().clone(),
        other => vec![other.clone()],
    }
}

pub async fn call_builtin(name: &str, args: Value, ctx: &Context, span: Span) -> Result<Value, Unwind> {
    let items = args_list(&args);
    match name {
        "handle" => {
            let tag = items.first().cloned().unwrap_or(Value::Null);
            let payload = items.get(1).cloned().unwrap_or(Value::Null);
            let key = value_to_record_key(&tag, ctx, span)?;
            crate::evaluator::invoke_handler(&key, payload, ctx, span).await
        }
        "throw" => {
            let payload = items.first().cloned().unwrap_or(Value::Null);
            Err(Unwind::Error(UniError::user(payload).with_span_if_missing(span)))
        }
        "try" => {
            let target = items.first().cloned().unwrap_or(Value::Null);
            match apply_function(&target, Value::list(vec![]), ctx, span).await {
                Ok(v) => Ok(v),
                Err(Unwind::Error(e)) => {
                    let atom_error = Value::Symbol(ctx.interner.atom("error"));
                    Ok(e.to_value(atom_error))
                }
                Err(other) => Err(other),
            }
        }
        "channel" => {
            let capacity = match items.first() {
                Some(Value::Number(n)) => Some(*n as usize),
                _ => None,
            };
            Ok(Value::Channel(Channel::new(capacity)))
        }
        "wait" => {
            let ms = match items.first() {
                Some(Value::Number(n)) => *n,
                _ => 0.0,
            };
            tokio::time::sleep(Duration::from_secs_f64((ms / 1000.0).max(0.0))).await;
            Ok(Value::Null)
        }
        "atom" => {
            let Some(Value::String(s)) = items.first() else {
                return Err(Unwind::Error(UniError::ty("atom(name) requires a string", span)));
            };
            Ok(Value::Symbol(ctx.interner.atom(s)))
        }
        "symbol" => {
            let Some(Value::String(s)) = items.first() else {
                return Err(Unwind::Error(UniError::ty("symbol(name) requires a string", span)));
            };
            Ok(Value::Symbol(ctx.interner.symbol(s)))
        }
        "cancel" => {
            let Some(Value::Task(task)) = items.first() else {
                return Err(Unwind::Error(UniError::ty("cancel(task) requires a task", span)));
            };
            task.cancel();
            Ok(Value::Null)
        }
        "on_cancel" => {
            let Some(Value::Task(task)) = items.first() else {
                return Err(Unwind::Error(UniError::ty("on_cancel(task, callback) requires a task", span)));
            };
            let Some(callback @ (Value::Function(_) | Value::Handler(_))) = items.get(1).cloned() else {
                return Err(Unwind::Error(UniError::ty("on_cancel(task, callback) requires a callback", span)));
            };
            task.on_cancel(callback);
            Ok(Value::Null)
        }
        "sync" => run_scope(items.first(), ctx, span, ScopePolicy::WaitAll).await,
        "cancel_on_error" => run_scope(items.first(), ctx, span, ScopePolicy::CancelOnError).await,
        "cancel_on_return" => run_scope(items.first(), ctx, span, ScopePolicy::CancelOnReturn).await,
        _ => unreachable!("is_builtin gated this call"),
    }
}

/// Runs `body` (a zero-argument function) as a structured-concurrency scope:
/// any task forked directly within it is tracked, and once the scope's body
/// completes the policy decides whether remaining children are cancelled
/// before the scope as a whole returns (spec §4.E `sync`/`cancel_on_*`).
async fn run_scope(body: Option<&Value>, ctx: &Context, span: Span, policy: ScopePolicy) -> Result<Value, Unwind> {
    let Some(body) = body else {
        return Err(Unwind::Error(UniError::ty("scope builtin requires a zero-argument function", span)));
    };
    let scope = Rc::new(Scope::new());
    let scoped_ctx = ctx.with_scope(scope.clone());
    let result = apply_function(body, Value::list(vec![]), &scoped_ctx, span).await;

    let should_cancel = match (&result, policy) {
        (_, ScopePolicy::WaitAll) => false,
        (Err(_), ScopePolicy::CancelOnError) => true,
        (_, ScopePolicy::CancelOnReturn) => true,
        _ => false,
    };
    if should_cancel {
        scope.cancel_all();
    }
    for child in scope.children() {
        let _ = child.join().await;
    }
    result
}

fn value_to_record_key(value: &Value, ctx: &Context, span: Span) -> Result<RecordKey, Unwind> {
    match value {
        Value::String(s) => Ok(RecordKey::Str(s.clone())),
        Value::Symbol(id) => Ok(RecordKey::Sym(*id)),
        _ => {
            let _ = ctx;
            Err(Unwind::Error(UniError::ty("effect tag must be a string or symbol", span)))
        }
    }
}

/// Suggests the closest visible name by Damerau-Levenshtein edit distance,
/// capped at 2 (spec §A.1). `None` if nothing is close enough to be useful.
#[must_use]
pub fn did_you_mean(name: &str, ctx: &Context) -> Option<String> {
    let mut best: Option<(usize, String)> = None;
    for key in ctx.env.visible_names() {
        let RecordKey::Str(candidate) = key else { continue };
        let distance = edit_distance(name, &candidate);
        if distance <= 2 && best.as_ref().is_none_or(|(d, _)| distance < *d) {
            best = Some((distance, candidate.to_string()));
        }
    }
    for candidate in BUILTINS {
        let distance = edit_distance(name, candidate);
        if distance <= 2 && best.as_ref().is_none_or(|(d, _)| distance < *d) {
            best = Some((distance, (*candidate).to_owned()));
        }
    }
    best.map(|(_, name)| name)
}

/// Damerau-Levenshtein edit distance (insert/delete/substitute/transpose),
/// small-alphabet identifiers only, so the naive O(n*m) table is plenty.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    let mut d = vec![vec![0usize; lb + 1]; la + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=lb {
        d[0][j] = j;
    }
    for i in 1..=la {
        for j in 1..=lb {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            d[i][j] = (d[i - 1][j] + 1).min(d[i][j - 1] + 1).min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d[i][j] = d[i][j].min(d[i - 2][j - 2] + 1);
            }
        }
    }
    d[la][lb]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_counts_a_single_transposition_as_one() {
        assert_eq!(edit_distance("teh", "the"), 1);
    }

    #[test]
    fn edit_distance_is_zero_for_equal_strings() {
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
