//! The pattern-matching engine (spec §4.C).
//!
//! Matching happens in two phases: `test_pattern` walks the pattern against a
//! value and produces an `EnvDelta` *without* mutating any environment, then
//! `apply_delta` commits it. Two phases because `is`/`match` need to try a
//! pattern and silently fail it without having partially bound names from an
//! earlier sibling case — the same reason the teacher's pattern-compilation
//! pass in `expressions.rs` separated "does this shape match" from "emit the
//! bindings" rather than binding eagerly and unwinding on failure.

use std::rc::Rc;

use crate::{
    ast::{Node, NodeKind},
    context::Context,
    environment::{AlreadyDeclared, BindingKey, Environment},
    error::UniError,
    value::{RecordKey, Value},
};

/// Modifiers threaded down through pattern recursion; each wrapper node
/// (`mut p`, `export p`, `like p`, `strict p`) flips one of these for its
/// subtree (spec §4.C).
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternFlags {
    pub mutable: bool,
    pub export: bool,
    pub strict: bool,
}

impl PatternFlags {
    #[must_use]
    pub fn mutable(self) -> Self {
        Self { mutable: true, ..self }
    }

    #[must_use]
    pub fn export(self) -> Self {
        Self { export: true, ..self }
    }

    #[must_use]
    pub fn strict(self) -> Self {
        Self { strict: true, ..self }
    }

    #[must_use]
    pub fn relaxed(self) -> Self {
        Self { strict: false, ..self }
    }
}

/// Bindings a successful match would introduce, not yet committed to any
/// environment.
#[derive(Debug, Default)]
pub struct EnvDelta {
    immutable: Vec<(BindingKey, Value)>,
    mutable: Vec<(BindingKey, Value)>,
    exported: Vec<BindingKey>,
}

impl EnvDelta {
    fn push(&mut self, key: BindingKey, value: Value, flags: PatternFlags) {
        if flags.mutable {
            self.mutable.push((key.clone(), value));
        } else {
            self.immutable.push((key.clone(), value));
        }
        if flags.export {
            self.exported.push(key);
        }
    }

    fn merge(&mut self, other: EnvDelta) {
        self.immutable.extend(other.immutable);
        self.mutable.extend(other.mutable);
        self.exported.extend(other.exported);
    }

    #[must_use]
    pub fn exported_names(&self) -> &[BindingKey] {
        &self.exported
    }
}

/// Commits a successful match's bindings into `env` (spec §4.C "a matched
/// pattern's bindings are declared, not assigned").
pub fn apply_delta(env: &Environment, delta: EnvDelta) -> Result<(), UniError> {
    for (key, value) in delta.immutable {
        env.declare_immutable(key, value).map_err(duplicate_binding)?;
    }
    for (key, value) in delta.mutable {
        env.declare_mutable(key, value).map_err(duplicate_binding)?;
    }
    Ok(())
}

fn duplicate_binding(_: AlreadyDeclared) -> UniError {
    UniError::name("duplicate binding in the same pattern", crate::span::Span::synthetic(), None)
}

/// Tests `pattern` against `value`. `Ok(None)` is a clean non-match (spec
/// §4.C "failing a pattern is not an error"); `Err` is a genuine evaluation
/// failure raised while testing it (e.g. a pinned expression that itself
/// throws).
pub fn test_pattern(
    pattern: &Node,
    value: &Value,
    ctx: &Context,
    flags: PatternFlags,
) -> Result<Option<EnvDelta>, UniError> {
    match &pattern.kind {
        NodeKind::Placeholder | NodeKind::ImplicitPlaceholder => Ok(Some(EnvDelta::default())),

        NodeKind::Number(n) => Ok(literal_match(*n == as_number(value).unwrap_or(f64::NAN))),
        NodeKind::String(s) => Ok(literal_match(matches!(value, Value::String(v) if v == s))),
        NodeKind::Atom(name) => {
            let id = ctx.interner.atom(name);
            Ok(literal_match(matches!(value, Value::Symbol(v) if *v == id)))
        }

        NodeKind::Name(name) => {
            if flags.strict && matches!(value, Value::Null) {
                return Ok(None);
            }
            let mut delta = EnvDelta::default();
            delta.push(BindingKey::Str(name.clone()), value.clone(), flags);
            Ok(Some(delta))
        }

        NodeKind::Pin => {
            // children: [expr] — the pinned value is compared with `==`.
            let expr = pattern.child(0);
            let pinned = crate::evaluator::eval_sync_hint(expr, ctx)?;
            Ok(literal_match(pinned == *value))
        }

        NodeKind::Bind => {
            let lhs = test_pattern(pattern.child(0), value, ctx, flags)?;
            let rhs = test_pattern(pattern.child(1), value, ctx, flags)?;
            match (lhs, rhs) {
                (Some(mut a), Some(b)) => {
                    a.merge(b);
                    Ok(Some(a))
                }
                _ => Ok(None),
            }
        }

        NodeKind::PatternDefault => {
            if matches!(value, Value::Null) {
                let default_value = crate::evaluator::eval_sync_hint(pattern.child(1), ctx)?;
                test_pattern(pattern.child(0), &default_value, ctx, flags)
            } else {
                test_pattern(pattern.child(0), value, ctx, flags)
            }
        }

        NodeKind::Mutable => test_pattern(pattern.child(0), value, ctx, flags.mutable()),
        NodeKind::Export => test_pattern(pattern.child(0), value, ctx, flags.export()),
        NodeKind::Strict => test_pattern(pattern.child(0), value, ctx, flags.strict()),
        NodeKind::Like => test_pattern(pattern.child(0), value, ctx, flags.relaxed()),

        NodeKind::Tuple => test_tuple_pattern(pattern, value, ctx, flags),

        _ => Err(UniError::ty(format!("not a valid pattern: {}", pattern.kind.name()), pattern.span)),
    }
}

fn literal_match(matches: bool) -> Option<EnvDelta> {
    matches.then(EnvDelta::default)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

/// Matches a `Tuple` pattern against a list or record value. At most one
/// `Spread` element is allowed; it greedily captures the middle while the
/// elements to its right are matched against the value's tail, right-aligned
/// (spec §4.C "a spread accounts for fixed elements on both sides").
fn test_tuple_pattern(
    pattern: &Node,
    value: &Value,
    ctx: &Context,
    flags: PatternFlags,
) -> Result<Option<EnvDelta>, UniError> {
    let elements = &pattern.children;
    let spread_index = elements.iter().position(|c| matches!(c.kind, NodeKind::Spread));

    let Value::List(items) = value else {
        if !flags.strict && matches!(value, Value::Null) {
            return Ok(None);
        }
        return Err(UniError::ty("tuple pattern requires a list value", pattern.span));
    };
    let items = items.borrow();

    let mut delta = EnvDelta::default();
    match spread_index {
        None => {
            if items.len() != elements.len() {
                return Ok(None);
            }
            for (el, v) in elements.iter().zip(items.iter()) {
                match test_pattern(el, v, ctx, flags)? {
                    Some(d) => delta.merge(d),
                    None => return Ok(None),
                }
            }
        }
        Some(idx) => {
            let before = &elements[..idx];
            let after = &elements[idx + 1..];
            if items.len() < before.len() + after.len() {
                return Ok(None);
            }
            for (el, v) in before.iter().zip(items.iter()) {
                match test_pattern(el, v, ctx, flags)? {
                    Some(d) => delta.merge(d),
                    None => return Ok(None),
                }
            }
            let tail_start = items.len() - after.len();
            for (el, v) in after.iter().zip(items[tail_start..].iter()) {
                match test_pattern(el, v, ctx, flags)? {
                    Some(d) => delta.merge(d),
                    None => return Ok(None),
                }
            }
            let spread_node = &elements[idx];
            if let Some(name_child) = spread_node.children.first()
                && let NodeKind::Name(name) = &name_child.kind
            {
                let captured = Value::list(items[before.len()..tail_start].to_vec());
                delta.push(BindingKey::Str(Rc::clone(name)), captured, flags);
            }
        }
    }
    Ok(Some(delta))
}

/// Matches a `Record`-shaped pattern (used by `handle`'s payload destructuring
/// and `import ... as { ... }`) — currently a thin alias over tuple matching
/// against an `IndexMap`'s values in declaration order, field names resolved
/// by looking up each `Label` child's key.
pub fn test_record_pattern(
    pattern: &Node,
    value: &Value,
    ctx: &Context,
    flags: PatternFlags,
) -> Result<Option<EnvDelta>, UniError> {
    let Value::Record(fields) = value else {
        return Err(UniError::ty("record pattern requires a record value", pattern.span));
    };
    let fields = fields.borrow();
    let mut delta = EnvDelta::default();
    for child in pattern.children.iter() {
        match &child.kind {
            NodeKind::Label => {
                let key_node = child.child(0);
                let key = match &key_node.kind {
                    NodeKind::Name(n) | NodeKind::String(n) => RecordKey::Str(Rc::clone(n)),
                    NodeKind::Atom(n) => RecordKey::Sym(ctx.interner.atom(n)),
                    _ => return Err(UniError::ty("invalid record pattern key", key_node.span)),
                };
                let field_value = fields.get(&key).cloned().unwrap_or(Value::Null);
                match test_pattern(child.child(1), &field_value, ctx, flags)? {
                    Some(d) => delta.merge(d),
                    None => return Ok(None),
                }
            }
            NodeKind::Name(name) => {
                let key = RecordKey::Str(Rc::clone(name));
                let field_value = fields.get(&key).cloned().unwrap_or(Value::Null);
                delta.push(key, field_value, flags);
            }
            NodeKind::Spread => {
                // Captures the remaining fields into a fresh record, bound
                // to the spread's inner name if present.
                if let Some(name_child) = child.children.first()
                    && let NodeKind::Name(name) = &name_child.kind
                {
                    let mut rest = fields.clone();
                    // Remove explicitly-named fields from the captured rest.
                    for sibling in pattern.children.iter() {
                        let key = match &sibling.kind {
                            NodeKind::Name(n) => Some(RecordKey::Str(Rc::clone(n))),
                            NodeKind::Label => match &sibling.child(0).kind {
                                NodeKind::Name(n) | NodeKind::String(n) => Some(RecordKey::Str(Rc::clone(n))),
                                _ => None,
                            },
                            _ => None,
                        };
                        if let Some(key) = key {
                            rest.shift_remove(&key);
                        }
                    }
                    delta.push(BindingKey::Str(Rc::clone(name)), Value::record(rest), flags);
                }
            }
            _ => return Err(UniError::ty("invalid record pattern element", child.span)),
        }
    }
    Ok(Some(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{environment::Environment, intern::Interner, span::Span};

    fn test_ctx() -> Context {
        Context::root(Environment::root(), Interner::new(), 0, Rc::new(crate::context::EvalConfig::default()))
    }

    #[test]
    fn name_pattern_binds_immutably_by_default() {
        let ctx = test_ctx();
        let pattern = Node::leaf(Span::synthetic(), NodeKind::Name(Rc::from("x")));
        let delta = test_pattern(&pattern, &Value::Number(1.0), &ctx, PatternFlags::default()).unwrap().unwrap();
        let env = Environment::root();
        apply_delta(&env, delta).unwrap();
        assert_eq!(env.lookup(&BindingKey::Str(Rc::from("x"))), Some(Value::Number(1.0)));
    }

    #[test]
    fn placeholder_matches_anything_without_binding() {
        let ctx = test_ctx();
        let pattern = Node::leaf(Span::synthetic(), NodeKind::Placeholder);
        let delta = test_pattern(&pattern, &Value::Bool(true), &ctx, PatternFlags::default()).unwrap();
        assert!(delta.unwrap().immutable.is_empty());
    }

    #[test]
    fn tuple_spread_captures_middle_elements() {
        let ctx = test_ctx();
        let pattern = Node::new(
            Span::synthetic(),
            NodeKind::Tuple,
            vec![
                Node::leaf(Span::synthetic(), NodeKind::Name(Rc::from("first"))),
                Node::new(
                    Span::synthetic(),
                    NodeKind::Spread,
                    vec![Node::leaf(Span::synthetic(), NodeKind::Name(Rc::from("middle")))],
                ),
                Node::leaf(Span::synthetic(), NodeKind::Name(Rc::from("last"))),
            ],
        );
        let value = Value::list(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)]);
        let delta = test_pattern(&pattern, &value, &ctx, PatternFlags::default()).unwrap().unwrap();
        let env = Environment::root();
        apply_delta(&env, delta).unwrap();
        assert_eq!(env.lookup(&BindingKey::Str(Rc::from("first"))), Some(Value::Number(1.0)));
        assert_eq!(env.lookup(&BindingKey::Str(Rc::from("last"))), Some(Value::Number(4.0)));
        assert_eq!(
            env.lookup(&BindingKey::Str(Rc::from("middle"))),
            Some(Value::list(vec![Value::Number(2.0), Value::Number(3.0)]))
        );
    }
}
