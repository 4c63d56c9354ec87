//! The runtime value domain (spec §3, §4.A).
//!
//! Heap-backed variants (`List`, `Record`) are `Rc<RefCell<..>>` rather than
//! the teacher's arena-indexed `HeapId` + generational `Heap`: the scheduler
//! (`task.rs`) confines every task to one OS thread via a `LocalSet`, so we
//! don't need the teacher's cross-thread-safe arena, just ordinary
//! reference-counted interior mutability. `Function`/`Effect`/`Handler` are
//! `Rc` for cheap closure-capture cloning.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Node,
    channel::Channel,
    effect::HandlerFn,
    environment::Environment,
    intern::SymbolId,
    task::Task,
};

/// A key in a `Record`: strings and symbols are the only valid key kinds
/// (spec §3 "keys are strings or symbols").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Str(Rc<str>),
    Sym(SymbolId),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Sym(_) => write!(f, ":<symbol>"),
        }
    }
}

/// Insertion-ordered string-or-symbol-keyed map backing `Value::Record`.
pub type RecordData = IndexMap<RecordKey, Value>;

/// A closure: captured environment, parameter pattern, body, and whether the
/// outermost of a curried chain binds `self` for recursion (spec §4.A, §4.G).
#[derive(Debug)]
pub struct FunctionData {
    pub name: Option<Rc<str>>,
    pub captured_env: Environment,
    pub param: Node,
    pub body: Node,
    pub binds_self: bool,
}

/// A first-class effect value: `{ effect, payload, captured_env }` (spec §3).
#[derive(Debug, Clone)]
pub struct EffectData {
    pub tag: EffectTag,
    pub payload: Value,
    pub captured_env: Environment,
}

/// Effect tags are opaque symbols for the built-in control-flow effects
/// (spec §4.F) or a user-chosen symbol/string for `handle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EffectTag {
    CreateTask,
    Throw,
    Return,
    Break(Option<Rc<str>>),
    Continue(Option<Rc<str>>),
    Io,
    User(RecordKey),
}

/// Opaque wrapper around a handler function: `(continuation, payload) -> Value`.
#[derive(Clone)]
pub struct Handler(pub Rc<HandlerFn>);

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Record(Rc<RefCell<RecordData>>),
    Symbol(SymbolId),
    Channel(Channel),
    Task(Task),
    Function(Rc<FunctionData>),
    Effect(Rc<EffectData>),
    Handler(Handler),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::String(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn record(fields: RecordData) -> Self {
        Self::Record(Rc::new(RefCell::new(fields)))
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Record(r) => !r.borrow().is_empty(),
            _ => true,
        }
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    #[must_use]
    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    #[must_use]
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }

    #[must_use]
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Symbol(_) => "symbol",
            Self::Channel(_) => "channel",
            Self::Task(_) => "task",
            Self::Function(_) => "function",
            Self::Effect(_) => "effect",
            Self::Handler(_) => "handler",
        }
    }

    /// `===`: deep structural equality. Cyclic data is rejected rather than
    /// looped over (spec §9 "Ambiguities noted, not guessed").
    pub fn structural_eq(&self, other: &Self) -> Result<bool, CycleDetected> {
        let mut seen = Vec::new();
        structural_eq_inner(self, other, &mut seen)
    }

    /// Read a record field by string-or-symbol key, preserving spec §4.A
    /// get/set semantics (missing key -> `None`, not an error).
    #[must_use]
    pub fn record_get(&self, key: &RecordKey) -> Option<Value> {
        match self {
            Self::Record(r) => r.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// List index read, bounds-checked: out-of-bounds yields `Null` (spec §4.A).
    #[must_use]
    pub fn list_get(&self, index: i64) -> Option<Value> {
        match self {
            Self::List(l) => {
                let list = l.borrow();
                usize::try_from(index).ok().and_then(|i| list.get(i).cloned())
            }
            _ => None,
        }
    }
}

/// Marker error for `===` on cyclic data (spec §9).
#[derive(Debug, Clone, Copy)]
pub struct CycleDetected;

impl fmt::Display for CycleDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot compare cyclic data structures with `===`")
    }
}

fn structural_eq_inner(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> Result<bool, CycleDetected> {
    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Number(x), Value::Number(y)) => Ok(x == y),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::Symbol(x), Value::Symbol(y)) => Ok(x == y),
        (Value::List(x), Value::List(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if seen.contains(&key) {
                return Err(CycleDetected);
            }
            seen.push(key);
            let (xb, yb) = (x.borrow(), y.borrow());
            if xb.len() != yb.len() {
                seen.pop();
                return Ok(false);
            }
            for (xi, yi) in xb.iter().zip(yb.iter()) {
                if !structural_eq_inner(xi, yi, seen)? {
                    seen.pop();
                    return Ok(false);
                }
            }
            seen.pop();
            Ok(true)
        }
        (Value::Record(x), Value::Record(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if seen.contains(&key) {
                return Err(CycleDetected);
            }
            seen.push(key);
            let (xb, yb) = (x.borrow(), y.borrow());
            if xb.len() != yb.len() {
                seen.pop();
                return Ok(false);
            }
            for (k, xv) in xb.iter() {
                let Some(yv) = yb.get(k) else {
                    seen.pop();
                    return Ok(false);
                };
                if !structural_eq_inner(xv, yv, seen)? {
                    seen.pop();
                    return Ok(false);
                }
            }
            seen.pop();
            Ok(true)
        }
        (Value::Channel(x), Value::Channel(y)) => Ok(x.is_same(y)),
        (Value::Task(x), Value::Task(y)) => Ok(x.is_same(y)),
        (Value::Function(x), Value::Function(y)) => Ok(Rc::ptr_eq(x, y)),
        _ => Ok(false),
    }
}

impl PartialEq for Value {
    /// `==`: reference equality for heap types, value equality for scalars
    /// (spec §3 Equality). `===` is `structural_eq` above, not this impl.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Record(a), Self::Record(b)) => Rc::ptr_eq(a, b),
            (Self::Channel(a), Self::Channel(b)) => a.is_same(b),
            (Self::Task(a), Self::Task(b)) => a.is_same(b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Effect(a), Self::Effect(b)) => Rc::ptr_eq(a, b),
            (Self::Handler(a), Self::Handler(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Record(r) => {
                write!(f, "{{")?;
                for (i, (k, v)) in r.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Symbol(_) => write!(f, ":<symbol>"),
            Self::Channel(_) => write!(f, "<channel>"),
            Self::Task(_) => write!(f, "<task>"),
            Self::Function(func) => match &func.name {
                Some(name) => write!(f, "<function {name}>"),
                None => write!(f, "<function>"),
            },
            Self::Effect(e) => write!(f, "<effect {:?}>", e.tag),
            Self::Handler(_) => write!(f, "<handler>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_reference_for_lists_structural_for_scalars() {
        let a = Value::Number(1.0);
        let b = Value::Number(1.0);
        assert_eq!(a, b);

        let l1 = Value::list(vec![Value::Number(1.0)]);
        let l2 = Value::list(vec![Value::Number(1.0)]);
        assert_ne!(l1, l2, "lists are reference-equal under ==");
        assert!(l1.structural_eq(&l2).unwrap(), "but structurally equal under ===");
    }

    #[test]
    fn cyclic_structural_eq_is_rejected() {
        let l1 = Value::list(vec![]);
        if let Value::List(inner) = &l1 {
            inner.borrow_mut().push(l1.clone());
        }
        let l2 = l1.clone();
        assert!(l1.structural_eq(&l2).is_err());
    }
}
