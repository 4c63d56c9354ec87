//! Lexically nested environments (spec §4.B).
//!
//! A chain of frames, each holding *separate* immutable and mutable maps, so
//! `:=` (declare immutable) vs `mut x := ..` (declare mutable) vs `=`
//! (reassign) are encoded structurally rather than checked at runtime. This
//! plays the role the teacher's `namespace.rs` plays for its bytecode VM
//! (owning all binding storage, handing back opaque handles to callers) but
//! is name-keyed and `Rc`-chained instead of slot-indexed, because the core
//! here walks a tree rather than a flat instruction stream and closures can
//! capture an arbitrary lexical prefix rather than a compile-time-resolved
//! cell set.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::value::{RecordKey, Value};

/// Binding keys are the same string-or-symbol domain as record keys (spec
/// §4.B "keyed by Value — typically string or symbol").
pub type BindingKey = RecordKey;

#[derive(Debug, Default)]
struct Frame {
    immutable: HashMap<BindingKey, Value>,
    mutable: HashMap<BindingKey, Value>,
    parent: Option<Environment>,
}

/// A handle to one frame in the chain. Cloning is cheap (`Rc` bump) and is
/// exactly how closures capture their defining scope (spec §4.G Function).
#[derive(Debug, Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

/// Error returned by `declare_*` when the invariant "a name is never present
/// in both maps of the same frame" would be violated by a duplicate declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyDeclared;

impl Environment {
    #[must_use]
    pub fn root() -> Self {
        Self(Rc::new(RefCell::new(Frame::default())))
    }

    /// Creates a child frame chained to this one (used for blocks, function
    /// bodies, loop bodies — spec §4.B `fork`).
    #[must_use]
    pub fn fork(&self) -> Self {
        Self(Rc::new(RefCell::new(Frame {
            parent: Some(self.clone()),
            ..Frame::default()
        })))
    }

    /// Inner-to-outer lookup: immutable binding in a frame wins over a
    /// mutable one in the same frame (the two maps are disjoint by
    /// invariant, so this is really just "check both, then recurse").
    #[must_use]
    pub fn lookup(&self, key: &BindingKey) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(v) = frame.immutable.get(key) {
            return Some(v.clone());
        }
        if let Some(v) = frame.mutable.get(key) {
            return Some(v.clone());
        }
        frame.parent.as_ref().and_then(|p| p.lookup(key))
    }

    pub fn declare_immutable(&self, key: BindingKey, value: Value) -> Result<(), AlreadyDeclared> {
        let mut frame = self.0.borrow_mut();
        if frame.immutable.contains_key(&key) || frame.mutable.contains_key(&key) {
            return Err(AlreadyDeclared);
        }
        frame.immutable.insert(key, value);
        Ok(())
    }

    pub fn declare_mutable(&self, key: BindingKey, value: Value) -> Result<(), AlreadyDeclared> {
        let mut frame = self.0.borrow_mut();
        if frame.immutable.contains_key(&key) || frame.mutable.contains_key(&key) {
            return Err(AlreadyDeclared);
        }
        frame.mutable.insert(key, value);
        Ok(())
    }

    /// Walks outward to the nearest frame with a mutable binding of `key`
    /// and updates it in place. Fails (returns `false`) if the nearest
    /// binding found is immutable, or the name is unknown anywhere in the
    /// chain (spec §4.B `assign`). `Null` deletes the binding (spec §4.G).
    pub fn assign(&self, key: &BindingKey, value: Value) -> bool {
        let mut frame = self.0.borrow_mut();
        if frame.mutable.contains_key(key) {
            if matches!(value, Value::Null) {
                frame.mutable.remove(key);
            } else {
                frame.mutable.insert(key.clone(), value);
            }
            return true;
        }
        if frame.immutable.contains_key(key) {
            return false;
        }
        match &frame.parent {
            Some(parent) => {
                let parent = parent.clone();
                drop(frame);
                parent.assign(key, value)
            }
            None => false,
        }
    }

    /// Shallow snapshot of this single frame's bindings, used when a handler
    /// must later `replace` a captured prefix (spec §4.B).
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        let frame = self.0.borrow();
        Self(Rc::new(RefCell::new(Frame {
            immutable: frame.immutable.clone(),
            mutable: frame.mutable.clone(),
            parent: frame.parent.clone(),
        })))
    }

    /// Replaces this frame's bindings with `other`'s, stopping the walk up
    /// the parent chain once `upto` is reached (inclusive) — used to restore
    /// a previously snapshotted environment prefix (spec §4.B).
    pub fn replace(&self, other: &Self, upto: &Self) {
        {
            let mut frame = self.0.borrow_mut();
            let other_frame = other.0.borrow();
            frame.immutable = other_frame.immutable.clone();
            frame.mutable = other_frame.mutable.clone();
        }
        if !Rc::ptr_eq(&self.0, &upto.0)
            && let (Some(next_self), Some(next_other)) = (self.parent(), other.parent())
        {
            next_self.replace(&next_other, upto);
        }
    }

    fn parent(&self) -> Option<Self> {
        self.0.borrow().parent.clone()
    }

    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Every name visible from this frame outward, innermost first. Used
    /// only for "did you mean" suggestions on an undeclared-name error
    /// (spec §A.1) — not a hot path, so a fresh `Vec` per call is fine.
    #[must_use]
    pub fn visible_names(&self) -> Vec<BindingKey> {
        let mut names = Vec::new();
        let mut frame = Some(self.clone());
        while let Some(env) = frame {
            let f = env.0.borrow();
            names.extend(f.immutable.keys().cloned());
            names.extend(f.mutable.keys().cloned());
            frame = f.parent.clone();
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> BindingKey {
        BindingKey::Str(Rc::from(s))
    }

    #[test]
    fn lookup_walks_inner_to_outer() {
        let outer = Environment::root();
        outer.declare_immutable(key("x"), Value::Number(1.0)).unwrap();
        let inner = outer.fork();
        inner.declare_immutable(key("x"), Value::Number(2.0)).unwrap();
        assert_eq!(inner.lookup(&key("x")), Some(Value::Number(2.0)));
        assert_eq!(outer.lookup(&key("x")), Some(Value::Number(1.0)));
    }

    #[test]
    fn assign_fails_on_immutable_binding() {
        let env = Environment::root();
        env.declare_immutable(key("x"), Value::Number(1.0)).unwrap();
        assert!(!env.assign(&key("x"), Value::Number(2.0)));
        assert_eq!(env.lookup(&key("x")), Some(Value::Number(1.0)));
    }

    #[test]
    fn assign_walks_outward_to_declaring_frame() {
        let outer = Environment::root();
        outer.declare_mutable(key("x"), Value::Number(1.0)).unwrap();
        let inner = outer.fork();
        assert!(inner.assign(&key("x"), Value::Number(5.0)));
        assert_eq!(outer.lookup(&key("x")), Some(Value::Number(5.0)));
    }

    #[test]
    fn duplicate_declare_in_same_frame_fails() {
        let env = Environment::root();
        env.declare_immutable(key("x"), Value::Number(1.0)).unwrap();
        assert_eq!(env.declare_mutable(key("x"), Value::Number(2.0)), Err(AlreadyDeclared));
    }

    #[test]
    fn null_assign_deletes_mutable_binding() {
        let env = Environment::root();
        env.declare_mutable(key("x"), Value::Number(1.0)).unwrap();
        assert!(env.assign(&key("x"), Value::Null));
        assert_eq!(env.lookup(&key("x")), None);
    }
}
