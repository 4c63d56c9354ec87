//! The handler chain backing `inject`/`mask`/`without`/`injected` (spec §4.F).
//!
//! A persistent singly-linked stack of chain nodes, one per `inject`/`mask`/
//! `without` block currently in scope — cheap to snapshot into a `Context`
//! and restore on the way back out, the same shape the teacher's exception
//! table uses for its `try`/`except` stack, generalized from "one stack of
//! catch frames" to "one stack of binding/visibility frames".
//!
//! A handler binding is just a two-argument closure value (`(continuation,
//! payload) -> result`); we store it as `Value::Handler` rather than
//! `Value::Function` purely so the evaluator can tell "this came from an
//! `inject` binding" apart from an ordinary callable at a glance, without
//! re-deriving that fact from context on every dispatch.
use std::rc::Rc;

use crate::value::{FunctionData, RecordKey, Value};

/// A handler's underlying callable shape is identical to a regular closure;
/// the newtype in `value::Handler` exists for that at-a-glance tagging.
pub type HandlerFn = FunctionData;

#[derive(Debug)]
enum ChainNode {
    Inject { bindings: Vec<(RecordKey, Value)>, parent: HandlerChain },
    Mask { names: Rc<[Rc<str>]>, parent: HandlerChain },
    Without { names: Rc<[Rc<str>]>, parent: HandlerChain },
}

/// A handle into the chain. Cloning is an `Rc` bump; pushing a new frame
/// returns a new handle sharing the old chain as its parent (spec §4.F
/// "handler scopes nest lexically and restore on exit").
#[derive(Debug, Clone, Default)]
pub struct HandlerChain(Option<Rc<ChainNode>>);

impl HandlerChain {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push_inject(&self, bindings: Vec<(RecordKey, Value)>) -> Self {
        Self(Some(Rc::new(ChainNode::Inject { bindings, parent: self.clone() })))
    }

    #[must_use]
    pub fn push_mask(&self, names: Rc<[Rc<str>]>) -> Self {
        Self(Some(Rc::new(ChainNode::Mask { names, parent: self.clone() })))
    }

    #[must_use]
    pub fn push_without(&self, names: Rc<[Rc<str>]>) -> Self {
        Self(Some(Rc::new(ChainNode::Without { names, parent: self.clone() })))
    }

    /// Finds the nearest binding for `tag`, skipping any binding whose name
    /// falls under an enclosing `mask`/`without` (spec §4.F resolution order:
    /// innermost-first, `mask`/`without` both make a name invisible to
    /// lookups performed within their body).
    #[must_use]
    pub fn find(&self, tag: &RecordKey) -> Option<Value> {
        let mut blocked = Vec::new();
        self.find_with(tag, &mut blocked)
    }

    fn find_with(&self, tag: &RecordKey, blocked: &mut Vec<Rc<str>>) -> Option<Value> {
        let node = self.0.as_ref()?;
        match &**node {
            ChainNode::Inject { bindings, parent } => {
                if !is_blocked(tag, blocked)
                    && let Some(v) = bindings.iter().find(|(k, _)| k == tag).map(|(_, v)| v.clone())
                {
                    return Some(v);
                }
                // A `mask`/`without` only hides the nearest enclosing `inject`
                // frame's handlers, not every frame above it — the block is
                // spent once we've passed the frame it was guarding.
                blocked.clear();
                parent.find_with(tag, blocked)
            }
            ChainNode::Mask { names, parent } | ChainNode::Without { names, parent } => {
                let start_len = blocked.len();
                blocked.extend(names.iter().cloned());
                let result = parent.find_with(tag, blocked);
                blocked.truncate(start_len);
                result
            }
        }
    }

    /// Snapshot of every currently-visible binding, innermost wins on name
    /// collision (spec §4.F `injected`). Names hidden by an enclosing
    /// `mask`/`without` are excluded from the snapshot exactly as they are
    /// from `find`.
    #[must_use]
    pub fn visible_bindings(&self) -> Vec<(RecordKey, Value)> {
        let mut blocked = Vec::new();
        let mut seen = Vec::new();
        self.collect(&mut blocked, &mut seen);
        seen
    }

    fn collect(&self, blocked: &mut Vec<Rc<str>>, seen: &mut Vec<(RecordKey, Value)>) {
        let Some(node) = self.0.as_ref() else { return };
        match &**node {
            ChainNode::Inject { bindings, parent } => {
                for (k, v) in bindings {
                    if !is_blocked(k, blocked) && !seen.iter().any(|(sk, _)| sk == k) {
                        seen.push((k.clone(), v.clone()));
                    }
                }
                // Same one-frame-only blocking as `find_with`: the mask is
                // spent once it has shadowed the nearest `inject` frame.
                blocked.clear();
                parent.collect(blocked, seen);
            }
            ChainNode::Mask { names, parent } | ChainNode::Without { names, parent } => {
                let start_len = blocked.len();
                blocked.extend(names.iter().cloned());
                parent.collect(blocked, seen);
                blocked.truncate(start_len);
            }
        }
    }
}

fn is_blocked(tag: &RecordKey, blocked: &[Rc<str>]) -> bool {
    matches!(tag, RecordKey::Str(s) if blocked.iter().any(|b| **b == **s))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn str_key(s: &str) -> RecordKey {
        RecordKey::Str(Rc::from(s))
    }

    #[test]
    fn mask_hides_inner_binding_but_without_reveals_outer() {
        // inject a:1, b:2 { mask "a" { without "b" { ... } } } -> only "b" is
        // resolvable here, bound to the *outer* inject's value (2), since
        // `without` only removes a binding from view, it doesn't introduce a
        // new one and `mask` only blocked "a".
        let chain = HandlerChain::empty()
            .push_inject(vec![(str_key("a"), Value::Number(1.0)), (str_key("b"), Value::Number(2.0))])
            .push_mask(Rc::from([Rc::from("a")]))
            .push_without(Rc::from([Rc::from("b")]));

        assert_eq!(chain.find(&str_key("a")), None, "masked");
        assert_eq!(chain.find(&str_key("b")), None, "hidden by without in this exact scope");
    }

    #[test]
    fn injected_snapshot_excludes_masked_names() {
        let chain = HandlerChain::empty()
            .push_inject(vec![(str_key("a"), Value::Number(1.0)), (str_key("b"), Value::Number(2.0))])
            .push_mask(Rc::from([Rc::from("a")]));

        let visible = chain.visible_bindings();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].0, str_key("b"));
    }

    #[test]
    fn innermost_inject_wins_on_name_collision() {
        let chain = HandlerChain::empty()
            .push_inject(vec![(str_key("a"), Value::Number(1.0))])
            .push_inject(vec![(str_key("a"), Value::Number(2.0))]);

        assert_eq!(chain.find(&str_key("a")), Some(Value::Number(2.0)));
    }

    #[test]
    fn mask_over_two_nested_injects_with_the_same_key_exposes_the_outer_one() {
        // inject { k: h2 } { inject { k: h1 } { mask "k" { ... } } }
        let chain = HandlerChain::empty()
            .push_inject(vec![(str_key("k"), Value::Number(2.0))])
            .push_inject(vec![(str_key("k"), Value::Number(1.0))])
            .push_mask(Rc::from([Rc::from("k")]));

        assert_eq!(chain.find(&str_key("k")), Some(Value::Number(2.0)));
        assert_eq!(chain.visible_bindings(), vec![(str_key("k"), Value::Number(2.0))]);
    }
}
