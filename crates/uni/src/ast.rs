//! The validated AST the evaluator consumes (spec §3).
//!
//! Production of this tree — lexing, parsing, static validation — is an
//! external collaborator (spec §1). We only specify its shape here: a tagged
//! node with optional literal/identifier data and an ordered list of children.
//! Nothing in this module resolves names, tracks types, or renders
//! diagnostics; it is pure data.

use std::{fmt, rc::Rc};

use crate::span::Span;

/// A single AST node as produced by the parser.
///
/// `children` holds sub-nodes in source order; which slots are meaningful
/// depends on `kind` (documented per-variant below). Using one flat node type
/// instead of per-kind structs mirrors how the validated tree arrives from the
/// parser collaborator: already shaped, just tagged.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
    pub children: Rc<[Node]>,
}

impl Node {
    #[must_use]
    pub fn new(span: Span, kind: NodeKind, children: Vec<Node>) -> Self {
        Self { span, kind, children: children.into() }
    }

    #[must_use]
    pub fn leaf(span: Span, kind: NodeKind) -> Self {
        Self { span, kind, children: Rc::from([]) }
    }

    #[must_use]
    pub fn child(&self, index: usize) -> &Node {
        &self.children[index]
    }
}

/// Literal payload carried by leaf nodes. Kept out of `NodeKind` so matching
/// on node shape doesn't also have to match on literal type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Number(f64),
    String(Rc<str>),
    Name(Rc<str>),
    Atom(Rc<str>),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    // --- literals ---
    Number(f64),
    String(Rc<str>),
    /// Variable reference by name.
    Name(Rc<str>),
    /// `:name` — interned symbol reference.
    Atom(Rc<str>),
    /// `_` — matches/evaluates to `Null` wherever it appears.
    Placeholder,
    /// `...` used as an implicit placeholder in an expression position; an
    /// error to evaluate directly (spec §4.G).
    ImplicitPlaceholder,

    // --- sequencing ---
    /// `a, b, c` — evaluate in order, value is the last.
    Sequence,
    /// `{ ... }` — forks a child environment; children as `Sequence`.
    Block,

    // --- control flow ---
    /// children: [condition, then_branch]
    If,
    /// children: [condition, then_branch, else_branch]
    IfElse,
    /// children: [condition, body]
    While,
    /// children: [pattern, iterable, body]
    For,
    /// children: [body] — `loop { ... }`, runs until `break`.
    Loop,
    /// A block with a `label:` prefix; children: [body]. `data` carries the
    /// label name via `LabeledBlock`'s companion field below.
    LabeledBlock(Rc<str>),
    /// children: [value] (optional, may be empty for bare `return`)
    Return,
    /// `data` carries an optional label; children: [value] (optional)
    Break(Option<Rc<str>>),
    /// `data` carries an optional label; children: [value] (optional)
    Continue(Option<Rc<str>>),

    // --- declaration / assignment ---
    /// children: [pattern, expr]
    Declare,
    /// children: [pattern, expr]
    Assign,
    /// `+=` and friends. `data` carries the operator. children: [name, expr]
    IncAssign(BinOp),
    /// `++`/`--`, pre or post. children: [target]
    Increment { prefix: bool },
    Decrement { prefix: bool },

    // --- data ---
    /// `(a, b, c)` — children are element expressions, which may include
    /// `Spread` and `Label` nodes (spec §4.G Tuple node semantics).
    Tuple,
    /// `key: value` inside a `Tuple`/`Record` literal. children: [key, value]
    Label,
    /// `target[index]` read or write target. children: [target, index]
    Index,
    /// `[a, b, c]` literal list sugar, distinct from a tuple coerced to a record.
    SquareBrackets,
    /// `...expr` inside a tuple/record/pattern. children: [expr]
    Spread,

    // --- functions ---
    /// children: [pattern, body]; `data` marks whether the function binds
    /// `self` (outermost of a curried chain, see spec §4.G).
    Function { binds_self: bool },
    /// children: [callee, args_tuple]
    Application,

    // --- channels ---
    /// `ch <- v`. children: [channel, value]
    Send,
    /// `<-ch`. children: [channel]
    Receive,
    /// `ch <-! v`. children: [channel, value]
    SendStatus,
    /// `<-? ch`. children: [channel]
    ReceiveStatus,

    // --- concurrency ---
    /// children: [body]
    Fork,
    /// `a | b | c`. children: the sub-expressions forked in order.
    Parallel,
    /// children: [task_expr]
    Await,

    // --- effects ---
    /// children: [handler_record, body]
    Inject,
    /// `data` carries the masked names. children: [body]
    Mask(Rc<[Rc<str>]>),
    /// `data` carries the hidden names. children: [body]
    Without(Rc<[Rc<str>]>),
    /// Evaluates to the record of currently-visible handlers (the `injected`
    /// identifier is lexed straight into this node, not a `Name`).
    Injected,
    /// `handle tag payload` from the prelude is an `Application`; `Handle`
    /// models the handler-invocation node produced when a handler body runs
    /// (continuation, payload) — see evaluator.rs.
    Handle,

    // --- patterns (also walked by the pattern engine, §4.C) ---
    /// `value is pattern`. children: [value, pattern]
    Is,
    /// `match value { case ... }`. children: [discriminant, case*]
    Match,
    /// children: [pattern, body]
    MatchCase,
    /// `^expr` — pin. children: [expr]
    Pin,
    /// `p1 & p2` bind-both. children: [p1, p2]
    Bind,
    /// `like p` / weakened strictness. children: [pattern]
    Like,
    /// `strict p`. children: [pattern]
    Strict,
    /// `mut p`. children: [pattern]
    Mutable,
    /// `export p`. children: [pattern]
    Export,
    /// `p = default_expr`. children: [pattern, default_expr]
    PatternDefault,

    // --- imports ---
    /// `data` carries the raw import specifier string; children: [pattern]
    /// (the binding pattern for `as { ... }`), may be empty for a bare import.
    Import(Rc<str>),

    // --- operators ---
    BinOp(BinOp),
    UnaryOp(UnaryOp),

    /// A diagnostic the parser/validator already raised; evaluating it
    /// re-raises the carried error (spec §4.G "Error node").
    Error(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    StructEq,
    StructNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl NodeKind {
    /// A stable, human-readable tag for tracing and diagnostics — not tied to
    /// `Debug`'s output so renaming a variant's payload doesn't change it.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Name(_) => "name",
            Self::Atom(_) => "atom",
            Self::Placeholder => "placeholder",
            Self::ImplicitPlaceholder => "implicit-placeholder",
            Self::Sequence => "sequence",
            Self::Block => "block",
            Self::If => "if",
            Self::IfElse => "if-else",
            Self::While => "while",
            Self::For => "for",
            Self::Loop => "loop",
            Self::LabeledBlock(_) => "labeled-block",
            Self::Return => "return",
            Self::Break(_) => "break",
            Self::Continue(_) => "continue",
            Self::Declare => "declare",
            Self::Assign => "assign",
            Self::IncAssign(_) => "inc-assign",
            Self::Increment { .. } => "increment",
            Self::Decrement { .. } => "decrement",
            Self::Tuple => "tuple",
            Self::Label => "label",
            Self::Index => "index",
            Self::SquareBrackets => "square-brackets",
            Self::Spread => "spread",
            Self::Function { .. } => "function",
            Self::Application => "application",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::SendStatus => "send-status",
            Self::ReceiveStatus => "receive-status",
            Self::Fork => "fork",
            Self::Parallel => "parallel",
            Self::Await => "await",
            Self::Inject => "inject",
            Self::Mask(_) => "mask",
            Self::Without(_) => "without",
            Self::Injected => "injected",
            Self::Handle => "handle",
            Self::Is => "is",
            Self::Match => "match",
            Self::MatchCase => "match-case",
            Self::Pin => "pin",
            Self::Bind => "bind",
            Self::Like => "like",
            Self::Strict => "strict",
            Self::Mutable => "mutable",
            Self::Export => "export",
            Self::PatternDefault => "pattern-default",
            Self::Import(_) => "import",
            Self::BinOp(_) => "bin-op",
            Self::UnaryOp(_) => "unary-op",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
