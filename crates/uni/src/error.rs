//! Error taxonomy and propagation (spec §7).
//!
//! Hand-rolled, not `thiserror`/`anyhow` — the teacher's own `resource.rs`
//! and `exception_private.rs` build their error types the same way: a plain
//! enum with a manual `Display` and `std::error::Error` impl. Every error
//! carries an optional span, attached at the nearest call site that doesn't
//! already have one (spec §7 propagation policy).

use std::fmt;

use crate::{span::Span, value::Value};

#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// Undeclared name, or a duplicate declaration in the same frame.
    Name { did_you_mean: Option<String> },
    /// Operator applied to the wrong kind; non-callable application;
    /// indexing something non-indexable.
    Type,
    /// Send on a closed channel, receive on a closed channel.
    Channel,
    /// Unhandled effect, or a one-shot continuation invoked twice.
    Effect,
    /// The task observing this error has been cancelled.
    Cancelled,
    /// Raised via `throw`, not caught by any enclosing `try`.
    User(Value),
    Resource(crate::resource::ResourceError),
    Import,
}

/// A runtime error, carrying the error kind, an attached source span, and a
/// human-readable message.
#[derive(Debug, Clone)]
pub struct UniError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub message: String,
}

impl UniError {
    #[must_use]
    pub fn name(message: impl Into<String>, span: Span, did_you_mean: Option<String>) -> Self {
        Self { kind: ErrorKind::Name { did_you_mean }, span: Some(span), message: message.into() }
    }

    #[must_use]
    pub fn ty(message: impl Into<String>, span: Span) -> Self {
        Self { kind: ErrorKind::Type, span: Some(span), message: message.into() }
    }

    #[must_use]
    pub fn channel(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Channel, span: None, message: message.into() }
    }

    #[must_use]
    pub fn effect(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Effect, span: None, message: message.into() }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self { kind: ErrorKind::Cancelled, span: None, message: "task was cancelled".to_owned() }
    }

    #[must_use]
    pub fn user(value: Value) -> Self {
        Self { kind: ErrorKind::User(value.clone()), span: None, message: format!("{value}") }
    }

    #[must_use]
    pub fn import(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Import, span: None, message: message.into() }
    }

    /// Attaches `span` if this error doesn't already carry one (spec §7
    /// "on construction at a call site that lacks a span, the call site's
    /// span is attached").
    #[must_use]
    pub fn with_span_if_missing(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    /// Converts an unhandled error to the `(:error, v)` shape `try` produces.
    #[must_use]
    pub fn to_value(&self, atom_error: Value) -> Value {
        let payload = match &self.kind {
            ErrorKind::User(v) => v.clone(),
            _ => Value::string(self.message.clone()),
        };
        Value::list(vec![atom_error, payload])
    }
}

impl fmt::Display for UniError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) if !span.is_synthetic() => write!(f, "{} at {span}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for UniError {}

impl From<crate::resource::ResourceError> for UniError {
    fn from(err: crate::resource::ResourceError) -> Self {
        Self { message: err.to_string(), span: None, kind: ErrorKind::Resource(err) }
    }
}
