//! Source positions as consumed from the parser/lexer collaborator (spec §6).
//!
//! The core never computes spans; it only carries the ones the parser attached
//! to AST nodes and attaches the call site's span to errors raised without one.

use std::fmt;

/// Opaque byte-offset span into a single source file.
///
/// `file_id` indexes into the host's file map; this crate never resolves it to
/// a path or renders source context, that is the diagnostic sink's job (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub fn new(file_id: u32, start: u32, end: u32) -> Self {
        Self { file_id, start, end }
    }

    /// A span with no useful position, used for values synthesized by the
    /// evaluator itself (e.g. prelude-injected bindings).
    #[must_use]
    pub fn synthetic() -> Self {
        Self { file_id: u32::MAX, start: 0, end: 0 }
    }

    #[must_use]
    pub fn is_synthetic(self) -> bool {
        self.file_id == u32::MAX
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
