//! The narrow interface to the external lexer/parser.
//!
//! Parsing is a collaborator, not part of this crate: a [`SourceParser`]
//! turns source text into the [`ast`](crate::ast) tree the generator
//! consumes. Parse failures travel through compilation unchanged.

use std::fmt;

use crate::ast::FunctionLiteral;

/// A half-open byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
}

impl SourceSpan {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// A syntax error reported by the external parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "syntax error at {}..{}: {}", span.start, span.end, self.message),
            None => write!(f, "syntax error: {}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// The external parser: source text in, program body out.
///
/// The generator only ever calls this once per compilation; everything else
/// it needs from the front end is carried by the AST itself.
pub trait SourceParser {
    /// Parses a whole program into a function literal whose body is the
    /// program's top-level statement list.
    fn parse_program(&self, source: &str) -> Result<FunctionLiteral, ParseError>;
}
