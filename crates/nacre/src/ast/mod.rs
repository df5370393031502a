//! The statement/expression tree code generation consumes.
//!
//! The tree is the narrow interface to the external parser: every node can
//! drive emission against the codegen context and report the kind of value
//! it leaves on the evaluation stack. Trees are plain data (cloneable,
//! serializable), so hosts and tests can construct them directly.

pub use expressions::{BinaryOp, Expression, UnaryOp};
pub use statements::{CatchClause, ForInit, Statement, SwitchCase};

use crate::intern::StringId;

/// A function's source shape: name, formals, body.
///
/// Whole programs are carried as an anonymous literal whose body is the
/// top-level statement list.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionLiteral {
    pub name: Option<StringId>,
    pub params: Vec<StringId>,
    pub body: Vec<Statement>,
}

impl FunctionLiteral {
    #[must_use]
    pub fn new(name: Option<StringId>, params: Vec<StringId>, body: Vec<Statement>) -> Self {
        Self { name, params, body }
    }

    /// An anonymous zero-parameter literal wrapping a program body.
    #[must_use]
    pub fn program(body: Vec<Statement>) -> Self {
        Self {
            name: None,
            params: Vec::new(),
            body,
        }
    }
}

mod expressions;
mod statements;
