// Expression errors

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Malformed expression text
    Syntax,
    /// Reference to a parameter, variable or name that does not exist
    UndefinedReference,
    /// Reference to a value that only exists once the pipeline runs
    RuntimeOnly,
    /// Call to a function that is not a known built-in
    UnknownFunction,
    /// Wrong number of arguments
    Arity,
    /// Operand of the wrong type
    Type,
}

/// Error raised while lexing, parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    /// Byte offset into the expression text, for syntax errors
    pub position: Option<usize>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
        }
    }

    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self {
            kind: EvalErrorKind::Syntax,
            message: message.into(),
            position: Some(position),
        }
    }

    pub fn undefined(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::UndefinedReference, message)
    }

    pub fn runtime_only(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::RuntimeOnly, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Type, message)
    }
}
