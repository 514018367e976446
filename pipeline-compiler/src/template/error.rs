// Template expansion errors

use crate::document::{NodePath, ParseError};
use crate::expression::{EvalError, EvalErrorKind};

use std::fmt;

/// Error specific to template expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub message: String,
    /// Template file the error occurred in, if not the root document
    pub template_path: Option<String>,
    /// Node the error is attached to
    pub node_path: Option<NodePath>,
    pub kind: TemplateErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    /// Template file not found
    NotFound,
    /// Circular template inclusion
    CircularReference,
    /// Maximum depth exceeded
    MaxDepthExceeded,
    /// Malformed `template:` reference or template file layout
    InvalidReference,
    /// Invalid parameter declaration, or value outside `values:`
    InvalidParameter,
    /// Argument passed for a parameter the template does not declare
    UnexpectedParameter,
    /// Value does not have the expected type or shape
    TypeMismatch,
    /// Required parameter missing
    MissingParameter,
    /// Parse error in template file
    ParseError,
    /// Malformed expression or bad function call
    ExpressionError,
    /// Expression references an unknown parameter, variable or name
    UndefinedReference,
    /// Expression references something only known at runtime
    RuntimeOnly,
    /// Two fields produce the same key
    DuplicateKey,
    /// Two directive branches both produce the same key
    ConflictingBranches,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template_path {
            Some(path) => write!(f, "template error in '{}'", path)?,
            None => write!(f, "template error")?,
        }
        if let Some(node) = &self.node_path {
            write!(f, " at {}", node)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for TemplateError {}

impl TemplateError {
    pub fn new(message: impl Into<String>, kind: TemplateErrorKind) -> Self {
        Self {
            message: message.into(),
            template_path: None,
            node_path: None,
            kind,
        }
    }

    /// Attach the template path unless an inner template already did.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if self.template_path.is_none() {
            self.template_path = Some(path.into());
        }
        self
    }

    /// Attach the node path unless one is already set.
    pub fn at(mut self, path: &NodePath) -> Self {
        if self.node_path.is_none() {
            self.node_path = Some(path.clone());
        }
        self
    }

    pub fn from_eval(err: EvalError, expr: &str) -> Self {
        let kind = match err.kind {
            EvalErrorKind::UndefinedReference => TemplateErrorKind::UndefinedReference,
            EvalErrorKind::RuntimeOnly => TemplateErrorKind::RuntimeOnly,
            EvalErrorKind::Type => TemplateErrorKind::TypeMismatch,
            EvalErrorKind::Syntax | EvalErrorKind::UnknownFunction | EvalErrorKind::Arity => {
                TemplateErrorKind::ExpressionError
            }
        };
        Self::new(format!("{} (in '{}')", err.message, expr), kind)
    }

    pub fn from_parse(err: &ParseError, template_ref: &str) -> Self {
        let mut message = err.message.clone();
        if err.line > 0 {
            message.push_str(&format!(" (line {}:{})", err.line, err.column));
        }
        if let Some(suggestion) = &err.suggestion {
            message.push_str(&format!("; {}", suggestion));
        }
        Self::new(message, TemplateErrorKind::ParseError).with_path(template_ref)
    }
}
