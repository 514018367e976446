// Compile diagnostics
// Every failure of a compile, surfaced to the caller as one value

use crate::config::ConfigError;
use crate::document::ParseError;
use crate::expression::EvalError;
use crate::policy::PolicyViolation;
use crate::template::TemplateError;

use thiserror::Error;

pub type CompileResult<T> = Result<T, Diagnostic>;

#[derive(Debug, Error)]
pub enum Diagnostic {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("expression error: {0}")]
    Eval(#[from] EvalError),

    #[error("{}", render_violations(.0))]
    Policy(Vec<PolicyViolation>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Diagnostic {
    /// Policy violations, empty for every other kind of failure
    pub fn violations(&self) -> &[PolicyViolation] {
        match self {
            Diagnostic::Policy(violations) => violations,
            _ => &[],
        }
    }
}

impl From<Vec<PolicyViolation>> for Diagnostic {
    fn from(violations: Vec<PolicyViolation>) -> Self {
        Diagnostic::Policy(violations)
    }
}

fn render_violations(violations: &[PolicyViolation]) -> String {
    let mut out = format!(
        "pipeline rejected by policy ({} violation{})",
        violations.len(),
        if violations.len() == 1 { "" } else { "s" }
    );
    for violation in violations {
        out.push_str(&format!(
            "\n  {}: {} [{}]",
            violation.path, violation.message, violation.rule
        ));
    }
    out
}
