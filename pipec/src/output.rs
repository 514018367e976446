// Output formatting helpers for CLI commands

use pipeline_compiler::Diagnostic;

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a compile failure. Policy violations get one line each.
pub fn diagnostic(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::Policy(violations) => {
            error(&format!(
                "pipeline rejected by policy ({} violation{})",
                violations.len(),
                if violations.len() == 1 { "" } else { "s" }
            ));
            for violation in violations {
                failure(&format!("[{}] {}", violation.path, violation.message));
                dim(&format!("      rule: {}", violation.rule));
            }
        }
        Diagnostic::Parse(e) => {
            error(&format!("parse error: {}", e.message));
            if e.line > 0 {
                dim(&format!("  at line {}, column {}", e.line, e.column));
            }
            if !e.context.is_empty() {
                dim(&e.context);
            }
            if let Some(suggestion) = &e.suggestion {
                info(&format!("Suggestion: {}", suggestion));
            }
        }
        other => error(&other.to_string()),
    }
}
