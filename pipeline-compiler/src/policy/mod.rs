// Policy module
// Structural rules checked against the expanded pipeline

pub mod enforcer;
pub mod rules;

pub use enforcer::{PolicyEnforcer, PolicyViolation};
pub use rules::{ErrorMarker, NodeKind, NodeVisit, Rule, RuleError, RuleSet, RuleSpec};
