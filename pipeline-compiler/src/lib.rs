// Pipeline Compiler Library
// Compile-time template expansion and policy enforcement for YAML pipelines

pub mod compiler;
pub mod config;
pub mod document;
pub mod error;
pub mod expression;
pub mod policy;
pub mod template;

// Re-export commonly used types
pub use compiler::{Compiler, CompilerOptions};
pub use config::{CompilerConfig, ConfigError, CONFIG_FILE_NAME};
pub use error::{CompileResult, Diagnostic};

// Re-export document types
pub use document::{
    parse, parse_file, to_yaml, Directive, Mapping, Node, NodePath, ParseError, ParseErrorKind,
    Scalar,
};

// Re-export expression types
pub use expression::{
    evaluate, EvalError, EvalErrorKind, ExpressionContext, ExpressionEngine, UpstreamStatus, Value,
};

// Re-export policy types
pub use policy::{NodeKind, PolicyEnforcer, PolicyViolation, Rule, RuleSet, RuleSpec};

// Re-export template types
pub use template::{
    Bindings, Expander, FileSystemLoader, MemoryLoader, TemplateError, TemplateErrorKind,
    TemplateLoader,
};

/// Expand `node` with `bindings` as its parameters. Template references are
/// looked up in `loader`.
pub fn expand(
    node: &Node,
    bindings: &Bindings,
    loader: &dyn TemplateLoader,
) -> CompileResult<Node> {
    let context = ExpressionContext::new().with_parameters(bindings.clone());
    Ok(Expander::new(loader).expand(node, &context)?)
}

/// Return `node` unchanged if it satisfies every rule.
pub fn enforce(node: Node, rules: &RuleSet) -> CompileResult<Node> {
    PolicyEnforcer::enforce(&node, rules)?;
    Ok(node)
}

/// Compile `raw` through `mandatory_template`, loading templates from the
/// repository at `repo_root`.
pub fn compile_with_policy(
    raw: &str,
    mandatory_template: &str,
    repo_root: impl Into<std::path::PathBuf>,
    rules: RuleSet,
) -> CompileResult<Node> {
    Compiler::new(FileSystemLoader::new(repo_root))
        .with_rules(rules)
        .compile_with_policy(raw, mandatory_template)
}
