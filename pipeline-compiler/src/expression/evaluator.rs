// Expression Engine Evaluator
// Evaluates compile-time expression ASTs against parameters, variables and
// each-loop bindings

use crate::expression::error::{EvalError, EvalErrorKind};
use crate::expression::functions::BuiltinFunctions;
use crate::expression::parser::{Accessor, Expr, ExprParser, Reference};
use crate::expression::segments::{extract_segments, Segment};
use crate::expression::value::Value;

use indexmap::IndexMap;

/// Namespaces that only exist once the pipeline is running. Referencing them
/// inside `${{ }}` is an error rather than an empty value.
const RUNTIME_ONLY_ROOTS: &[&str] = &[
    "dependencies",
    "stagedependencies",
    "steps",
    "env",
    "agent",
    "pipeline",
    "resources",
];

/// Result of the work that ran before the node being compiled.
///
/// Nothing has run at compile time, so the default is `Succeeded` and
/// `succeeded()` is true by construction. Callers that know better (for
/// example when re-compiling a retried stage) can set it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamStatus {
    #[default]
    Succeeded,
    SucceededWithIssues,
    Failed,
    Canceled,
}

/// Context for expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Bound template parameters
    pub parameters: IndexMap<String, Value>,

    /// Compile-time variables
    pub variables: IndexMap<String, Value>,

    /// `each` loop bindings
    pub locals: IndexMap<String, Value>,

    pub status: UpstreamStatus,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameters(mut self, parameters: IndexMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: UpstreamStatus) -> Self {
        self.status = status;
        self
    }

    /// Child scope with `name` bound for one `each` iteration.
    pub fn bind_local(&self, name: &str, value: Value) -> Self {
        let mut scope = self.clone();
        scope.locals.insert(name.to_string(), value);
        scope
    }
}

/// Expression evaluator
pub struct Evaluator<'a> {
    context: &'a ExpressionContext,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExpressionContext) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Reference(reference) => self.eval_reference(reference),
            Expr::Call { name, args } => self.eval_function(name, args),
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        // every operand is evaluated, including for and/or
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        self.functions.call(name, values, self.context)
    }

    fn eval_reference(&self, reference: &Reference) -> Result<Value, EvalError> {
        let root = reference.root.as_str();

        if let Some(value) = lookup(&self.context.locals, root) {
            return self.walk(value.clone(), &reference.path);
        }

        let namespace = match root.to_lowercase().as_str() {
            "parameters" => ("parameter", &self.context.parameters),
            "variables" => ("variable", &self.context.variables),
            lower if RUNTIME_ONLY_ROOTS.contains(&lower) => {
                return Err(EvalError::runtime_only(format!(
                    "'{}' is only available at runtime; use a $[ ] expression or a condition instead",
                    reference
                )));
            }
            _ => {
                return Err(EvalError::undefined(format!(
                    "unknown name '{}'",
                    root
                )));
            }
        };

        let (label, map) = namespace;
        let Some((first, rest)) = reference.path.split_first() else {
            return Ok(Value::Object(map.clone()));
        };

        let key = match first {
            Accessor::Property(name) => name.clone(),
            Accessor::Index(expr) => self.eval(expr)?.as_string(),
        };
        let value = lookup(map, &key).ok_or_else(|| {
            EvalError::undefined(format!("{} '{}' is not defined", label, key))
        })?;

        self.walk(value.clone(), rest)
    }

    /// Follow property and index accessors. Missing members below the first
    /// level evaluate to null.
    fn walk(&self, mut current: Value, path: &[Accessor]) -> Result<Value, EvalError> {
        for accessor in path {
            current = match accessor {
                Accessor::Property(name) => member(&current, name),
                Accessor::Index(expr) => {
                    let index = self.eval(expr)?;
                    self.eval_index(&current, &index)?
                }
            };
        }
        Ok(current)
    }

    fn eval_index(&self, object: &Value, index: &Value) -> Result<Value, EvalError> {
        match object {
            Value::Array(items) => {
                let i = index.as_number().ok_or_else(|| {
                    EvalError::type_error(format!(
                        "sequence index must be a number, got {}",
                        index.kind_name()
                    ))
                })?;
                if i < 0.0 || i.fract() != 0.0 {
                    return Ok(Value::Null);
                }
                Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
            }
            Value::Object(_) => Ok(member(object, &index.as_string())),
            _ => Ok(Value::Null),
        }
    }
}

/// Exact match first, then ordinal ignore-case.
fn lookup<'m>(map: &'m IndexMap<String, Value>, key: &str) -> Option<&'m Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn member(object: &Value, name: &str) -> Value {
    match object {
        Value::Object(map) => lookup(map, name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Evaluate the body of a `${{ }}` expression against a context.
pub fn evaluate(expr: &str, context: &ExpressionContext) -> Result<Value, EvalError> {
    let ast = ExprParser::parse_str(expr.trim())?;
    Evaluator::new(context).eval(&ast)
}

/// Replace every `${{ }}` segment in `text` with its string rendering.
/// `$[ ]` runtime expressions and `$( )` macros are copied through as-is.
///
/// Embedding a sequence or mapping inside surrounding text is a type error;
/// a string that is exactly one `${{ }}` should go through [`evaluate`]
/// instead to keep its structure.
pub fn substitute(text: &str, context: &ExpressionContext) -> Result<String, EvalError> {
    let mut result = String::with_capacity(text.len());
    for segment in extract_segments(text) {
        match segment {
            Segment::Text(raw) | Segment::Runtime(raw) | Segment::Macro(raw) => {
                result.push_str(raw)
            }
            Segment::CompileTime(expr) => {
                let value = evaluate(expr, context)?;
                if !value.is_scalar() {
                    return Err(EvalError::new(
                        EvalErrorKind::Type,
                        format!(
                            "cannot embed a {} in text: ${{{{ {} }}}}",
                            value.kind_name(),
                            expr
                        ),
                    ));
                }
                result.push_str(&value.as_string());
            }
        }
    }
    Ok(result)
}

/// High-level expression engine bound to a context
#[derive(Debug, Clone, Default)]
pub struct ExpressionEngine {
    context: ExpressionContext,
}

impl ExpressionEngine {
    pub fn new(context: ExpressionContext) -> Self {
        Self { context }
    }

    /// Evaluate the body of a `${{ }}` expression.
    pub fn evaluate(&self, expr: &str) -> Result<Value, EvalError> {
        evaluate(expr, &self.context)
    }

    /// Evaluate a directive condition to a boolean.
    pub fn evaluate_condition(&self, expr: &str) -> Result<bool, EvalError> {
        Ok(self.evaluate(expr)?.is_truthy())
    }

    /// Replace every `${{ }}` segment in `text` with its string rendering.
    /// See [`substitute`].
    pub fn substitute(&self, text: &str) -> Result<String, EvalError> {
        substitute(text, &self.context)
    }

    pub fn context(&self) -> &ExpressionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> ExpressionContext {
        let mut stage = IndexMap::new();
        stage.insert("stage".to_string(), Value::from("Deploy"));
        stage.insert("dependsOn".to_string(), Value::from("Build"));

        ExpressionContext::new()
            .with_parameter("environment", "prod")
            .with_parameter("runTests", true)
            .with_parameter("stageList", Value::Array(vec![Value::Object(stage)]))
            .with_variable("configuration", "Release")
    }

    #[test]
    fn test_eval_literals() {
        let engine = ExpressionEngine::default();
        assert_eq!(engine.evaluate("'hello'").unwrap(), Value::from("hello"));
        assert_eq!(engine.evaluate("42").unwrap(), Value::Number(42.0));
        assert_eq!(engine.evaluate("true").unwrap(), Value::Bool(true));
        assert_eq!(engine.evaluate("null").unwrap(), Value::Null);
    }

    #[test]
    fn test_eval_parameter_reference() {
        let engine = ExpressionEngine::new(make_context());
        assert_eq!(
            engine.evaluate("parameters.environment").unwrap(),
            Value::from("prod")
        );
        assert_eq!(
            engine.evaluate("parameters['Environment']").unwrap(),
            Value::from("prod")
        );
        assert_eq!(
            engine.evaluate("parameters.stageList[0].dependsOn").unwrap(),
            Value::from("Build")
        );
    }

    #[test]
    fn test_eval_missing_nested_property_is_null() {
        let engine = ExpressionEngine::new(make_context());
        assert_eq!(
            engine.evaluate("parameters.stageList[0].pool").unwrap(),
            Value::Null
        );
        assert_eq!(
            engine.evaluate("parameters.stageList[5]").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_undefined_reference() {
        let engine = ExpressionEngine::new(make_context());
        let err = engine.evaluate("parameters.missing").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);

        let err = engine.evaluate("eq(variables.nope, '')").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);

        let err = engine.evaluate("stageItem.stage").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);
    }

    #[test]
    fn test_runtime_namespaces_rejected() {
        let engine = ExpressionEngine::new(make_context());
        for expr in [
            "dependencies.Build.result",
            "stageDependencies.Build.Job.outputs['x']",
            "env.PATH",
            "pipeline.workspace",
        ] {
            let err = engine.evaluate(expr).unwrap_err();
            assert_eq!(err.kind, EvalErrorKind::RuntimeOnly, "{}", expr);
        }
    }

    #[test]
    fn test_locals_shadow_and_resolve() {
        let context = make_context();
        let mut entry = IndexMap::new();
        entry.insert("key".to_string(), Value::from("dependsOn"));
        entry.insert("value".to_string(), Value::from("Build"));
        let scope = context.bind_local("entry", Value::Object(entry));

        let engine = ExpressionEngine::new(scope);
        assert!(!engine
            .evaluate_condition("ne(entry.key, 'dependsOn')")
            .unwrap());
        assert_eq!(engine.evaluate("entry.value").unwrap(), Value::from("Build"));
    }

    #[test]
    fn test_eval_strict_and() {
        let engine = ExpressionEngine::new(make_context());
        // the second operand is still evaluated and its error surfaces
        let err = engine
            .evaluate("and(false, eq(parameters.missing, 'x'))")
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);
    }

    #[test]
    fn test_eval_condition() {
        let engine = ExpressionEngine::new(make_context());
        assert!(engine
            .evaluate_condition("and(eq(parameters.environment, 'PROD'), parameters.runTests)")
            .unwrap());
        assert!(!engine
            .evaluate_condition("ne(variables.configuration, 'release')")
            .unwrap());
    }

    #[test]
    fn test_substitute_mixed() {
        let engine = ExpressionEngine::new(make_context());
        let result = engine
            .substitute("deploy-${{ parameters.environment }}-$(Build.BuildId) $[ variables.x ]")
            .unwrap();
        assert_eq!(result, "deploy-prod-$(Build.BuildId) $[ variables.x ]");
    }

    #[test]
    fn test_substitute_rejects_structured_value() {
        let engine = ExpressionEngine::new(make_context());
        let err = engine
            .substitute("stages: ${{ parameters.stageList }}")
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Type);
    }

    #[test]
    fn test_succeeded_reads_status() {
        let engine = ExpressionEngine::default();
        assert!(engine.evaluate_condition("succeeded()").unwrap());

        let engine =
            ExpressionEngine::new(ExpressionContext::new().with_status(UpstreamStatus::Failed));
        assert!(!engine.evaluate_condition("succeeded()").unwrap());
        assert!(engine.evaluate_condition("failed()").unwrap());
        assert!(engine.evaluate_condition("succeededOrFailed()").unwrap());
    }
}
