// Template Parameters
// Declarations, type checks and binding of arguments to declared parameters

use crate::document::{Node, Scalar};
use crate::expression::{values_equal, Value};
use crate::template::error::{TemplateError, TemplateErrorKind};

use indexmap::IndexMap;

use std::fmt;
use std::str::FromStr;

/// First keys that identify a step mapping
pub const STEP_SELECTORS: &[&str] = &[
    "task",
    "script",
    "bash",
    "pwsh",
    "powershell",
    "checkout",
    "download",
    "downloadBuild",
    "getPackage",
    "publish",
    "template",
    "reviewApp",
];

/// Parameter values in declaration order
pub type Bindings = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Step,
    StepList,
    Job,
    JobList,
    Deployment,
    DeploymentList,
    Stage,
    StageList,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Step => "step",
            ParameterType::StepList => "stepList",
            ParameterType::Job => "job",
            ParameterType::JobList => "jobList",
            ParameterType::Deployment => "deployment",
            ParameterType::DeploymentList => "deploymentList",
            ParameterType::Stage => "stage",
            ParameterType::StageList => "stageList",
        }
    }

    /// Check a value against the type, returning it normalised (`'true'`
    /// becomes a boolean for `boolean`, `'3'` a number for `number`).
    pub fn check(&self, value: &Value) -> Option<Value> {
        match self {
            ParameterType::String => value.is_scalar().then(|| value.clone()),
            ParameterType::Number => value.as_number().map(Value::Number),
            ParameterType::Boolean => match value {
                Value::Bool(_) => Some(value.clone()),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
                _ => None,
            },
            ParameterType::Object => Some(value.clone()),
            ParameterType::Step => is_step(value).then(|| value.clone()),
            ParameterType::Job => is_job(value).then(|| value.clone()),
            ParameterType::Deployment => is_deployment(value).then(|| value.clone()),
            ParameterType::Stage => is_stage(value).then(|| value.clone()),
            ParameterType::StepList => is_list_of(value, is_step).then(|| value.clone()),
            ParameterType::JobList => is_list_of(value, is_job).then(|| value.clone()),
            ParameterType::DeploymentList => {
                is_list_of(value, is_deployment).then(|| value.clone())
            }
            ParameterType::StageList => is_list_of(value, is_stage).then(|| value.clone()),
        }
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ParameterType::String,
            ParameterType::Number,
            ParameterType::Boolean,
            ParameterType::Object,
            ParameterType::Step,
            ParameterType::StepList,
            ParameterType::Job,
            ParameterType::JobList,
            ParameterType::Deployment,
            ParameterType::DeploymentList,
            ParameterType::Stage,
            ParameterType::StageList,
        ];
        all.into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = all.iter().map(ParameterType::as_str).collect();
                format!("unknown parameter type '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_key(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.keys().next().map(String::as_str),
        _ => None,
    }
}

fn has_key(value: &Value, key: &str) -> bool {
    matches!(value, Value::Object(map) if map.contains_key(key))
}

fn is_step(value: &Value) -> bool {
    first_key(value).is_some_and(|k| STEP_SELECTORS.contains(&k))
}

fn is_job(value: &Value) -> bool {
    has_key(value, "job") || has_key(value, "template")
}

fn is_deployment(value: &Value) -> bool {
    has_key(value, "deployment")
}

fn is_stage(value: &Value) -> bool {
    has_key(value, "stage") || has_key(value, "template")
}

fn is_list_of(value: &Value, item: fn(&Value) -> bool) -> bool {
    matches!(value, Value::Array(items) if items.iter().all(item))
}

/// A declared template parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub display_name: Option<String>,
    pub param_type: ParameterType,
    pub default: Option<Value>,
    /// Allowed values
    pub values: Option<Vec<Value>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            param_type,
            default: None,
            values: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    fn from_node(node: &Node) -> Result<Self, TemplateError> {
        let map = node.as_mapping().ok_or_else(|| {
            invalid(format!(
                "parameter declaration must be a mapping, found {}",
                node.kind_name()
            ))
        })?;

        let name = map
            .get("name")
            .and_then(Node::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("parameter declaration is missing 'name'"))?;

        let param_type = match map.get("type") {
            None => ParameterType::String,
            Some(node) => node
                .as_str()
                .ok_or_else(|| invalid(format!("parameter '{}' has a non-string type", name)))?
                .parse()
                .map_err(|e: String| invalid(format!("parameter '{}': {}", name, e)))?,
        };

        let values = match map.get("values") {
            None => None,
            Some(Node::Sequence(items)) => Some(items.iter().map(Node::to_value).collect()),
            Some(other) => {
                return Err(invalid(format!(
                    "'values' of parameter '{}' must be a sequence, found {}",
                    name,
                    other.kind_name()
                )))
            }
        };

        for (key, _) in map.fields() {
            if !matches!(key, "name" | "displayName" | "type" | "default" | "values") {
                return Err(invalid(format!(
                    "unknown field '{}' in declaration of parameter '{}'",
                    key, name
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            display_name: map
                .get("displayName")
                .and_then(Node::as_str)
                .map(str::to_string),
            param_type,
            default: map.get("default").map(Node::to_value),
            values,
        })
    }
}

fn invalid(message: impl Into<String>) -> TemplateError {
    TemplateError::new(message, TemplateErrorKind::InvalidParameter)
}

/// Parse a `parameters:` section.
///
/// Accepts the list form (`- name: x`, `type:`, `default:`, `values:`) and the
/// legacy mapping form (`x: default`), where every parameter is an untyped
/// `object` with the given default.
pub fn parse_declarations(node: &Node) -> Result<Vec<Parameter>, TemplateError> {
    let declared = match node {
        Node::Scalar(Scalar::Null) => Vec::new(),
        Node::Sequence(items) => items
            .iter()
            .map(Parameter::from_node)
            .collect::<Result<Vec<_>, _>>()?,
        Node::Mapping(map) => map
            .fields()
            .map(|(name, default)| {
                Parameter::new(name, ParameterType::Object).with_default(default.to_value())
            })
            .collect(),
        other => {
            return Err(invalid(format!(
                "parameters must be a list or mapping, found {}",
                other.kind_name()
            )))
        }
    };

    for (i, param) in declared.iter().enumerate() {
        if declared[..i].iter().any(|p| p.name == param.name) {
            return Err(invalid(format!(
                "parameter '{}' is declared more than once",
                param.name
            )));
        }
    }

    Ok(declared)
}

/// Bind provided arguments to declared parameters.
///
/// Every argument and every default used is type checked. Arguments for
/// undeclared parameters are rejected.
pub fn bind(
    declared: &[Parameter],
    provided: &IndexMap<String, Value>,
    template_ref: &str,
) -> Result<Bindings, TemplateError> {
    if let Some(name) = provided
        .keys()
        .find(|name| !declared.iter().any(|p| &p.name == *name))
    {
        let known: Vec<&str> = declared.iter().map(|p| p.name.as_str()).collect();
        return Err(TemplateError::new(
            format!(
                "unexpected parameter '{}'; declared parameters are: {}",
                name,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            ),
            TemplateErrorKind::UnexpectedParameter,
        )
        .with_path(template_ref));
    }

    let mut bindings = Bindings::new();
    for param in declared {
        let (value, source) = match (provided.get(&param.name), &param.default) {
            (Some(value), _) => (value, "value"),
            (None, Some(default)) => (default, "default"),
            (None, None) => {
                return Err(TemplateError::new(
                    format!(
                        "required parameter '{}' not provided for template '{}'",
                        param.name, template_ref
                    ),
                    TemplateErrorKind::MissingParameter,
                )
                .with_path(template_ref));
            }
        };

        let value = param.param_type.check(value).ok_or_else(|| {
            TemplateError::new(
                format!(
                    "parameter '{}' expected type {} but the {} is {} {}",
                    param.name,
                    param.param_type,
                    source,
                    article(value.kind_name()),
                    value.kind_name()
                ),
                TemplateErrorKind::TypeMismatch,
            )
            .with_path(template_ref)
        })?;

        if let Some(allowed) = &param.values {
            if !allowed.iter().any(|v| values_equal(v, &value)) {
                let allowed: Vec<String> = allowed.iter().map(Value::as_string).collect();
                return Err(TemplateError::new(
                    format!(
                        "parameter '{}' {} '{}' is not one of the allowed values: {}",
                        param.name,
                        source,
                        value.as_string(),
                        allowed.join(", ")
                    ),
                    TemplateErrorKind::InvalidParameter,
                )
                .with_path(template_ref));
            }
        }

        bindings.insert(param.name.clone(), value);
    }

    Ok(bindings)
}

fn article(kind: &str) -> &'static str {
    if kind.starts_with(['a', 'e', 'i', 'o', 'u']) {
        "an"
    } else {
        "a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse;

    fn declarations(yaml: &str) -> Vec<Parameter> {
        parse_declarations(&parse(yaml).unwrap()).unwrap()
    }

    fn args(yaml: &str) -> IndexMap<String, Value> {
        match parse(yaml).unwrap().to_value() {
            Value::Object(map) => map,
            _ => IndexMap::new(),
        }
    }

    fn object(yaml: &str) -> Value {
        parse(yaml).unwrap().to_value()
    }

    #[test]
    fn test_parse_list_form() {
        let params = declarations(
            r#"
- name: environment
  type: string
  default: dev
  values: [dev, prod]
- name: stageList
  type: stageList
"#,
        );
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].default, Some(Value::from("dev")));
        assert_eq!(params[0].values.as_ref().map(Vec::len), Some(2));
        assert_eq!(params[1].param_type, ParameterType::StageList);
    }

    #[test]
    fn test_parse_legacy_mapping_form() {
        let params = declarations("buildConfig: Debug\nsteps: []\n");
        assert_eq!(params[0].name, "buildConfig");
        assert_eq!(params[0].default, Some(Value::from("Debug")));
        assert_eq!(params[1].default, Some(Value::Array(vec![])));
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = parse_declarations(&parse("- name: x\n  type: thing\n").unwrap()).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::InvalidParameter);
        assert!(err.message.contains("stepList"));
    }

    #[test]
    fn test_bind_uses_defaults_in_declaration_order() {
        let params =
            declarations("- name: b\n  default: 2\n  type: number\n- name: a\n  type: string\n");
        let bound = bind(&params, &args("a: hello"), "t.yml").unwrap();
        let keys: Vec<&String> = bound.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(bound["b"], Value::Number(2.0));
    }

    #[test]
    fn test_bind_missing_parameter() {
        let params = declarations("- name: env\n  type: string\n");
        let err = bind(&params, &IndexMap::new(), "t.yml").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::MissingParameter);
    }

    #[test]
    fn test_bind_unexpected_parameter() {
        let params = declarations("- name: env\n  default: dev\n");
        let err = bind(&params, &args("enviroment: prod"), "t.yml").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UnexpectedParameter);
        assert!(err.message.contains("env"));
    }

    #[test]
    fn test_bind_values_restriction() {
        let params = declarations("- name: env\n  default: dev\n  values: [dev, prod]\n");
        assert!(bind(&params, &args("env: PROD"), "t.yml").is_ok());
        let err = bind(&params, &args("env: qa"), "t.yml").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::InvalidParameter);
    }

    #[test]
    fn test_bind_step_list_shape() {
        let params = declarations("- name: steps\n  type: stepList\n  default: []\n");
        assert!(bind(
            &params,
            &args("steps:\n  - script: echo A\n  - bash: echo B\n"),
            "t.yml"
        )
        .is_ok());

        let err = bind(&params, &args("steps:\n  - displayName: x\n    script: y\n"), "t.yml")
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::TypeMismatch);

        let err = bind(&params, &args("steps: echo"), "t.yml").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::TypeMismatch);
    }

    #[test]
    fn test_bind_job_and_stage_shapes() {
        assert!(ParameterType::Job.check(&object("job: Build")).is_some());
        assert!(ParameterType::Job.check(&object("template: j.yml")).is_some());
        assert!(ParameterType::Deployment.check(&object("job: Build")).is_none());
        assert!(ParameterType::Stage.check(&object("stage: Deploy")).is_some());
        assert!(ParameterType::Stage.check(&Value::from("Deploy")).is_none());
    }

    #[test]
    fn test_bind_default_is_type_checked() {
        let params = declarations("- name: count\n  type: number\n  default: many\n");
        let err = bind(&params, &IndexMap::new(), "t.yml").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::TypeMismatch);
        assert!(err.message.contains("default"));
    }

    #[test]
    fn test_bind_normalises_booleans_and_numbers() {
        let params = declarations(
            "- name: flag\n  type: boolean\n- name: n\n  type: number\n",
        );
        let bound = bind(&params, &args("flag: 'True'\nn: '4'"), "t.yml").unwrap();
        assert_eq!(bound["flag"], Value::Bool(true));
        assert_eq!(bound["n"], Value::Number(4.0));
    }
}
