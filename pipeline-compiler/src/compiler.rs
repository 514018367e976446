// Pipeline Compiler
// Parse, resolve extends, expand and enforce policy in one pass

use crate::config::{CompilerConfig, ConfigError};
use crate::document::{parse, Entry, Mapping, Node, NodePath, ParseError, ParseErrorKind};
use crate::error::{CompileResult, Diagnostic};
use crate::expression::{ExpressionContext, Value};
use crate::policy::{PolicyEnforcer, PolicyViolation, RuleSet};
use crate::template::{
    bind, parse_declarations, Expander, TemplateError, TemplateErrorKind, TemplateLoader,
    MAX_TEMPLATE_DEPTH,
};

use indexmap::IndexMap;
use tracing::{debug, info};

/// Consumer keys that replace the extended template's
const OVERRIDE_KEYS: &[&str] = &[
    "name",
    "appendCommitMessageToRunName",
    "trigger",
    "pr",
    "schedules",
    "resources",
    "pool",
    "lockBehavior",
];

/// Consumer sections handed to a required template as parameters
const CONSUMER_SECTIONS: &[&str] = &["stages", "jobs", "steps"];

/// Name used for the root pipeline in parameter errors
const PIPELINE_REF: &str = "<pipeline>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub max_depth: usize,

    /// Template every pipeline must extend. Pipelines without `extends`
    /// are wrapped in it.
    pub required_template: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_TEMPLATE_DEPTH,
            required_template: None,
        }
    }
}

/// Pipeline compiler
///
/// Holds no per-compile state, so one compiler can be shared between
/// threads compiling unrelated pipelines.
pub struct Compiler {
    loader: Box<dyn TemplateLoader>,
    rules: RuleSet,
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(loader: impl TemplateLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            rules: RuleSet::new(),
            options: CompilerOptions::default(),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.loader())
            .with_rules(config.rule_set()?)
            .with_options(CompilerOptions {
                max_depth: config.max_depth,
                required_template: config.required_template.clone(),
            }))
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_required_template(mut self, template: impl Into<String>) -> Self {
        self.options.required_template = Some(template.into());
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a pipeline, going through the required template if one is
    /// configured.
    pub fn compile(&self, raw: &str) -> CompileResult<Node> {
        self.compile_with_parameters(raw, &IndexMap::new())
    }

    /// Compile with values for the pipeline's own `parameters`.
    pub fn compile_with_parameters(
        &self,
        raw: &str,
        parameters: &IndexMap<String, Value>,
    ) -> CompileResult<Node> {
        self.run(raw, parameters, self.options.required_template.as_deref())
    }

    /// Compile a pipeline that must go through `mandatory_template`.
    ///
    /// A pipeline extending that template passes its `extends.parameters`;
    /// one without `extends` has its `stages`, `jobs` and `steps` passed as
    /// parameters of the same name. Extending any other template is a policy
    /// violation.
    pub fn compile_with_policy(&self, raw: &str, mandatory_template: &str) -> CompileResult<Node> {
        self.run(raw, &IndexMap::new(), Some(mandatory_template))
    }

    fn run(
        &self,
        raw: &str,
        parameters: &IndexMap<String, Value>,
        required: Option<&str>,
    ) -> CompileResult<Node> {
        info!(required_template = ?required, rules = self.rules.len(), "compiling pipeline");

        let mut consumer = pipeline_mapping(parse(raw)?)?;

        let context = root_context(&mut consumer, parameters)?;
        let expander = Expander::new(self.loader.as_ref()).with_max_depth(self.options.max_depth);

        // root directives may produce `extends` or a consumer section
        if has_root_directives(&consumer) {
            debug!("expanding root directives of consumer pipeline");
            consumer = pipeline_mapping(expander.expand(&Node::Mapping(consumer), &context)?)?;
        }

        let expanded = match (consumer.remove("extends"), required) {
            (Some(extends), required) => {
                self.resolve_extends(&expander, consumer, &extends, &context, required)?
            }
            (None, Some(required)) => self.wrap(&expander, consumer, &context, required)?,
            (None, None) => expander.expand(&Node::Mapping(consumer), &context)?,
        };

        PolicyEnforcer::enforce(&expanded, &self.rules)?;
        info!("pipeline compiled");
        Ok(expanded)
    }

    fn resolve_extends(
        &self,
        expander: &Expander<'_>,
        consumer: Mapping,
        extends: &Node,
        context: &ExpressionContext,
        required: Option<&str>,
    ) -> CompileResult<Node> {
        let path = NodePath::root().key("extends");
        let invalid = |message: String| {
            TemplateError::new(message, TemplateErrorKind::InvalidReference).at(&path)
        };

        if let Some(section) = CONSUMER_SECTIONS.iter().find(|s| consumer.contains_key(s)) {
            return Err(invalid(format!(
                "'{}' cannot be used together with 'extends'; \
                 pass it to the template as a parameter",
                section
            ))
            .into());
        }

        let consumer_context =
            expander.document_context(&Node::Mapping(consumer.clone()), context)?;
        let extends = expander.expand_at(extends, &consumer_context, &path)?;
        let extends = extends.as_mapping().ok_or_else(|| {
            invalid(format!(
                "'extends' must be a mapping, found {}",
                extends.kind_name()
            ))
        })?;

        if let Some((key, _)) = extends
            .fields()
            .find(|(k, _)| *k != "template" && *k != "parameters")
        {
            return Err(invalid(format!("unexpected key '{}' in 'extends'", key)).into());
        }

        let template = extends
            .get("template")
            .and_then(Node::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("'extends' requires a non-empty 'template'".to_string()))?;

        if let Some(required) = required {
            if !self.same_template(template, required)? {
                return Err(Diagnostic::Policy(vec![PolicyViolation::new(
                    "requiredTemplate",
                    format!("pipeline must extend '{}', found '{}'", required, template),
                    path.key("template"),
                )]));
            }
        }

        let arguments = match extends.get("parameters").map(Node::to_value) {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(invalid(format!(
                    "'extends.parameters' must be a mapping, found {}",
                    other.kind_name()
                ))
                .into())
            }
        };

        self.extend(expander, consumer, template, &arguments, &consumer_context)
    }

    /// Hand the consumer's sections to the required template.
    fn wrap(
        &self,
        expander: &Expander<'_>,
        mut consumer: Mapping,
        context: &ExpressionContext,
        required: &str,
    ) -> CompileResult<Node> {
        let consumer_context =
            expander.document_context(&Node::Mapping(consumer.clone()), context)?;

        let mut arguments = IndexMap::new();
        for section in CONSUMER_SECTIONS {
            if let Some(node) = consumer.remove(section) {
                let path = NodePath::root().key(*section);
                let expanded = expander.expand_at(&node, &consumer_context, &path)?;
                arguments.insert(section.to_string(), expanded.to_value());
            }
        }

        debug!(
            template = required,
            sections = ?arguments.keys().collect::<Vec<_>>(),
            "wrapping pipeline in required template"
        );
        self.extend(expander, consumer, required, &arguments, &consumer_context)
    }

    /// Expand `template` with `arguments` and lay the consumer's remaining
    /// keys over the result.
    fn extend(
        &self,
        expander: &Expander<'_>,
        consumer: Mapping,
        template: &str,
        arguments: &IndexMap<String, Value>,
        consumer_context: &ExpressionContext,
    ) -> CompileResult<Node> {
        let template_context = ExpressionContext {
            parameters: IndexMap::new(),
            ..consumer_context.clone()
        };
        let mut merged = match expander.expand_template(template, arguments, &template_context)? {
            Node::Mapping(m) => m,
            other => return Ok(other),
        };

        for (key, value) in consumer.fields() {
            let path = NodePath::root().key(key);
            if key == "variables" {
                let expanded = expander.expand_at(value, consumer_context, &path)?;
                merge_variables(&mut merged, expanded);
            } else if OVERRIDE_KEYS.contains(&key) {
                let expanded = expander.expand_at(value, consumer_context, &path)?;
                merged.insert(key, expanded);
            } else {
                return Err(TemplateError::new(
                    format!("'{}' is not allowed in a pipeline that extends a template", key),
                    TemplateErrorKind::InvalidReference,
                )
                .at(&path)
                .into());
            }
        }

        debug!(template, "merged pipeline into template");
        Ok(Node::Mapping(merged))
    }

    fn same_template(&self, reference: &str, required: &str) -> Result<bool, TemplateError> {
        let actual = self.loader.load(reference, None)?;
        let expected = self.loader.load(required, None)?;
        Ok(actual.id == expected.id)
    }
}

fn pipeline_mapping(node: Node) -> CompileResult<Mapping> {
    match node {
        Node::Mapping(m) => Ok(m),
        other => Err(ParseError::new(
            format!("pipeline must be a mapping, found {}", other.kind_name()),
            0,
            0,
        )
        .with_kind(ParseErrorKind::InvalidSchema)
        .into()),
    }
}

fn has_root_directives(mapping: &Mapping) -> bool {
    mapping
        .entries()
        .iter()
        .any(|entry| matches!(entry, Entry::Directive(_)))
}

/// Bind the pipeline's own `parameters` declarations and drop them from the
/// document.
fn root_context(
    consumer: &mut Mapping,
    parameters: &IndexMap<String, Value>,
) -> Result<ExpressionContext, TemplateError> {
    let declared = match consumer.remove("parameters") {
        Some(node) => parse_declarations(&node)?,
        None => Vec::new(),
    };
    let bindings = bind(&declared, parameters, PIPELINE_REF)?;
    Ok(ExpressionContext::new().with_parameters(bindings))
}

/// Variables in `- name/value` list form. Other items (groups) pass through.
fn variable_list(node: Node) -> Vec<Node> {
    match node {
        Node::Mapping(m) => m
            .fields()
            .map(|(name, value)| {
                let mut item = Mapping::new();
                item.insert("name", Node::string(name));
                item.insert("value", value.clone());
                Node::Mapping(item)
            })
            .collect(),
        Node::Sequence(items) => items,
        _ => Vec::new(),
    }
}

fn variable_name(item: &Node) -> Option<&str> {
    item.as_mapping()?.get("name")?.as_str()
}

/// Consumer variables are appended; a consumer variable replaces the
/// template's variable of the same name.
fn merge_variables(template: &mut Mapping, consumer: Node) {
    let consumer = variable_list(consumer);
    let mut merged = template
        .remove("variables")
        .map(variable_list)
        .unwrap_or_default();

    merged.retain(|existing| match variable_name(existing) {
        Some(name) => !consumer.iter().any(|c| variable_name(c) == Some(name)),
        None => true,
    });
    merged.extend(consumer);
    template.insert("variables", Node::Sequence(merged));
}
