// Template Expander
// Resolves ${{ if }}, ${{ each }}, ${{ expression }} and template references
// over the document tree, producing a directive-free tree

use crate::document::{
    parse, Directive, DirectiveBlock, Entry, Mapping, Node, NodePath, Scalar,
};
use crate::expression::segments::{extract_segments, has_compile_time, Segment};
use crate::expression::{evaluate, substitute, ExpressionContext, Value};
use crate::template::error::{TemplateError, TemplateErrorKind};
use crate::template::loader::TemplateLoader;
use crate::template::parameters::{bind, parse_declarations};

use indexmap::IndexMap;
use tracing::debug;

use std::collections::HashMap;

/// Maximum template inclusion depth to prevent infinite recursion
pub const MAX_TEMPLATE_DEPTH: usize = 50;

/// Sequence keys whose items may be `- template: ...` references
const TEMPLATE_SECTIONS: &[&str] = &["stages", "jobs", "steps", "variables"];

/// Evaluation scope: expression context plus the chain of templates being
/// expanded, outermost first.
#[derive(Debug, Clone)]
struct Scope {
    context: ExpressionContext,
    includes: Vec<String>,
}

impl Scope {
    fn bind(&self, var: &str, value: Value) -> Scope {
        Scope {
            context: self.context.bind_local(var, value),
            includes: self.includes.clone(),
        }
    }

    fn current_template(&self) -> Option<&str> {
        self.includes.last().map(String::as_str)
    }

    fn evaluate(&self, expr: &str, path: &NodePath) -> Result<Value, TemplateError> {
        evaluate(expr, &self.context)
            .map_err(|e| self.error(TemplateError::from_eval(e, expr), path))
    }

    fn substitute(&self, text: &str, path: &NodePath) -> Result<String, TemplateError> {
        substitute(text, &self.context)
            .map_err(|e| self.error(TemplateError::from_eval(e, text), path))
    }

    /// Tag an error with the current template and node.
    fn error(&self, err: TemplateError, path: &NodePath) -> TemplateError {
        let err = err.at(path);
        match self.current_template() {
            Some(id) => err.with_path(id),
            None => err,
        }
    }
}

/// Where a mapping key came from, for duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Field,
    Directive,
}

/// Builds an expanded mapping, rejecting keys produced twice.
#[derive(Default)]
struct MappingBuilder {
    mapping: Mapping,
    origins: HashMap<String, Origin>,
}

impl MappingBuilder {
    fn insert(
        &mut self,
        key: String,
        value: Node,
        origin: Origin,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<(), TemplateError> {
        if let Some(previous) = self.origins.get(&key) {
            let err = if *previous == Origin::Directive || origin == Origin::Directive {
                TemplateError::new(
                    format!(
                        "key '{}' is produced by more than one branch; conditions on ${{{{ if }}}} blocks that set the same key must not overlap",
                        key
                    ),
                    TemplateErrorKind::ConflictingBranches,
                )
            } else {
                TemplateError::new(
                    format!("duplicate key '{}'", key),
                    TemplateErrorKind::DuplicateKey,
                )
            };
            return Err(scope.error(err, &path.key(&key)));
        }
        self.origins.insert(key.clone(), origin);
        self.mapping.push(Entry::Field(key, value));
        Ok(())
    }

    fn finish(self) -> Mapping {
        self.mapping
    }
}

/// Template expander
///
/// Expansion is a pure function of the input tree, the expression context and
/// the templates the loader returns. Each call keeps its own include stack, so
/// one expander can serve many documents.
pub struct Expander<'a> {
    loader: &'a dyn TemplateLoader,
    max_depth: usize,
}

impl<'a> Expander<'a> {
    pub fn new(loader: &'a dyn TemplateLoader) -> Self {
        Self {
            loader,
            max_depth: MAX_TEMPLATE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand a whole document. Root `variables` are evaluated first and made
    /// available as `variables.*` to the rest of the document.
    pub fn expand(&self, node: &Node, context: &ExpressionContext) -> Result<Node, TemplateError> {
        let scope = self.with_document_variables(
            node,
            Scope {
                context: context.clone(),
                includes: Vec::new(),
            },
        )?;
        self.expand_node(node, &scope, &NodePath::root())
    }

    /// Expand a fragment in the given context. `path` is where the fragment
    /// sits in its document; it decides whether sequence items may be
    /// template references (`stages`, `jobs`, `steps`, `variables`).
    pub fn expand_at(
        &self,
        node: &Node,
        context: &ExpressionContext,
        path: &NodePath,
    ) -> Result<Node, TemplateError> {
        let scope = Scope {
            context: context.clone(),
            includes: Vec::new(),
        };
        self.expand_node(node, &scope, path)
    }

    /// Load a template, bind `arguments` against its declarations and expand
    /// its whole body. The `parameters` section is dropped from the result.
    pub fn expand_template(
        &self,
        reference: &str,
        arguments: &IndexMap<String, Value>,
        context: &ExpressionContext,
    ) -> Result<Node, TemplateError> {
        let caller = Scope {
            context: context.clone(),
            includes: Vec::new(),
        };
        let (body, scope) = self.enter_template(reference, arguments, &caller, &NodePath::root())?;
        let body = Node::Mapping(body);
        let scope = self.with_document_variables(&body, scope)?;
        self.expand_node(&body, &scope, &NodePath::root())
    }

    /// Context with the document's root `variables` added.
    pub fn document_context(
        &self,
        node: &Node,
        context: &ExpressionContext,
    ) -> Result<ExpressionContext, TemplateError> {
        let scope = Scope {
            context: context.clone(),
            includes: Vec::new(),
        };
        Ok(self.with_document_variables(node, scope)?.context)
    }

    fn with_document_variables(
        &self,
        node: &Node,
        mut scope: Scope,
    ) -> Result<Scope, TemplateError> {
        let Some(variables) = node.as_mapping().and_then(|m| m.get("variables")) else {
            return Ok(scope);
        };

        let expanded = self.expand_node(variables, &scope, &NodePath::root().key("variables"))?;
        collect_variables(&expanded, &mut scope.context.variables);
        Ok(scope)
    }

    // =========================================================================
    // Node Expansion
    // =========================================================================

    fn expand_node(
        &self,
        node: &Node,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Node, TemplateError> {
        match node {
            Node::Scalar(Scalar::String(s)) => self.expand_string(s, scope, path),
            Node::Scalar(_) => Ok(node.clone()),
            Node::Sequence(items) => Ok(Node::Sequence(self.expand_sequence(items, scope, path)?)),
            Node::Mapping(m) => Ok(Node::Mapping(self.expand_mapping(m, scope, path)?)),
            Node::Directive(_) => Ok(Node::Sequence(self.expand_sequence(
                std::slice::from_ref(node),
                scope,
                path,
            )?)),
        }
    }

    /// A string that is exactly one `${{ }}` keeps the type of its value;
    /// anything else is text substitution.
    fn expand_string(
        &self,
        s: &str,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Node, TemplateError> {
        if !has_compile_time(s) {
            return Ok(Node::string(s));
        }

        if let [Segment::CompileTime(expr)] = extract_segments(s).as_slice() {
            return Ok(Node::from(scope.evaluate(expr, path)?));
        }

        scope.substitute(s, path).map(Node::string)
    }

    fn expand_key(
        &self,
        key: &str,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<String, TemplateError> {
        if !has_compile_time(key) {
            return Ok(key.to_string());
        }

        let expanded = scope.substitute(key, path)?;
        if expanded.is_empty() {
            return Err(scope.error(
                TemplateError::new(
                    format!("key '{}' evaluated to an empty string", key),
                    TemplateErrorKind::TypeMismatch,
                ),
                path,
            ));
        }
        Ok(expanded)
    }

    fn expand_mapping(
        &self,
        mapping: &Mapping,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Mapping, TemplateError> {
        let mut builder = MappingBuilder::default();
        for entry in mapping.entries() {
            match entry {
                Entry::Field(key, value) => {
                    let key = self.expand_key(key, scope, path)?;
                    let value = self.expand_node(value, scope, &path.key(&key))?;
                    builder.insert(key, value, Origin::Field, scope, path)?;
                }
                Entry::Directive(block) => {
                    self.expand_mapping_directive(block, scope, path, &mut builder)?
                }
            }
        }
        Ok(builder.finish())
    }

    /// A directive inside a mapping merges the entries of its body into the
    /// enclosing mapping.
    fn expand_mapping_directive(
        &self,
        block: &DirectiveBlock,
        scope: &Scope,
        path: &NodePath,
        builder: &mut MappingBuilder,
    ) -> Result<(), TemplateError> {
        for child in self.directive_scopes(&block.directive, scope, path)? {
            let expanded = match &block.body {
                Node::Mapping(body) => self.expand_mapping(body, &child, path)?,
                Node::Scalar(_) => match self.expand_node(&block.body, &child, path)? {
                    Node::Mapping(m) => m,
                    Node::Scalar(Scalar::Null) => continue,
                    other => return Err(body_mismatch(&block.directive, &other, &child, path)),
                },
                other => return Err(body_mismatch(&block.directive, other, &child, path)),
            };

            for entry in expanded.into_entries() {
                if let Entry::Field(key, value) = entry {
                    builder.insert(key, value, Origin::Directive, &child, path)?;
                }
            }
        }
        Ok(())
    }

    /// One scope per emission of the directive body: none for a false `if`,
    /// one per element for `each`.
    fn directive_scopes(
        &self,
        directive: &Directive,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Vec<Scope>, TemplateError> {
        match directive {
            Directive::If(condition) => {
                let truthy = scope.evaluate(condition, path)?.is_truthy();
                debug!(condition = %condition, result = truthy, at = %path, "if directive");
                Ok(if truthy { vec![scope.clone()] } else { Vec::new() })
            }
            Directive::Each { var, collection } => {
                let bindings: Vec<Value> = match scope.evaluate(collection, path)? {
                    Value::Array(items) => items,
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(key, value)| {
                            let mut pair = IndexMap::new();
                            pair.insert("key".to_string(), Value::String(key));
                            pair.insert("value".to_string(), value);
                            Value::Object(pair)
                        })
                        .collect(),
                    other => {
                        return Err(scope.error(
                            TemplateError::new(
                                format!(
                                    "cannot iterate over {}: '{}' evaluated to {}, expected a sequence or mapping",
                                    var,
                                    collection,
                                    other.kind_name()
                                ),
                                TemplateErrorKind::TypeMismatch,
                            ),
                            path,
                        ))
                    }
                };
                debug!(var = %var, count = bindings.len(), at = %path, "each directive");
                Ok(bindings
                    .into_iter()
                    .map(|value| scope.bind(var, value))
                    .collect())
            }
        }
    }

    fn expand_sequence(
        &self,
        items: &[Node],
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Vec<Node>, TemplateError> {
        let section = path.parent_key().filter(|key| TEMPLATE_SECTIONS.contains(key));
        let mut out = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            let item_path = path.index(i);
            match item {
                Node::Directive(block) => {
                    self.expand_sequence_directive(block, scope, &item_path, section, &mut out)?
                }
                Node::Scalar(Scalar::String(s)) => match self.expand_string(s, scope, &item_path)? {
                    // a whole-item expression yielding a sequence is spliced
                    Node::Sequence(inserted) => {
                        for node in inserted {
                            self.push_item(node, scope, &item_path, section, &mut out)?;
                        }
                    }
                    node => self.push_item(node, scope, &item_path, section, &mut out)?,
                },
                Node::Mapping(m) => {
                    let expanded = self.expand_mapping(m, scope, &item_path)?;
                    // an item made only of false conditions disappears
                    if expanded.is_empty() && m.is_directive_only() {
                        continue;
                    }
                    self.push_item(Node::Mapping(expanded), scope, &item_path, section, &mut out)?;
                }
                other => {
                    let expanded = self.expand_node(other, scope, &item_path)?;
                    out.push(expanded);
                }
            }
        }

        Ok(out)
    }

    /// A directive item with a mapping body builds one item from the merged
    /// entries; with any other body the emitted items are spliced.
    fn expand_sequence_directive(
        &self,
        block: &DirectiveBlock,
        scope: &Scope,
        path: &NodePath,
        section: Option<&str>,
        out: &mut Vec<Node>,
    ) -> Result<(), TemplateError> {
        if let Node::Mapping(_) = block.body {
            let mut builder = MappingBuilder::default();
            self.expand_mapping_directive(block, scope, path, &mut builder)?;
            let mapping = builder.finish();
            if !mapping.is_empty() {
                self.push_item(Node::Mapping(mapping), scope, path, section, out)?;
            }
            return Ok(());
        }

        for child in self.directive_scopes(&block.directive, scope, path)? {
            let items = match &block.body {
                Node::Sequence(items) => self.expand_sequence(items, &child, path)?,
                Node::Scalar(Scalar::Null) => continue,
                body => self.expand_sequence(std::slice::from_ref(body), &child, path)?,
            };
            out.extend(items);
        }
        Ok(())
    }

    /// Append an already expanded item, replacing template references in
    /// template sections with the template's items.
    fn push_item(
        &self,
        node: Node,
        scope: &Scope,
        path: &NodePath,
        section: Option<&str>,
        out: &mut Vec<Node>,
    ) -> Result<(), TemplateError> {
        match (section, &node) {
            (Some(section), Node::Mapping(m)) if m.contains_key("template") => {
                let items = self.include(m, section, scope, path)?;
                out.extend(items);
            }
            _ => out.push(node),
        }
        Ok(())
    }

    // =========================================================================
    // Template References
    // =========================================================================

    /// Expand a `- template: path` item whose fields were already expanded in
    /// the caller's scope.
    fn include(
        &self,
        reference: &Mapping,
        section: &str,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<Vec<Node>, TemplateError> {
        let invalid = |message: String| {
            scope.error(
                TemplateError::new(message, TemplateErrorKind::InvalidReference),
                path,
            )
        };

        if let Some((key, _)) = reference
            .fields()
            .find(|(k, _)| *k != "template" && *k != "parameters")
        {
            return Err(invalid(format!(
                "unexpected key '{}' next to 'template'; pass values through 'parameters'",
                key
            )));
        }

        let template_ref = reference
            .get("template")
            .and_then(Node::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("'template' must be a non-empty path".to_string()))?;

        let arguments = match reference.get("parameters").map(Node::to_value) {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(invalid(format!(
                    "'parameters' of template '{}' must be a mapping, found {}",
                    template_ref,
                    other.kind_name()
                )))
            }
        };

        let (body, template_scope) = self.enter_template(template_ref, &arguments, scope, path)?;
        let template_id = template_scope.current_template().unwrap_or(template_ref).to_string();
        let expanded = self.expand_mapping(&body, &template_scope, &NodePath::root())?;

        let items = match expanded.get(section) {
            Some(Node::Sequence(items)) => items.clone(),
            Some(Node::Mapping(vars)) if section == "variables" => vars
                .fields()
                .map(|(name, value)| {
                    let mut item = Mapping::new();
                    item.insert("name", Node::string(name));
                    item.insert("value", value.clone());
                    Node::Mapping(item)
                })
                .collect(),
            Some(Node::Scalar(Scalar::Null)) => Vec::new(),
            Some(other) => {
                return Err(TemplateError::new(
                    format!(
                        "'{}' section must be a sequence, found {}",
                        section,
                        other.kind_name()
                    ),
                    TemplateErrorKind::InvalidReference,
                )
                .with_path(template_id))
            }
            None => {
                return Err(TemplateError::new(
                    format!(
                        "template is used in '{}' but has no '{}' section",
                        section, section
                    ),
                    TemplateErrorKind::InvalidReference,
                )
                .with_path(template_id))
            }
        };

        debug!(template = template_ref, section, items = items.len(), "expanded template");
        Ok(items)
    }

    /// Load a template, check the include stack and bind arguments.
    /// Returns the template body without `parameters` and the fresh scope to
    /// expand it in.
    fn enter_template(
        &self,
        template_ref: &str,
        arguments: &IndexMap<String, Value>,
        caller: &Scope,
        path: &NodePath,
    ) -> Result<(Mapping, Scope), TemplateError> {
        let loaded = self
            .loader
            .load(template_ref, caller.current_template())
            .map_err(|e| caller.error(e, path))?;

        if caller.includes.contains(&loaded.id) {
            let mut cycle = caller.includes.clone();
            cycle.push(loaded.id.clone());
            return Err(caller.error(
                TemplateError::new(
                    format!(
                        "circular template reference detected:\n  {}",
                        cycle.join("\n  -> ")
                    ),
                    TemplateErrorKind::CircularReference,
                ),
                path,
            ));
        }

        if caller.includes.len() >= self.max_depth {
            return Err(caller.error(
                TemplateError::new(
                    format!(
                        "maximum template inclusion depth ({}) exceeded. Include stack:\n  {}",
                        self.max_depth,
                        caller.includes.join("\n  -> ")
                    ),
                    TemplateErrorKind::MaxDepthExceeded,
                ),
                path,
            ));
        }

        let root = parse(&loaded.source).map_err(|e| TemplateError::from_parse(&e, &loaded.id))?;
        let mut body = match root {
            Node::Mapping(m) => m,
            other => {
                return Err(TemplateError::new(
                    format!("template must be a mapping, found {}", other.kind_name()),
                    TemplateErrorKind::InvalidReference,
                )
                .with_path(loaded.id))
            }
        };

        let declared = match body.remove("parameters") {
            Some(node) => parse_declarations(&node).map_err(|e| e.with_path(&loaded.id))?,
            None => Vec::new(),
        };
        let bindings = bind(&declared, arguments, template_ref)
            .map_err(|e| caller.error(e, path))?;

        debug!(
            template = template_ref,
            depth = caller.includes.len() + 1,
            parameters = bindings.len(),
            "entering template"
        );

        let mut includes = caller.includes.clone();
        includes.push(loaded.id);
        let scope = Scope {
            context: ExpressionContext {
                parameters: bindings,
                variables: caller.context.variables.clone(),
                locals: IndexMap::new(),
                status: caller.context.status,
            },
            includes,
        };

        Ok((body, scope))
    }
}

fn body_mismatch(
    directive: &Directive,
    body: &Node,
    scope: &Scope,
    path: &NodePath,
) -> TemplateError {
    scope.error(
        TemplateError::new(
            format!(
                "{} inside a mapping must contain key/value pairs, found a {}",
                directive,
                body.kind_name()
            ),
            TemplateErrorKind::TypeMismatch,
        ),
        path,
    )
}

/// Read expanded `variables` (mapping form or `- name:/value:` list form).
/// Variable groups are skipped; their contents are only known at runtime.
fn collect_variables(node: &Node, into: &mut IndexMap<String, Value>) {
    match node {
        Node::Mapping(m) => {
            for (name, value) in m.fields() {
                into.insert(name.to_string(), value.to_value());
            }
        }
        Node::Sequence(items) => {
            for item in items.iter().filter_map(Node::as_mapping) {
                if let Some(name) = item.get("name").and_then(Node::as_str) {
                    let value = item.get("value").map(Node::to_value).unwrap_or(Value::Null);
                    into.insert(name.to_string(), value);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::to_yaml;
    use crate::template::loader::MemoryLoader;

    fn doc(yaml: &str) -> Node {
        parse(yaml).unwrap()
    }

    fn value(yaml: &str) -> Value {
        doc(yaml).to_value()
    }

    fn expand(yaml: &str, context: &ExpressionContext) -> Result<Node, TemplateError> {
        let loader = MemoryLoader::new();
        Expander::new(&loader).expand(&doc(yaml), context)
    }

    fn steps(node: &Node) -> &[Node] {
        node.as_mapping()
            .and_then(|m| m.get("steps"))
            .and_then(Node::as_sequence)
            .unwrap()
    }

    #[test]
    fn test_directive_free_tree_is_unchanged() {
        let input = doc(r#"
trigger:
  - main
stages:
  - stage: Build
    jobs:
      - job: Compile
        steps:
          - script: cargo build
            displayName: Build
            condition: and(succeeded(), eq(variables['Build.Reason'], 'PullRequest'))
"#);
        let output = expand(&to_yaml(&input).unwrap(), &ExpressionContext::new()).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_false_if_omits_subtree() {
        let output = expand(
            r#"
steps:
  - script: always
  - ${{ if eq(parameters.enabled, true) }}:
    - script: sometimes
      displayName: Optional
"#,
            &ExpressionContext::new().with_parameter("enabled", false),
        )
        .unwrap();

        let yaml = to_yaml(&output).unwrap();
        assert_eq!(steps(&output).len(), 1);
        assert!(!yaml.contains("sometimes"));
        assert!(!yaml.contains("Optional"));
    }

    #[test]
    fn test_empty_directive_body_emits_nothing() {
        let ctx = ExpressionContext::new().with_parameter("names", value("[a, b]"));
        let output = expand(
            "steps:\n  - ${{ if true }}:\n  - ${{ each name in parameters.names }}:\n  - bash: x\n",
            &ctx,
        )
        .unwrap();
        assert_eq!(output, doc("steps:\n  - bash: x\n"));
    }

    #[test]
    fn test_each_expands_once_per_element_in_order() {
        let ctx = ExpressionContext::new().with_parameter("names", value("[alpha, beta, gamma]"));
        let output = expand(
            r#"
steps:
  - ${{ each name in parameters.names }}:
    - script: echo ${{ name }}
"#,
            &ctx,
        )
        .unwrap();

        let scripts: Vec<&str> = steps(&output)
            .iter()
            .map(|s| s.as_mapping().unwrap().get("script").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(scripts, vec!["echo alpha", "echo beta", "echo gamma"]);
    }

    #[test]
    fn test_each_over_empty_sequence() {
        let ctx = ExpressionContext::new().with_parameter("names", Value::Array(Vec::new()));
        let output = expand(
            "steps:\n  - ${{ each name in parameters.names }}:\n    - script: ${{ name }}\n",
            &ctx,
        )
        .unwrap();
        assert!(steps(&output).is_empty());
    }

    #[test]
    fn test_each_over_mapping_binds_key_and_value() {
        let ctx =
            ExpressionContext::new().with_parameter("tags", value("{team: infra, tier: gold}"));
        let output = expand(
            r#"
job: Build
variables:
  ${{ each tag in parameters.tags }}:
    tag_${{ tag.key }}: ${{ tag.value }}
"#,
            &ctx,
        )
        .unwrap();

        let vars = output.as_mapping().unwrap().get("variables").unwrap().as_mapping().unwrap();
        let keys: Vec<&str> = vars.fields().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tag_team", "tag_tier"]);
        assert_eq!(vars.get("tag_tier").unwrap().as_str(), Some("gold"));
    }

    #[test]
    fn test_each_over_scalar_is_type_mismatch() {
        let ctx = ExpressionContext::new().with_parameter("names", "single");
        let err = expand(
            "steps:\n  - ${{ each name in parameters.names }}:\n    - script: ${{ name }}\n",
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::TypeMismatch);
        assert_eq!(err.node_path.unwrap().to_string(), "steps[0]");
    }

    #[test]
    fn test_complementary_ifs_keep_exactly_one_branch() {
        let yaml = r#"
job: Deploy
${{ if eq(parameters.environment, 'prod') }}:
  pool: production
${{ if not(eq(parameters.environment, 'prod')) }}:
  pool: shared
"#;
        for (environment, expected) in [("prod", "production"), ("dev", "shared")] {
            let ctx = ExpressionContext::new().with_parameter("environment", environment);
            let output = expand(yaml, &ctx).unwrap();
            let job = output.as_mapping().unwrap();
            assert_eq!(job.len(), 2);
            assert_eq!(job.get("pool").unwrap().as_str(), Some(expected));
        }
    }

    #[test]
    fn test_overlapping_ifs_are_conflicting_branches() {
        let err = expand(
            r#"
job: Deploy
${{ if eq(parameters.environment, 'prod') }}:
  pool: production
${{ if startsWith(parameters.environment, 'pr') }}:
  pool: shared
"#,
            &ExpressionContext::new().with_parameter("environment", "prod"),
        )
        .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::ConflictingBranches);
        assert!(err.message.contains("pool"));
    }

    #[test]
    fn test_substituted_key_collision_is_duplicate_key() {
        let err = expand(
            "${{ parameters.name }}: 1\nbuild: 2\n",
            &ExpressionContext::new().with_parameter("name", "build"),
        )
        .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::DuplicateKey);
    }

    #[test]
    fn test_depends_on_filter() {
        let ctx = ExpressionContext::new().with_parameter(
            "stageList",
            value("[{stage: Build}, {stage: Deploy, dependsOn: Build}]"),
        );
        let output = expand(
            r#"
stages:
  - ${{ each stageItem in parameters.stageList }}:
    - ${{ each pair in stageItem }}:
        ${{ if ne(pair.key, 'dependsOn') }}:
          ${{ pair.key }}: ${{ pair.value }}
"#,
            &ctx,
        )
        .unwrap();

        let expected = doc("stages:\n  - stage: Build\n  - stage: Deploy\n");
        assert_eq!(output, expected);
    }

    #[test]
    fn test_whole_expression_keeps_type() {
        let ctx = ExpressionContext::new()
            .with_parameter("retries", 3i64)
            .with_parameter("flags", value("{fast: true}"));
        let output = expand(
            "retryCount: ${{ parameters.retries }}\nflags: ${{ parameters.flags }}\n",
            &ctx,
        )
        .unwrap();
        let m = output.as_mapping().unwrap();
        assert_eq!(m.get("retryCount"), Some(&Node::Scalar(Scalar::Number(3.0))));
        assert!(m.get("flags").unwrap().as_mapping().is_some());
    }

    #[test]
    fn test_sequence_expression_is_spliced() {
        let ctx =
            ExpressionContext::new().with_parameter("extra", value("[{script: a}, {script: b}]"));
        let output =
            expand("steps:\n  - checkout: self\n  - ${{ parameters.extra }}\n", &ctx).unwrap();
        assert_eq!(steps(&output).len(), 3);
    }

    #[test]
    fn test_mapping_in_text_is_type_mismatch() {
        let ctx = ExpressionContext::new().with_parameter("flags", value("{fast: true}"));
        let err = expand("script: echo ${{ parameters.flags }}\n", &ctx).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::TypeMismatch);
    }

    #[test]
    fn test_runtime_syntax_is_preserved() {
        let ctx = ExpressionContext::new().with_parameter("name", "web");
        let output = expand(
            r#"
steps:
  - script: deploy ${{ parameters.name }} $(Build.BuildId)
    condition: $[ eq(variables['Build.Reason'], 'Manual') ]
"#,
            &ctx,
        )
        .unwrap();
        let step = steps(&output)[0].as_mapping().unwrap();
        assert_eq!(step.get("script").unwrap().as_str(), Some("deploy web $(Build.BuildId)"));
        assert_eq!(
            step.get("condition").unwrap().as_str(),
            Some("$[ eq(variables['Build.Reason'], 'Manual') ]")
        );
    }

    #[test]
    fn test_undefined_parameter() {
        let err =
            expand("script: ${{ parameters.missing }}\n", &ExpressionContext::new()).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UndefinedReference);
    }

    #[test]
    fn test_runtime_only_reference() {
        let err = expand(
            "${{ if eq(dependencies.Build.result, 'Succeeded') }}:\n  pool: x\n",
            &ExpressionContext::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::RuntimeOnly);
    }

    #[test]
    fn test_root_variables_feed_expressions() {
        let output = expand(
            r#"
variables:
  - name: configuration
    value: Release
steps:
  - script: cargo build --${{ lower(variables.configuration) }}
"#,
            &ExpressionContext::new(),
        )
        .unwrap();
        let step = steps(&output)[0].as_mapping().unwrap();
        assert_eq!(step.get("script").unwrap().as_str(), Some("cargo build --release"));
    }

    #[test]
    fn test_template_reference_is_expanded() {
        let loader = MemoryLoader::new().with_template(
            "templates/build.yml",
            r#"
parameters:
  - name: configuration
    type: string
    default: Debug
    values: [Debug, Release]
steps:
  - script: cargo build
  - ${{ if eq(parameters.configuration, 'Release') }}:
    - script: cargo build --release
"#,
        );
        let input = doc(r#"
steps:
  - checkout: self
  - template: templates/build.yml
    parameters:
      configuration: ${{ parameters.mode }}
"#);
        let ctx = ExpressionContext::new().with_parameter("mode", "Release");
        let output = Expander::new(&loader).expand(&input, &ctx).unwrap();

        let expected = doc(r#"
steps:
  - checkout: self
  - script: cargo build
  - script: cargo build --release
"#);
        assert_eq!(output, expected);
    }

    #[test]
    fn test_template_parameter_errors_carry_location() {
        let loader = MemoryLoader::new().with_template(
            "build.yml",
            "parameters:\n  - name: configuration\n    values: [Debug, Release]\nsteps: []\n",
        );
        let input =
            doc("steps:\n  - template: build.yml\n    parameters:\n      configuration: Fast\n");
        let err = Expander::new(&loader)
            .expand(&input, &ExpressionContext::new())
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::InvalidParameter);
        assert_eq!(err.node_path.unwrap().to_string(), "steps[0]");
    }

    #[test]
    fn test_template_variables_mapping_becomes_list() {
        let loader =
            MemoryLoader::new().with_template("vars.yml", "variables:\n  region: westeurope\n");
        let input = doc("variables:\n  - template: vars.yml\n  - name: tier\n    value: gold\n");
        let output = Expander::new(&loader)
            .expand(&input, &ExpressionContext::new())
            .unwrap();
        let expected = doc(
            "variables:\n  - name: region\n    value: westeurope\n  - name: tier\n    value: gold\n",
        );
        assert_eq!(output, expected);
    }

    #[test]
    fn test_template_reference_rejects_extra_keys() {
        let loader = MemoryLoader::new().with_template("build.yml", "steps: []\n");
        let input = doc("steps:\n  - template: build.yml\n    displayName: nope\n");
        let err = Expander::new(&loader)
            .expand(&input, &ExpressionContext::new())
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::InvalidReference);
    }

    #[test]
    fn test_circular_reference() {
        let loader = MemoryLoader::new()
            .with_template("a.yml", "steps:\n  - template: b.yml\n")
            .with_template("b.yml", "steps:\n  - template: a.yml\n");
        let input = doc("steps:\n  - template: a.yml\n");
        let err = Expander::new(&loader)
            .expand(&input, &ExpressionContext::new())
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::CircularReference);
        assert!(err.message.contains("a.yml"));
    }

    #[test]
    fn test_max_depth() {
        let loader = MemoryLoader::new()
            .with_template("a.yml", "steps:\n  - template: b.yml\n")
            .with_template("b.yml", "steps:\n  - script: leaf\n");
        let input = doc("steps:\n  - template: a.yml\n");

        let err = Expander::new(&loader)
            .with_max_depth(1)
            .expand(&input, &ExpressionContext::new())
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::MaxDepthExceeded);

        assert!(Expander::new(&loader)
            .with_max_depth(2)
            .expand(&input, &ExpressionContext::new())
            .is_ok());
    }

    #[test]
    fn test_expand_template_drops_parameters() {
        let loader = MemoryLoader::new().with_template(
            "pipeline.yml",
            "parameters:\n  - name: greeting\n    default: hi\nsteps:\n  - script: echo ${{ parameters.greeting }}\n",
        );
        let output = Expander::new(&loader)
            .expand_template("pipeline.yml", &IndexMap::new(), &ExpressionContext::new())
            .unwrap();
        assert_eq!(output, doc("steps:\n  - script: echo hi\n"));
    }
}
