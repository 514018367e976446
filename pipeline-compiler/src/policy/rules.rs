// Policy Rules
// Declarative predicate + message pairs evaluated over expanded nodes

use crate::document::{Mapping, Node, NodePath, Scalar};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;

/// Position of a mapping in the pipeline structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Pipeline,
    Stage,
    Job,
    Deployment,
    Step,
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Pipeline => "pipeline",
            NodeKind::Stage => "stage",
            NodeKind::Job => "job",
            NodeKind::Deployment => "deployment",
            NodeKind::Step => "step",
            NodeKind::Other => "other",
        }
    }

    /// Key holding the node's identifier (`stage: Build`, `job: Compile`)
    pub fn identifier_key(&self) -> Option<&'static str> {
        match self {
            NodeKind::Stage => Some("stage"),
            NodeKind::Job => Some("job"),
            NodeKind::Deployment => Some("deployment"),
            NodeKind::Step | NodeKind::Pipeline => Some("name"),
            NodeKind::Other => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mapping presented to the rules
#[derive(Debug, Clone, Copy)]
pub struct NodeVisit<'a> {
    pub kind: NodeKind,
    pub mapping: &'a Mapping,
    pub path: &'a NodePath,
    /// The node is an item of a sequence
    pub item: bool,
}

impl<'a> NodeVisit<'a> {
    /// The node's identifier, if it has one
    pub fn name(&self) -> Option<&'a str> {
        self.kind
            .identifier_key()
            .and_then(|key| self.mapping.get(key))
            .and_then(Node::as_str)
    }

    /// Task name of a `task: Name@Version` step, without the version
    pub fn task(&self) -> Option<&'a str> {
        if self.kind != NodeKind::Step {
            return None;
        }
        let task = self.mapping.get("task")?.as_str()?;
        Some(task.split_once('@').map_or(task, |(name, _)| name).trim())
    }
}

/// A policy rule. Returns the violation message when the node breaks it.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, visit: &NodeVisit<'_>) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid policy file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Serializable rule definitions, as written in `pipec.toml` or a policy
/// YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleSpec {
    /// Nodes of `scope` must not contain `key`
    DisallowKey {
        key: String,
        scope: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Steps must not run any of `tasks`
    DisallowTask {
        tasks: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Task steps may only run one of `tasks`
    AllowTasks {
        tasks: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Nodes of `scope` must contain `key`
    RequireKey {
        key: String,
        scope: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Identifiers of `scope` nodes must match `pattern`
    NamePattern {
        scope: NodeKind,
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl RuleSpec {
    /// Parse a policy file: either a list of rules or a mapping with a
    /// `rules` list.
    pub fn from_yaml(content: &str) -> Result<Vec<RuleSpec>, RuleError> {
        Ok(match serde_yaml::from_str::<PolicyFile>(content)? {
            PolicyFile::Rules(specs) | PolicyFile::Document { rules: specs } => specs,
        })
    }

    pub fn build(&self) -> Result<Box<dyn Rule>, RuleError> {
        let rule: Box<dyn Rule> = match self.clone() {
            RuleSpec::DisallowKey { key, scope, message } => Box::new(DisallowKey {
                key,
                scope,
                message,
            }),
            RuleSpec::DisallowTask { tasks, message } => Box::new(TaskFilter {
                name: "disallowTask",
                tasks,
                allow: false,
                message,
            }),
            RuleSpec::AllowTasks { tasks, message } => Box::new(TaskFilter {
                name: "allowTasks",
                tasks,
                allow: true,
                message,
            }),
            RuleSpec::RequireKey { key, scope, message } => Box::new(RequireKey {
                key,
                scope,
                message,
            }),
            RuleSpec::NamePattern {
                scope,
                pattern,
                message,
            } => {
                let regex = Regex::new(&pattern).map_err(|source| RuleError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                Box::new(NamePattern {
                    scope,
                    regex,
                    message,
                })
            }
        };
        Ok(rule)
    }
}

/// Fill `{key}`, `{task}`, `{name}`, `{kind}` and `{path}` in a message.
fn render(template: &str, visit: &NodeVisit<'_>, key: &str, task: &str) -> String {
    template
        .replace("{key}", key)
        .replace("{task}", task)
        .replace("{name}", visit.name().unwrap_or(""))
        .replace("{kind}", visit.kind.as_str())
        .replace("{path}", &visit.path.to_string())
}

struct DisallowKey {
    key: String,
    scope: NodeKind,
    message: Option<String>,
}

impl Rule for DisallowKey {
    fn name(&self) -> &str {
        "disallowKey"
    }

    fn check(&self, visit: &NodeVisit<'_>) -> Option<String> {
        if visit.kind != self.scope || !visit.mapping.contains_key(&self.key) {
            return None;
        }
        let template = self
            .message
            .as_deref()
            .unwrap_or("'{key}' is not allowed in a {kind}");
        Some(render(template, visit, &self.key, ""))
    }
}

struct RequireKey {
    key: String,
    scope: NodeKind,
    message: Option<String>,
}

impl Rule for RequireKey {
    fn name(&self) -> &str {
        "requireKey"
    }

    fn check(&self, visit: &NodeVisit<'_>) -> Option<String> {
        if visit.kind != self.scope || visit.mapping.contains_key(&self.key) {
            return None;
        }
        let template = self.message.as_deref().unwrap_or("{kind} is missing '{key}'");
        Some(render(template, visit, &self.key, ""))
    }
}

/// `disallowTask` and `allowTasks`. Entries without `@` match any version.
struct TaskFilter {
    name: &'static str,
    tasks: Vec<String>,
    allow: bool,
    message: Option<String>,
}

impl TaskFilter {
    fn listed(&self, visit: &NodeVisit<'_>, name: &str) -> bool {
        let full = visit
            .mapping
            .get("task")
            .and_then(Node::as_str)
            .unwrap_or(name)
            .trim();
        self.tasks.iter().any(|entry| {
            if entry.contains('@') {
                entry.eq_ignore_ascii_case(full)
            } else {
                entry.eq_ignore_ascii_case(name)
            }
        })
    }
}

impl Rule for TaskFilter {
    fn name(&self) -> &str {
        self.name
    }

    fn check(&self, visit: &NodeVisit<'_>) -> Option<String> {
        let task = visit.task()?;
        if self.listed(visit, task) == self.allow {
            return None;
        }
        let default = if self.allow {
            "task '{task}' is not in the list of allowed tasks"
        } else {
            "task '{task}' is not allowed"
        };
        let template = self.message.as_deref().unwrap_or(default);
        Some(render(template, visit, "task", task))
    }
}

struct NamePattern {
    scope: NodeKind,
    regex: Regex,
    message: Option<String>,
}

impl Rule for NamePattern {
    fn name(&self) -> &str {
        "namePattern"
    }

    fn check(&self, visit: &NodeVisit<'_>) -> Option<String> {
        if visit.kind != self.scope {
            return None;
        }
        let name = visit.name()?;
        if self.regex.is_match(name) {
            return None;
        }
        let default = format!("{{kind}} name '{{name}}' does not match '{}'", self.regex.as_str());
        let template = self.message.as_deref().unwrap_or(&default);
        Some(render(template, visit, visit.kind.identifier_key().unwrap_or(""), ""))
    }
}

/// A `- 'message': error` sequence item anywhere in the expanded tree aborts
/// the compile with that message. Mappings outside sequences are data.
pub struct ErrorMarker;

impl Rule for ErrorMarker {
    fn name(&self) -> &str {
        "errorMarker"
    }

    fn check(&self, visit: &NodeVisit<'_>) -> Option<String> {
        if !visit.item || visit.mapping.len() != 1 {
            return None;
        }
        match visit.mapping.fields().next()? {
            (message, Node::Scalar(Scalar::String(marker))) if marker == "error" => {
                Some(message.to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PolicyFile {
    Rules(Vec<RuleSpec>),
    Document { rules: Vec<RuleSpec> },
}

/// Ordered collection of rules. Always starts with [`ErrorMarker`].
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: vec![Box::new(ErrorMarker)],
        }
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs<'s>(
        specs: impl IntoIterator<Item = &'s RuleSpec>,
    ) -> Result<Self, RuleError> {
        let mut set = Self::new();
        set.extend_specs(specs)?;
        Ok(set)
    }

    pub fn from_yaml(content: &str) -> Result<Self, RuleError> {
        Self::from_specs(&RuleSpec::from_yaml(content)?)
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn extend_specs<'s>(
        &mut self,
        specs: impl IntoIterator<Item = &'s RuleSpec>,
    ) -> Result<(), RuleError> {
        for spec in specs {
            self.rules.push(spec.build()?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }
}
