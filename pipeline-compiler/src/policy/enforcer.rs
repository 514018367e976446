// Policy Enforcer
// Walks an expanded pipeline and collects every rule violation

use crate::document::{Mapping, Node, NodePath};
use crate::policy::rules::{NodeKind, NodeVisit, RuleSet};

use std::fmt;

/// A rule broken by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub rule: String,
    pub message: String,
    pub path: NodePath,
}

impl PolicyViolation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>, path: NodePath) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
            path,
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "policy violation at '{}': {} [{}]",
            self.path, self.message, self.rule
        )
    }
}

impl std::error::Error for PolicyViolation {}

/// Enforcer for expanded pipelines
pub struct PolicyEnforcer;

impl PolicyEnforcer {
    /// Check every node against every rule. Violations are reported in
    /// pre-order, rules in declaration order within a node.
    pub fn enforce(node: &Node, rules: &RuleSet) -> Result<(), Vec<PolicyViolation>> {
        let mut violations = Vec::new();
        let root = NodePath::root();

        match node {
            Node::Mapping(m) => {
                Self::visit(m, NodeKind::Pipeline, false, &root, rules, &mut violations)
            }
            other => Self::walk(other, NodeKind::Other, &root, rules, &mut violations),
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn visit(
        mapping: &Mapping,
        kind: NodeKind,
        item: bool,
        path: &NodePath,
        rules: &RuleSet,
        violations: &mut Vec<PolicyViolation>,
    ) {
        let visit = NodeVisit {
            kind,
            mapping,
            path,
            item,
        };
        for rule in rules.iter() {
            if let Some(message) = rule.check(&visit) {
                tracing::warn!(rule = rule.name(), at = %path, "{}", message);
                violations.push(PolicyViolation::new(rule.name(), message, path.clone()));
            }
        }

        for (key, value) in mapping.fields() {
            Self::walk(value, child_kind(key), &path.key(key), rules, violations);
        }
    }

    /// `item_kind` applies to the items when `node` is a sequence.
    fn walk(
        node: &Node,
        item_kind: NodeKind,
        path: &NodePath,
        rules: &RuleSet,
        violations: &mut Vec<PolicyViolation>,
    ) {
        match node {
            Node::Mapping(m) => Self::visit(m, NodeKind::Other, false, path, rules, violations),
            Node::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = path.index(i);
                    match item {
                        Node::Mapping(m) => {
                            let kind = match item_kind {
                                NodeKind::Job if m.contains_key("deployment") => {
                                    NodeKind::Deployment
                                }
                                kind => kind,
                            };
                            Self::visit(m, kind, true, &item_path, rules, violations)
                        }
                        other => Self::walk(other, NodeKind::Other, &item_path, rules, violations),
                    }
                }
            }
            Node::Scalar(_) | Node::Directive(_) => {}
        }
    }
}

/// Kind of the items of a sequence stored under `key`
fn child_kind(key: &str) -> NodeKind {
    match key {
        "stages" => NodeKind::Stage,
        "jobs" => NodeKind::Job,
        "steps" => NodeKind::Step,
        _ => NodeKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse;
    use crate::policy::rules::RuleSpec;

    fn rules(yaml: &str) -> RuleSet {
        RuleSet::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_clean_pipeline() {
        let node = parse("steps:\n  - bash: echo A\n  - task: Bash@3\n").unwrap();
        let rules = rules("- kind: disallowKey\n  key: script\n  scope: step\n");
        assert!(PolicyEnforcer::enforce(&node, &rules).is_ok());
    }

    #[test]
    fn test_collects_all_violations_in_pre_order() {
        let node = parse(
            r#"
stages:
  - stage: Build
    jobs:
      - job: Compile
        steps:
          - script: echo one
          - bash: echo two
          - script: echo three
  - stage: Deploy
    jobs:
      - deployment: Release
        strategy:
          runOnce:
            deploy:
              steps:
                - script: echo four
"#,
        )
        .unwrap();
        let rules = rules("- kind: disallowKey\n  key: script\n  scope: step\n");

        let violations = PolicyEnforcer::enforce(&node, &rules).unwrap_err();
        let paths: Vec<String> = violations.iter().map(|v| v.path.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "stages[0].jobs[0].steps[0]",
                "stages[0].jobs[0].steps[2]",
                "stages[1].jobs[0].strategy.runOnce.deploy.steps[0]",
            ]
        );
        assert!(violations.iter().all(|v| v.rule == "disallowKey"));
    }

    #[test]
    fn test_deployment_kind() {
        let node = parse("jobs:\n  - deployment: Release\n  - job: Build\n").unwrap();
        let set = RuleSet::from_specs(&[RuleSpec::RequireKey {
            key: "environment".to_string(),
            scope: NodeKind::Deployment,
            message: None,
        }])
        .unwrap();

        let violations = PolicyEnforcer::enforce(&node, &set).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path.to_string(), "jobs[0]");
    }

    #[test]
    fn test_pipeline_scope() {
        let node = parse("trigger: none\nsteps: []\n").unwrap();
        let set = rules("- kind: requireKey\n  key: pool\n  scope: pipeline\n");
        let violations = PolicyEnforcer::enforce(&node, &set).unwrap_err();
        assert_eq!(violations[0].path, NodePath::root());
    }

    #[test]
    fn test_error_marker_is_a_violation() {
        let node =
            parse("steps:\n  - checkout: self\n  - 'Inline scripts are forbidden': error\n")
                .unwrap();
        let violations = PolicyEnforcer::enforce(&node, &RuleSet::new()).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "errorMarker");
        assert_eq!(violations[0].message, "Inline scripts are forbidden");
        assert_eq!(
            violations[0].to_string(),
            "policy violation at 'steps[1]': Inline scripts are forbidden [errorMarker]"
        );
    }

    #[test]
    fn test_single_field_data_mapping_is_not_a_marker() {
        let node = parse(
            "variables:\n  logLevel: error\nsteps:\n  - task: Tool@1\n    inputs:\n      verbosity: error\n",
        )
        .unwrap();
        assert!(PolicyEnforcer::enforce(&node, &RuleSet::new()).is_ok());
    }
}
