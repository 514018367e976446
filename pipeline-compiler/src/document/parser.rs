// Pipeline Document Parser
// Parses YAML into the ordered document model and serialises it back

use crate::document::error::{locate, ParseError, ParseResult};
use crate::document::node::{Directive, DirectiveBlock, Entry, Mapping, Node, Scalar};

use std::fs;
use std::path::Path;

/// Pipeline document parser
pub struct DocumentParser;

impl DocumentParser {
    /// Parse a document from a YAML string. An empty document is `null`.
    pub fn parse(content: &str) -> ParseResult<Node> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;

        Converter { source: content }.node(value)
    }

    /// Parse a document from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Node> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::io(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Serialise a node to YAML. Output is stable: parsing it again yields
    /// the same tree.
    pub fn to_yaml(node: &Node) -> ParseResult<String> {
        serde_yaml::to_string(node).map_err(|e| {
            ParseError::new(format!("failed to serialise document: {}", e), 0, 0)
        })
    }
}

struct Converter<'a> {
    source: &'a str,
}

impl Converter<'_> {
    fn node(&self, value: serde_yaml::Value) -> ParseResult<Node> {
        use serde_yaml::Value as Yaml;

        Ok(match value {
            Yaml::Null => Node::Scalar(Scalar::Null),
            Yaml::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Yaml::Number(n) => match n.as_f64() {
                Some(f) if fits_f64(&n) => Node::Scalar(Scalar::Number(f)),
                // integers past 2^53 keep their digits
                _ => Node::Scalar(Scalar::String(n.to_string())),
            },
            Yaml::String(s) => Node::Scalar(Scalar::String(s)),
            Yaml::Sequence(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(|item| self.sequence_item(item))
                    .collect::<ParseResult<_>>()?,
            ),
            Yaml::Mapping(map) => Node::Mapping(self.mapping(map)?),
            Yaml::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                return Err(self.located(
                    ParseError::new(format!("YAML tag '{}' is not supported", tag), 0, 0),
                    &tag,
                ));
            }
        })
    }

    /// A sequence item that is a mapping with a single directive key becomes
    /// a directive node.
    fn sequence_item(&self, value: serde_yaml::Value) -> ParseResult<Node> {
        match self.node(value)? {
            Node::Mapping(m) => Ok(match m.into_single_directive() {
                Ok(block) => Node::Directive(Box::new(block)),
                Err(m) => Node::Mapping(m),
            }),
            other => Ok(other),
        }
    }

    fn mapping(&self, map: serde_yaml::Mapping) -> ParseResult<Mapping> {
        use serde_yaml::Value as Yaml;

        let mut mapping = Mapping::new();
        for (key, value) in map {
            let key = match key {
                Yaml::String(s) => s,
                // `on: true` style keys are still plain text in pipelines
                Yaml::Bool(b) => b.to_string(),
                Yaml::Number(n) => n.to_string(),
                other => {
                    return Err(ParseError::new(
                        format!("mapping keys must be strings, found {:?}", other),
                        0,
                        0,
                    ))
                }
            };

            let body = self.node(value)?;
            match Directive::parse(&key) {
                Ok(Some(directive)) => {
                    mapping.push(Entry::Directive(DirectiveBlock { directive, body }))
                }
                Ok(None) => mapping.push(Entry::Field(key, body)),
                Err(err) => return Err(self.located(err, &key)),
            }
        }
        Ok(mapping)
    }

    fn located(&self, err: ParseError, needle: &str) -> ParseError {
        match locate(self.source, needle) {
            Some((line, column)) => err.at(line, column).with_source_context(self.source, 2),
            None => err,
        }
    }
}

/// Largest magnitude up to which every integer is exact in an `f64`
const MAX_EXACT_INTEGER: u64 = 1 << 53;

fn fits_f64(n: &serde_yaml::Number) -> bool {
    if let Some(i) = n.as_i64() {
        i.unsigned_abs() <= MAX_EXACT_INTEGER
    } else if let Some(u) = n.as_u64() {
        u <= MAX_EXACT_INTEGER
    } else {
        true
    }
}
