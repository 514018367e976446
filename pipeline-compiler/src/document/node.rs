// Document Model
// Ordered tree of scalars, sequences, mappings and compile-time directives

use crate::document::error::{ParseError, ParseErrorKind};
use crate::expression::segments::{extract_segments, Segment};
use crate::expression::Value;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use std::fmt;

/// Integers outside +/-2^53 are parsed as strings so no digits are lost.
#[derive(Debug, Clone, Default)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Number(a), Scalar::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::String(a), Scalar::String(b)) => a == b,
            _ => false,
        }
    }
}

/// A node in a pipeline document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(Mapping),
    /// A sequence item whose only key is a compile-time directive
    Directive(Box<DirectiveBlock>),
}

/// Ordered mapping. Field keys are unique; directive entries may repeat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mapping {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Field(String, Node),
    Directive(DirectiveBlock),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveBlock {
    pub directive: Directive,
    pub body: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `${{ if <expression> }}`
    If(String),
    /// `${{ each <var> in <collection> }}`
    Each { var: String, collection: String },
}

impl Directive {
    /// Recognise a directive key.
    ///
    /// Returns `Ok(None)` for ordinary keys, including keys that are a plain
    /// `${{ expression }}` to be substituted.
    pub fn parse(key: &str) -> Result<Option<Directive>, ParseError> {
        let body = match extract_segments(key.trim()).as_slice() {
            [Segment::CompileTime(body)] => *body,
            _ => return Ok(None),
        };

        let keyword_len = body
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(body.len());
        let (keyword, rest) = body.split_at(keyword_len);
        let rest = rest.trim();

        match keyword {
            "if" => {
                if rest.is_empty() {
                    return Err(directive_error(key, "'if' directive has no condition")
                        .with_suggestion("write ${{ if <expression> }}"));
                }
                Ok(Some(Directive::If(rest.to_string())))
            }
            "each" => {
                let (var, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let collection = tail
                    .trim_start()
                    .strip_prefix("in")
                    .filter(|c| c.starts_with(char::is_whitespace))
                    .map(str::trim)
                    .unwrap_or("");
                if var.is_empty() || collection.is_empty() {
                    return Err(directive_error(key, "malformed 'each' directive")
                        .with_suggestion("write ${{ each <name> in <collection> }}"));
                }
                Ok(Some(Directive::Each {
                    var: var.to_string(),
                    collection: collection.to_string(),
                }))
            }
            "else" | "elseif" => Err(directive_error(
                key,
                format!("unsupported directive '{}'", keyword),
            )
            .with_suggestion(
                "there is no if/else; write a second ${{ if }} with the complementary condition, e.g. ${{ if not(<condition>) }}",
            )),
            _ => Ok(None),
        }
    }

    /// Render back to the key form it was parsed from.
    pub fn to_key(&self) -> String {
        match self {
            Directive::If(condition) => format!("${{{{ if {} }}}}", condition),
            Directive::Each { var, collection } => {
                format!("${{{{ each {} in {} }}}}", var, collection)
            }
        }
    }
}

fn directive_error(key: &str, message: impl Into<String>) -> ParseError {
    ParseError::new(format!("{} in key '{}'", message.into(), key), 0, 0)
        .with_kind(ParseErrorKind::Directive)
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::String(s.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Type name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Scalar(Scalar::Null) => "null",
            Node::Scalar(Scalar::Bool(_)) => "boolean",
            Node::Scalar(Scalar::Number(_)) => "number",
            Node::Scalar(Scalar::String(_)) => "string",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
            Node::Directive(_) => "directive",
        }
    }

    /// True if a directive remains anywhere in the tree.
    pub fn has_directives(&self) -> bool {
        match self {
            Node::Scalar(_) => false,
            Node::Sequence(items) => items.iter().any(Node::has_directives),
            Node::Mapping(m) => m.has_directives(),
            Node::Directive(_) => true,
        }
    }

    /// Convert to an expression value. Directive keys are kept as plain
    /// keys so nothing is lost.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Scalar(Scalar::Null) => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Node::Scalar(Scalar::Number(n)) => Value::Number(*n),
            Node::Scalar(Scalar::String(s)) => Value::String(s.clone()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Mapping(m) => Value::Object(
                m.entries
                    .iter()
                    .map(|entry| match entry {
                        Entry::Field(k, v) => (k.clone(), v.to_value()),
                        Entry::Directive(block) => {
                            (block.directive.to_key(), block.body.to_value())
                        }
                    })
                    .collect(),
            ),
            Node::Directive(block) => {
                let mut map = IndexMap::new();
                map.insert(block.directive.to_key(), block.body.to_value());
                Value::Object(map)
            }
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(*b)),
            Value::Number(n) => Node::Scalar(Scalar::Number(*n)),
            Value::String(s) => Node::Scalar(Scalar::String(s.clone())),
            Value::Array(items) => Node::Sequence(items.iter().map(Node::from).collect()),
            Value::Object(map) => Node::Mapping(Mapping {
                entries: map
                    .iter()
                    .map(|(k, v)| Entry::Field(k.clone(), Node::from(v)))
                    .collect(),
            }),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::from(&value)
    }
}

impl From<Mapping> for Node {
    fn from(m: Mapping) -> Self {
        Node::Mapping(m)
    }
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Field entries in order, skipping directives.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Field(k, v) => Some((k.as_str(), v)),
            Entry::Directive(_) => None,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.fields().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Key of the first field, e.g. the task selector of a step.
    pub fn first_key(&self) -> Option<&str> {
        self.fields().next().map(|(k, _)| k)
    }

    /// Set a field, replacing an existing value in place or appending.
    pub fn insert(&mut self, key: impl Into<String>, value: Node) {
        let key = key.into();
        for entry in &mut self.entries {
            if let Entry::Field(k, v) = entry {
                if *k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.entries.push(Entry::Field(key, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let index = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Field(k, _) if k == key))?;
        match self.entries.remove(index) {
            Entry::Field(_, value) => Some(value),
            Entry::Directive(_) => None,
        }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn has_directives(&self) -> bool {
        self.entries.iter().any(|entry| match entry {
            Entry::Field(_, v) => v.has_directives(),
            Entry::Directive(_) => true,
        })
    }

    /// Unwrap a mapping whose only entry is a directive.
    pub fn into_single_directive(mut self) -> Result<DirectiveBlock, Mapping> {
        if self.entries.len() == 1 {
            if let Some(Entry::Directive(_)) = self.entries.first() {
                if let Some(Entry::Directive(block)) = self.entries.pop() {
                    return Ok(block);
                }
            }
        }
        Err(self)
    }

    /// True if every entry is a directive.
    pub fn is_directive_only(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|entry| matches!(entry, Entry::Directive(_)))
    }
}

impl FromIterator<(String, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| Entry::Field(k, v))
                .collect(),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Scalar(scalar) => scalar.serialize(serializer),
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Mapping(m) => m.serialize(serializer),
            Node::Directive(block) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(&block.directive.to_key(), &block.body)?;
                map.end()
            }
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                serializer.serialize_i64(*n as i64)
            }
            Scalar::Number(n) => serializer.serialize_f64(*n),
            Scalar::String(s) => serializer.serialize_str(s),
        }
    }
}

impl Serialize for Mapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            match entry {
                Entry::Field(k, v) => map.serialize_entry(k, v)?,
                Entry::Directive(block) => {
                    map.serialize_entry(&block.directive.to_key(), &block.body)?
                }
            }
        }
        map.end()
    }
}

/// Location of a node, e.g. `stages[1].jobs[0].steps[2]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct NodePath {
    segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.segments.push(PathSegment::Key(key.into()));
        path
    }

    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.segments.push(PathSegment::Index(index));
        path
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last key segment, ignoring trailing indexes.
    pub fn parent_key(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(k) => Some(k.as_str()),
            PathSegment::Index(_) => None,
        })
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_parse_if() {
        assert_eq!(
            Directive::parse("${{ if eq(parameters.env, 'prod') }}").unwrap(),
            Some(Directive::If("eq(parameters.env, 'prod')".to_string()))
        );
    }

    #[test]
    fn test_directive_parse_each() {
        assert_eq!(
            Directive::parse("${{ each stage in parameters.stages }}").unwrap(),
            Some(Directive::Each {
                var: "stage".to_string(),
                collection: "parameters.stages".to_string()
            })
        );
    }

    #[test]
    fn test_directive_parse_plain_keys() {
        assert_eq!(Directive::parse("script").unwrap(), None);
        assert_eq!(Directive::parse("${{ parameters.name }}").unwrap(), None);
        assert_eq!(Directive::parse("${{ iif(true, 'a', 'b') }}").unwrap(), None);
        assert_eq!(Directive::parse("prefix-${{ if }}").unwrap(), None);
    }

    #[test]
    fn test_directive_parse_rejects_else() {
        for key in ["${{ else }}", "${{ elseif eq(a, b) }}"] {
            let err = Directive::parse(key).unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::Directive);
            assert!(err.suggestion.unwrap().contains("not("));
        }
    }

    #[test]
    fn test_directive_parse_malformed() {
        assert!(Directive::parse("${{ if }}").is_err());
        assert!(Directive::parse("${{ each x of y }}").is_err());
        assert!(Directive::parse("${{ each x in }}").is_err());
    }

    #[test]
    fn test_directive_to_key_round_trips() {
        for key in ["${{ if not(parameters.skip) }}", "${{ each s in parameters.stages }}"] {
            let directive = Directive::parse(key).unwrap().unwrap();
            assert_eq!(directive.to_key(), key);
        }
    }

    #[test]
    fn test_mapping_insert_and_remove_keep_order() {
        let mut m = Mapping::new();
        m.insert("stage", Node::string("Build"));
        m.insert("dependsOn", Node::string("Init"));
        m.insert("stage", Node::string("Deploy"));

        assert_eq!(m.first_key(), Some("stage"));
        assert_eq!(m.get("stage").and_then(Node::as_str), Some("Deploy"));
        assert_eq!(m.remove("dependsOn"), Some(Node::string("Init")));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_node_path_display() {
        let path = NodePath::root().key("stages").index(1).key("jobs").index(0);
        assert_eq!(path.to_string(), "stages[1].jobs[0]");
        assert_eq!(path.parent_key(), Some("jobs"));
        assert_eq!(NodePath::root().to_string(), "<root>");
    }

    #[test]
    fn test_value_conversion_preserves_order() {
        let m: Mapping = vec![
            ("zeta".to_string(), Node::string("z")),
            ("alpha".to_string(), Node::Scalar(Scalar::Number(1.0))),
        ]
        .into_iter()
        .collect();
        let node = Node::Mapping(m);
        let value = node.to_value();
        assert_eq!(value.to_json(), r#"{"zeta":"z","alpha":1}"#);
        assert_eq!(Node::from(&value), node);
    }
}
