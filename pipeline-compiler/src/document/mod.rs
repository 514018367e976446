// Document module for pipeline definitions
// Provides YAML parsing into an ordered tree with compile-time directives

pub mod error;
pub mod node;
pub mod parser;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use node::{Directive, DirectiveBlock, Entry, Mapping, Node, NodePath, PathSegment, Scalar};
pub use parser::DocumentParser;

use std::path::Path;

pub fn parse(content: &str) -> ParseResult<Node> {
    DocumentParser::parse(content)
}

pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Node> {
    DocumentParser::parse_file(path)
}

pub fn to_yaml(node: &Node) -> ParseResult<String> {
    DocumentParser::to_yaml(node)
}
