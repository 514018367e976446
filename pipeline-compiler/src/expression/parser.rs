// Expression Parser
// Recursive descent parser producing an AST for compile-time expressions
//
// Grammar:
//   expr      := literal | call | reference
//   call      := IDENT '(' [expr (',' expr)*] ')'
//   reference := IDENT ('.' IDENT | '[' expr ']')*

use crate::expression::error::EvalError;
use crate::expression::lexer::{Lexer, Spanned, Token};
use crate::expression::value::{format_number, Value};

use std::fmt;

/// Abstract Syntax Tree node for expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Null, boolean, number or string literal
    Literal(Value),

    /// Context reference: parameters.name, variables['Build.Reason'], item.key
    Reference(Reference),

    /// Function call: eq(a, b), and(x, y, z)
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub root: String,
    pub path: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// `.name`
    Property(String),
    /// `[expr]`
    Index(Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Literal(Value::Number(n)) => write!(f, "{}", format_number(*n)),
            Expr::Literal(Value::Null) => write!(f, "null"),
            Expr::Literal(other) => write!(f, "{}", other.as_string()),
            Expr::Reference(reference) => write!(f, "{}", reference),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for accessor in &self.path {
            match accessor {
                Accessor::Property(name) => write!(f, ".{}", name)?,
                Accessor::Index(expr) => write!(f, "[{}]", expr)?,
            }
        }
        Ok(())
    }
}

pub struct ExprParser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse expression from string
    pub fn parse_str(input: &str) -> Result<Expr, EvalError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    pub fn parse(&mut self) -> Result<Expr, EvalError> {
        let expr = self.parse_expr()?;
        if self.peek() != &Token::Eof {
            return Err(self.error(format!("unexpected {} after expression", self.peek())));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::String(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Identifier(name) => {
                if self.peek() == &Token::LParen {
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    self.parse_reference(name).map(Expr::Reference)
                }
            }
            Token::Eof => Err(self.error("expected an expression")),
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }

    fn parse_reference(&mut self, root: String) -> Result<Reference, EvalError> {
        let mut path = Vec::new();
        loop {
            match self.peek().clone() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Identifier(name) => path.push(Accessor::Property(name)),
                        // keywords are valid property names: parameters.true
                        Token::True => path.push(Accessor::Property("true".to_string())),
                        Token::False => path.push(Accessor::Property("false".to_string())),
                        Token::Null => path.push(Accessor::Property("null".to_string())),
                        _ => return Err(self.error("expected property name after '.'")),
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "expected ']'")?;
                    path.push(Accessor::Index(Box::new(index)));
                }
                _ => return Ok(Reference { root, path }),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.expect(Token::LParen, "expected '('")?;

        let mut args = Vec::new();
        if self.peek() == &Token::RParen {
            self.advance();
            return Ok(args);
        }

        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, token: Token, msg: &str) -> Result<(), EvalError> {
        if self.peek() == &token {
            self.advance();
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        // point at the token that was just consumed, or the end of input
        let index = self.position.saturating_sub(1).min(self.tokens.len().saturating_sub(1));
        let offset = self.tokens.get(index).map(|s| s.offset).unwrap_or(0);
        EvalError::syntax(message, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(root: &str, props: &[&str]) -> Expr {
        Expr::Reference(Reference {
            root: root.to_string(),
            path: props
                .iter()
                .map(|p| Accessor::Property(p.to_string()))
                .collect(),
        })
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            ExprParser::parse_str("null").unwrap(),
            Expr::Literal(Value::Null)
        );
        assert_eq!(
            ExprParser::parse_str("'Release'").unwrap(),
            Expr::Literal(Value::String("Release".to_string()))
        );
        assert_eq!(
            ExprParser::parse_str("3").unwrap(),
            Expr::Literal(Value::Number(3.0))
        );
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            ExprParser::parse_str("parameters.stageList").unwrap(),
            reference("parameters", &["stageList"])
        );
    }

    #[test]
    fn test_parse_index_access() {
        let expr = ExprParser::parse_str("variables['Build.Reason']").unwrap();
        let Expr::Reference(r) = expr else {
            panic!("expected reference");
        };
        assert_eq!(r.root, "variables");
        assert_eq!(
            r.path,
            vec![Accessor::Index(Box::new(Expr::Literal(Value::String(
                "Build.Reason".to_string()
            ))))]
        );
    }

    #[test]
    fn test_parse_nested_call() {
        let expr = ExprParser::parse_str("and(succeeded(), ne(entry.key, 'dependsOn'))").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "and");
        assert_eq!(args.len(), 2);
        assert_eq!(
            args[0],
            Expr::Call {
                name: "succeeded".to_string(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_display_round_trips() {
        let source = "and(eq(parameters.env, 'it''s'), not(variables['x']), 2)";
        let expr = ExprParser::parse_str(source).unwrap();
        assert_eq!(expr.to_string(), source);
        assert_eq!(ExprParser::parse_str(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn test_parse_trailing_tokens_rejected() {
        let err = ExprParser::parse_str("parameters.a parameters.b").unwrap_err();
        assert!(err.message.contains("after expression"));
    }

    #[test]
    fn test_parse_unclosed_call() {
        assert!(ExprParser::parse_str("eq(a, 'b'").is_err());
        assert!(ExprParser::parse_str("").is_err());
    }
}
