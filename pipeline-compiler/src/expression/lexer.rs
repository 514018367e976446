// Expression Lexer
// Tokenizes the body of a ${{ }} compile-time expression

use crate::expression::error::EvalError;

use std::fmt;

/// Token types for compile-time expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    Identifier(String),

    Dot,      // .
    Comma,    // ,
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token together with the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    /// Tokenize the entire input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, EvalError> {
        self.skip_whitespace();

        let Some(&(offset, ch)) = self.chars.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                offset: self.len,
            });
        };

        let token = match ch {
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '\'' => self.read_string(offset)?,
            '0'..='9' | '-' => self.read_number(offset)?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            other => {
                return Err(EvalError::syntax(
                    format!("unexpected character '{}'", other),
                    offset,
                ))
            }
        };

        Ok(Spanned { token, offset })
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
    }

    fn read_string(&mut self, start: usize) -> Result<Token, EvalError> {
        self.chars.next(); // opening quote
        let mut value = String::new();

        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    // '' is an escaped quote
                    if self.chars.next_if(|&(_, c)| c == '\'').is_some() {
                        value.push('\'');
                    } else {
                        return Ok(Token::String(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => return Err(EvalError::syntax("unterminated string literal", start)),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, EvalError> {
        let mut text = String::new();
        if let Some((_, '-')) = self.chars.next_if(|&(_, c)| c == '-') {
            text.push('-');
        }
        while let Some((_, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit() || c == '.') {
            text.push(c);
        }

        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| EvalError::syntax(format!("invalid number '{}'", text), start))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some((_, c)) = self
            .chars
            .next_if(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '-')
        {
            ident.push(c);
        }

        match ident.to_lowercase().as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lexer_function_call() {
        assert_eq!(
            tokens("eq(parameters.env, 'prod')"),
            vec![
                Token::Identifier("eq".to_string()),
                Token::LParen,
                Token::Identifier("parameters".to_string()),
                Token::Dot,
                Token::Identifier("env".to_string()),
                Token::Comma,
                Token::String("prod".to_string()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_escaped_string() {
        assert_eq!(
            tokens("'it''s'"),
            vec![Token::String("it's".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_lexer_keywords_are_case_insensitive() {
        assert_eq!(
            tokens("True FALSE null"),
            vec![Token::True, Token::False, Token::Null, Token::Eof]
        );
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(
            tokens("42 -3 1.5"),
            vec![
                Token::Number(42.0),
                Token::Number(-3.0),
                Token::Number(1.5),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_lexer_hyphenated_identifier() {
        assert_eq!(
            tokens("parameters.my-param"),
            vec![
                Token::Identifier("parameters".to_string()),
                Token::Dot,
                Token::Identifier("my-param".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_rejects_operators() {
        let err = Lexer::new("a == b").tokenize().unwrap_err();
        assert_eq!(err.position, Some(2));
    }

    #[test]
    fn test_lexer_unterminated_string() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }
}
