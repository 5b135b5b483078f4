//! Lexer for tokenizing script source.

use crate::error::{ScriptError, ScriptResult};
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer for script source text.
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over `input`.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// Tokenize the entire input.
    pub fn tokenize(mut self) -> ScriptResult<Vec<Token>> {
        let mut tokens = Vec::with_capacity((self.input.len() / 5).max(8));
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> ScriptResult<Token> {
        self.skip_trivia()?;

        let start = self.position;
        let Some(ch) = self.current_char() else {
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start)));
        };

        let kind = match ch {
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            ',' => self.single(TokenKind::Comma),
            '.' => self.single(TokenKind::Dot),
            ':' => self.single(TokenKind::Colon),
            ';' => self.single(TokenKind::Semicolon),
            '?' => self.single(TokenKind::Question),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),

            '=' if self.peek() == Some('=') => {
                self.advance();
                self.advance();
                // tolerate the strict-equality spelling
                if self.current_char() == Some('=') {
                    self.advance();
                }
                TokenKind::Eq
            }
            '=' => self.single(TokenKind::Assign),
            '!' if self.peek() == Some('=') => {
                self.advance();
                self.advance();
                if self.current_char() == Some('=') {
                    self.advance();
                }
                TokenKind::Ne
            }
            '!' => self.single(TokenKind::Not),
            '<' if self.peek() == Some('=') => self.double(TokenKind::Le),
            '<' => self.single(TokenKind::Lt),
            '>' if self.peek() == Some('=') => self.double(TokenKind::Ge),
            '>' => self.single(TokenKind::Gt),
            '&' if self.peek() == Some('&') => self.double(TokenKind::AndAnd),
            '|' if self.peek() == Some('|') => self.double(TokenKind::OrOr),

            '"' | '\'' => self.read_string(ch)?,
            c if c.is_ascii_digit() => self.read_number()?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_word(),

            other => {
                return Err(ScriptError::syntax(format!(
                    "unexpected character '{other}' at byte {start}"
                )));
            }
        };

        Ok(Token::new(kind, Span::new(start, self.position)))
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let current = self.current_char()?;
        self.input[self.position + current.len_utf8()..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.position += ch.len_utf8();
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        self.advance();
        kind
    }

    /// Skip whitespace and `//` / `/* */` comments.
    fn skip_trivia(&mut self) -> ScriptResult<()> {
        loop {
            match self.current_char() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('/') if self.peek() == Some('/') => {
                    while let Some(c) = self.current_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek() == Some('*') => {
                    let start = self.position;
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                            None => {
                                return Err(ScriptError::syntax(format!(
                                    "unterminated comment starting at byte {start}"
                                )));
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> ScriptResult<TokenKind> {
        let start = self.position;
        self.advance(); // opening quote

        let mut value = String::new();
        while let Some(ch) = self.current_char() {
            if ch == quote {
                self.advance();
                return Ok(TokenKind::Str(value));
            }
            if ch == '\\' {
                self.advance();
                let Some(escaped) = self.current_char() else {
                    break;
                };
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                self.advance();
            } else {
                value.push(ch);
                self.advance();
            }
        }

        Err(ScriptError::syntax(format!(
            "unterminated string literal starting at byte {start}"
        )))
    }

    fn read_number(&mut self) -> ScriptResult<TokenKind> {
        let start = self.position;
        let mut is_float = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.input[start..self.position];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| ScriptError::syntax(format!("invalid float literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| ScriptError::syntax(format!("integer literal '{text}' out of range")))
        }
    }

    fn read_word(&mut self) -> TokenKind {
        let start = self.position;
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.advance();
            } else {
                break;
            }
        }

        match &self.input[start..self.position] {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "null" | "undefined" => TokenKind::Null,
            "let" | "var" => TokenKind::Let,
            "const" => TokenKind::Const,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "await" => TokenKind::Await,
            word => TokenKind::Ident(word.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn operators_and_delimiters() {
        assert_eq!(
            kinds("+ - * / % == != <= >= && || !"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Not,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strict_equality_spellings_collapse() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Ident("b".into()),
                TokenKind::Ne,
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 3.14 0"),
            vec![
                TokenKind::Int(42),
                TokenKind::Float(3.14),
                TokenKind::Int(0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_then_property_access() {
        assert_eq!(
            kinds("rows[0].total"),
            vec![
                TokenKind::Ident("rows".into()),
                TokenKind::LBracket,
                TokenKind::Int(0),
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::Ident("total".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#""hello\nworld" 'it\'s'"#),
            vec![
                TokenKind::Str("hello\nworld".into()),
                TokenKind::Str("it's".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let const if else while return await query $meta _x"),
            vec![
                TokenKind::Let,
                TokenKind::Const,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Return,
                TokenKind::Await,
                TokenKind::Ident("query".into()),
                TokenKind::Ident("$meta".into()),
                TokenKind::Ident("_x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn var_is_let_and_undefined_is_null() {
        assert_eq!(
            kinds("var x undefined"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("x".into()),
                TokenKind::Null,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let source = "let a = 1 // trailing\n/* block\ncomment */ let b = 2";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Let,
                TokenKind::Ident("a".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Let,
                TokenKind::Ident("b".into()),
                TokenKind::Assign,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_rejected() {
        assert!(Lexer::new("\"oops").tokenize().is_err());
    }

    #[test]
    fn unterminated_comment_is_rejected() {
        assert!(Lexer::new("/* oops").tokenize().is_err());
    }
}
