//! Recursive descent parser with precedence climbing for operators.

use std::sync::Arc;

use crate::ast::{BinaryOp, Expr, Program, Stmt};
use crate::error::{ScriptError, ScriptResult};
use crate::token::{Token, TokenKind};
use crate::value::ScriptValue;

/// Parser for converting tokens into a program AST.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a parser over a token stream.
    #[must_use]
    pub const fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into a program.
    pub fn parse(mut self) -> ScriptResult<Program> {
        let mut stmts = Vec::new();
        self.skip_semicolons();
        while self.current() != &TokenKind::Eof {
            stmts.push(self.parse_stmt()?);
            self.skip_semicolons();
        }
        Ok(Program { stmts })
    }

    // -- statements ---------------------------------------------------------

    fn parse_stmt(&mut self) -> ScriptResult<Stmt> {
        match self.current() {
            TokenKind::Let => self.parse_declaration(true),
            TokenKind::Const => self.parse_declaration(false),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => {
                self.advance();
                let value = if matches!(
                    self.current(),
                    TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Return(value))
            }
            TokenKind::Ident(_) if self.peek() == &TokenKind::Assign => {
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::Assign { name, value })
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_declaration(&mut self, mutable: bool) -> ScriptResult<Stmt> {
        self.advance(); // let / const
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Assign)?;
        let init = self.parse_expr()?;
        Ok(Stmt::Let {
            name,
            mutable,
            init,
        })
    }

    fn parse_if(&mut self) -> ScriptResult<Stmt> {
        self.advance(); // if
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let then_block = self.parse_block()?;

        let else_block = if self.matches(&TokenKind::Else) {
            if self.current() == &TokenKind::If {
                // else-if chain nests as a single-statement else block
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_while(&mut self) -> ScriptResult<Stmt> {
        self.advance(); // while
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        self.skip_semicolons();
        while self.current() != &TokenKind::RBrace {
            if self.current() == &TokenKind::Eof {
                return Err(ScriptError::syntax("unexpected end of script in block"));
            }
            stmts.push(self.parse_stmt()?);
            self.skip_semicolons();
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> ScriptResult<Expr> {
        let cond = self.parse_binary(0)?;
        if self.matches(&TokenKind::Question) {
            let then_expr = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let else_expr = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> ScriptResult<Expr> {
        let mut left = self.parse_unary()?;

        while self.current().is_binary_operator() {
            let precedence = self.current().precedence();
            if precedence < min_precedence {
                break;
            }

            let op = match self.current() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::AndAnd => BinaryOp::And,
                TokenKind::OrOr => BinaryOp::Or,
                other => {
                    return Err(ScriptError::syntax(format!("unexpected operator {other}")));
                }
            };
            self.advance();

            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        match self.current() {
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Negate(Box::new(self.parse_unary()?)))
            }
            TokenKind::Not => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            TokenKind::Await => {
                self.advance();
                Ok(Expr::Await(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    if self.current() == &TokenKind::LParen {
                        let args = self.parse_args()?;
                        expr = Expr::MethodCall {
                            object: Box::new(expr),
                            method: name,
                            args,
                        };
                    } else {
                        expr = Expr::Property {
                            object: Box::new(expr),
                            name,
                        };
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        match self.current().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Literal(ScriptValue::Int(n)))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::Literal(ScriptValue::Float(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(ScriptValue::Str(s)))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(Expr::Literal(ScriptValue::Bool(b)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(ScriptValue::Null))
            }

            TokenKind::Ident(name) => {
                self.advance();
                if self.current() == &TokenKind::LParen {
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        callee: Arc::from(name),
                        args,
                    })
                } else {
                    Ok(Expr::Identifier(Arc::from(name)))
                }
            }

            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }

            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if self.current() != &TokenKind::RBracket {
                    loop {
                        elements.push(self.parse_expr()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::Array(elements))
            }

            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if self.current() != &TokenKind::RBrace {
                    loop {
                        let key: Arc<str> = match self.current().clone() {
                            TokenKind::Ident(name) => {
                                self.advance();
                                Arc::from(name)
                            }
                            TokenKind::Str(s) => {
                                self.advance();
                                Arc::from(s)
                            }
                            other => {
                                return Err(ScriptError::syntax(format!(
                                    "expected object key, found {other}"
                                )));
                            }
                        };

                        // `{users}` shorthand for `{users: users}`
                        let value = if self.matches(&TokenKind::Colon) {
                            self.parse_expr()?
                        } else {
                            Expr::Identifier(Arc::clone(&key))
                        };
                        pairs.push((key, value));

                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Ok(Expr::Object(pairs))
            }

            other => Err(ScriptError::syntax(format!("unexpected token {other}"))),
        }
    }

    fn parse_args(&mut self) -> ScriptResult<Vec<Expr>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.current() != &TokenKind::RParen {
            loop {
                args.push(self.parse_expr()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    // -- cursor helpers -----------------------------------------------------

    fn current(&self) -> &TokenKind {
        self.tokens
            .get(self.position)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.position + 1)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn matches(&mut self, expected: &TokenKind) -> bool {
        if self.current() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> ScriptResult<()> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(ScriptError::syntax(format!(
                "expected {expected}, found {}",
                self.current()
            )))
        }
    }

    fn expect_ident(&mut self) -> ScriptResult<Arc<str>> {
        if let TokenKind::Ident(name) = self.current() {
            let name = Arc::from(name.as_str());
            self.advance();
            Ok(name)
        } else {
            Err(ScriptError::syntax(format!(
                "expected identifier, found {}",
                self.current()
            )))
        }
    }

    fn skip_semicolons(&mut self) {
        while self.matches(&TokenKind::Semicolon) {}
    }
}
