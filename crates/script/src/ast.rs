//! Abstract syntax tree for parsed scripts.

use std::sync::Arc;

use crate::value::ScriptValue;

/// A parsed script: a sequence of statements executed top to bottom.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Top-level statements.
    pub stmts: Vec<Stmt>,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name = init` / `const name = init`
    Let {
        name: Arc<str>,
        mutable: bool,
        init: Expr,
    },

    /// `name = value` on an already-declared variable
    Assign { name: Arc<str>, value: Expr },

    /// `if (cond) { ... } else { ... }`
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },

    /// `while (cond) { ... }`
    While { cond: Expr, body: Vec<Stmt> },

    /// `return` / `return expr`, ending the script with a terminal value
    Return(Option<Expr>),

    /// A bare expression evaluated for its effects
    Expr(Expr),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value (scalars only; arrays and objects are built per
    /// evaluation so element expressions re-run)
    Literal(ScriptValue),

    /// Variable or binding reference
    Identifier(Arc<str>),

    /// Unary negation (`-expr`)
    Negate(Box<Expr>),

    /// Logical NOT (`!expr`)
    Not(Box<Expr>),

    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Property access (`object.name`)
    Property { object: Box<Expr>, name: Arc<str> },

    /// Index access (`object[index]`)
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Free call (`callee(args...)`); the callee resolves through the
    /// scope chain and capability bindings
    Call { callee: Arc<str>, args: Vec<Expr> },

    /// Method call (`object.method(args...)`)
    MethodCall {
        object: Box<Expr>,
        method: Arc<str>,
        args: Vec<Expr>,
    },

    /// `await expr`. Host calls complete before their value is observable,
    /// so this evaluates its operand
    Await(Box<Expr>),

    /// Ternary conditional (`cond ? a : b`)
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    /// Array literal
    Array(Vec<Expr>),

    /// Object literal; later duplicate keys win
    Object(Vec<(Arc<str>, Expr)>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Human-readable operator name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
