//! # Quasar Script
//!
//! The sandboxed script language uploaded scripts are written in: a small
//! JavaScript-flavoured statement language whose only connection to the
//! outside world is the set of host objects installed in its root scope.
//!
//! The pipeline is conventional: [`lexer::Lexer`] turns source into tokens,
//! [`parser::Parser`] builds a statement AST with precedence climbing, and
//! [`eval::Interpreter`] walks the AST asynchronously, dispatching calls on
//! [`value::HostObject`] handles. The interpreter enforces a recursion-depth
//! cap and checks a wall-clock deadline on a fixed step interval, so a tight
//! loop cannot outrun the executor's hard abort.

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod value;

pub use ast::{BinaryOp, Expr, Program, Stmt};
pub use error::{ScriptError, ScriptResult};
pub use eval::{Bindings, Interpreter};
pub use value::{HostHandle, HostObject, ScriptValue};

/// Parse script source into a program.
pub fn parse(source: &str) -> ScriptResult<Program> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse()
}
