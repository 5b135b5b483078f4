//! Async AST evaluation.
//!
//! The interpreter walks the program statement by statement, resolving
//! identifiers through its scope chain and then through the capability
//! bindings; anything else is an [`ScriptError::UnknownBinding`]. Host
//! calls are awaited in place, so the evaluator is the execution's single
//! logical unit of work.
//!
//! Preemption: the executor aborts the worker task at its wall-clock limit,
//! which takes effect at the next await point. To keep a tight loop from
//! outrunning that, the interpreter counts evaluation steps and, every
//! [`DEADLINE_CHECK_INTERVAL`] steps, checks the deadline itself and yields
//! to the scheduler.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::ast::{BinaryOp, Expr, Program, Stmt};
use crate::error::{ScriptError, ScriptResult};
use crate::value::ScriptValue;

/// Maximum expression nesting the evaluator will follow.
const MAX_RECURSION_DEPTH: usize = 64;

/// Evaluation steps between deadline checks and scheduler yields.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// The names installed in a script's root scope.
///
/// One bindings set is built per execution and never shared; a handle in
/// here captures that execution's own connection and log sink only.
#[derive(Default)]
pub struct Bindings {
    entries: IndexMap<String, ScriptValue>,
}

impl Bindings {
    /// An empty bindings set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a named binding.
    pub fn insert(&mut self, name: impl Into<String>, value: ScriptValue) {
        self.entries.insert(name.into(), value);
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.entries.get(name)
    }

    /// The installed names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

struct Variable {
    value: ScriptValue,
    mutable: bool,
}

/// How a statement sequence ended.
enum Flow {
    Normal,
    Return(ScriptValue),
}

/// One-shot interpreter for a single execution.
pub struct Interpreter {
    bindings: Bindings,
    scopes: Vec<HashMap<String, Variable>>,
    deadline: Instant,
    steps: u64,
}

impl Interpreter {
    /// Create an interpreter with the given root bindings and wall-clock
    /// deadline.
    #[must_use]
    pub fn new(bindings: Bindings, deadline: Instant) -> Self {
        Self {
            bindings,
            scopes: Vec::new(),
            deadline,
            steps: 0,
        }
    }

    /// Run the program to completion.
    ///
    /// Returns the explicit `return` value, or `None` when the script fell
    /// off the end without one.
    pub async fn run(mut self, program: &Program) -> ScriptResult<Option<ScriptValue>> {
        tracing::trace!(statements = program.stmts.len(), "running script");
        match self.exec_block(&program.stmts).await? {
            Flow::Return(value) => Ok(Some(value)),
            Flow::Normal => Ok(None),
        }
    }

    /// Count a step; periodically check the deadline and yield.
    async fn tick(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            if Instant::now() >= self.deadline {
                return Err(ScriptError::DeadlineExceeded);
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn exec_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, ScriptResult<Flow>> {
        Box::pin(async move {
            self.scopes.push(HashMap::new());
            let result = self.exec_stmts(stmts).await;
            self.scopes.pop();
            result
        })
    }

    async fn exec_stmts(&mut self, stmts: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in stmts {
            match stmt {
                Stmt::Let {
                    name,
                    mutable,
                    init,
                } => {
                    let value = self.eval(init, 0).await?;
                    let scope = self.scopes.last_mut().expect("scope stack is never empty");
                    if scope.contains_key(&**name) {
                        return Err(ScriptError::runtime(format!(
                            "'{name}' has already been declared"
                        )));
                    }
                    scope.insert(
                        name.to_string(),
                        Variable {
                            value,
                            mutable: *mutable,
                        },
                    );
                }

                Stmt::Assign { name, value } => {
                    let value = self.eval(value, 0).await?;
                    self.assign(name, value)?;
                }

                Stmt::If {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let taken = if self.eval(cond, 0).await?.is_truthy() {
                        Some(then_block)
                    } else {
                        else_block.as_ref()
                    };
                    if let Some(block) = taken {
                        if let Flow::Return(value) = self.exec_block(block).await? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }

                Stmt::While { cond, body } => {
                    while self.eval(cond, 0).await?.is_truthy() {
                        self.tick().await?;
                        if let Flow::Return(value) = self.exec_block(body).await? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }

                Stmt::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, 0).await?,
                        None => ScriptValue::Null,
                    };
                    return Ok(Flow::Return(value));
                }

                Stmt::Expr(expr) => {
                    self.eval(expr, 0).await?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, name: &str, value: ScriptValue) -> ScriptResult<()> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(variable) = scope.get_mut(name) {
                if !variable.mutable {
                    return Err(ScriptError::runtime(format!(
                        "assignment to constant '{name}'"
                    )));
                }
                variable.value = value;
                return Ok(());
            }
        }
        Err(ScriptError::runtime(format!(
            "assignment to undeclared variable '{name}'"
        )))
    }

    fn lookup(&self, name: &str) -> Option<&ScriptValue> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).map(|v| &v.value))
            .or_else(|| self.bindings.get(name))
    }

    fn eval<'a>(
        &'a mut self,
        expr: &'a Expr,
        depth: usize,
    ) -> BoxFuture<'a, ScriptResult<ScriptValue>> {
        Box::pin(async move {
            self.tick().await?;
            if depth > MAX_RECURSION_DEPTH {
                return Err(ScriptError::runtime(format!(
                    "expression nesting exceeds {MAX_RECURSION_DEPTH} levels"
                )));
            }

            match expr {
                Expr::Literal(value) => Ok(value.clone()),

                Expr::Identifier(name) => self.lookup(name).cloned().ok_or_else(|| {
                    tracing::debug!(name = %name, "script referenced a name outside its binding");
                    ScriptError::UnknownBinding(name.to_string())
                }),

                Expr::Negate(inner) => match self.eval(inner, depth + 1).await? {
                    ScriptValue::Int(n) => Ok(ScriptValue::Int(-n)),
                    ScriptValue::Float(n) => Ok(ScriptValue::Float(-n)),
                    other => Err(type_error("number", &other)),
                },

                Expr::Not(inner) => {
                    let value = self.eval(inner, depth + 1).await?;
                    Ok(ScriptValue::Bool(!value.is_truthy()))
                }

                Expr::Binary { left, op, right } => {
                    // && and || short-circuit and yield the operand itself
                    match op {
                        BinaryOp::And => {
                            let lhs = self.eval(left, depth + 1).await?;
                            if lhs.is_truthy() {
                                self.eval(right, depth + 1).await
                            } else {
                                Ok(lhs)
                            }
                        }
                        BinaryOp::Or => {
                            let lhs = self.eval(left, depth + 1).await?;
                            if lhs.is_truthy() {
                                Ok(lhs)
                            } else {
                                self.eval(right, depth + 1).await
                            }
                        }
                        _ => {
                            let lhs = self.eval(left, depth + 1).await?;
                            let rhs = self.eval(right, depth + 1).await?;
                            apply_binary(*op, &lhs, &rhs)
                        }
                    }
                }

                Expr::Property { object, name } => {
                    let object = self.eval(object, depth + 1).await?;
                    access_property(&object, name)
                }

                Expr::Index { object, index } => {
                    let object = self.eval(object, depth + 1).await?;
                    let index = self.eval(index, depth + 1).await?;
                    access_index(&object, &index)
                }

                Expr::Call { callee, args } => {
                    let target = self
                        .lookup(callee)
                        .cloned()
                        .ok_or_else(|| ScriptError::UnknownBinding(callee.to_string()))?;
                    let args = self.eval_args(args, depth).await?;
                    match target {
                        ScriptValue::Handle(handle) => handle.invoke(args).await,
                        other => Err(ScriptError::runtime(format!(
                            "'{callee}' is not a function (found {})",
                            other.type_name()
                        ))),
                    }
                }

                Expr::MethodCall {
                    object,
                    method,
                    args,
                } => {
                    let object = self.eval(object, depth + 1).await?;
                    let args = self.eval_args(args, depth).await?;
                    match object {
                        ScriptValue::Handle(handle) => handle.call_method(method, args).await,
                        ScriptValue::Object(map) => match map.get(&**method) {
                            Some(ScriptValue::Handle(handle)) => handle.invoke(args).await,
                            Some(other) => Err(ScriptError::runtime(format!(
                                ".{method} is not a function (found {})",
                                other.type_name()
                            ))),
                            None => Err(ScriptError::runtime(format!(
                                ".{method} is not a function"
                            ))),
                        },
                        ScriptValue::Null => Err(ScriptError::runtime(format!(
                            "cannot call '{method}' on null"
                        ))),
                        other => Err(ScriptError::runtime(format!(
                            "{} has no method '{method}'",
                            other.type_name()
                        ))),
                    }
                }

                Expr::Await(inner) => self.eval(inner, depth + 1).await,

                Expr::Ternary {
                    cond,
                    then_expr,
                    else_expr,
                } => {
                    if self.eval(cond, depth + 1).await?.is_truthy() {
                        self.eval(then_expr, depth + 1).await
                    } else {
                        self.eval(else_expr, depth + 1).await
                    }
                }

                Expr::Array(elements) => {
                    let mut values = Vec::with_capacity(elements.len());
                    for element in elements {
                        values.push(self.eval(element, depth + 1).await?);
                    }
                    Ok(ScriptValue::Array(values))
                }

                Expr::Object(pairs) => {
                    let mut map = IndexMap::with_capacity(pairs.len());
                    for (key, expr) in pairs {
                        let value = self.eval(expr, depth + 1).await?;
                        map.insert(key.to_string(), value);
                    }
                    Ok(ScriptValue::Object(map))
                }
            }
        })
    }

    async fn eval_args(&mut self, args: &[Expr], depth: usize) -> ScriptResult<Vec<ScriptValue>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, depth + 1).await?);
        }
        Ok(values)
    }
}

fn type_error(expected: &str, found: &ScriptValue) -> ScriptError {
    ScriptError::runtime(format!("expected {expected}, found {}", found.type_name()))
}

fn access_property(object: &ScriptValue, name: &str) -> ScriptResult<ScriptValue> {
    match object {
        ScriptValue::Object(map) => Ok(map.get(name).cloned().unwrap_or(ScriptValue::Null)),
        ScriptValue::Array(items) if name == "length" => Ok(ScriptValue::Int(items.len() as i64)),
        ScriptValue::Str(s) if name == "length" => Ok(ScriptValue::Int(s.chars().count() as i64)),
        ScriptValue::Handle(handle) => Ok(handle.get_property(name).unwrap_or(ScriptValue::Null)),
        ScriptValue::Null => Err(ScriptError::runtime(format!(
            "cannot read property '{name}' of null"
        ))),
        _ => Ok(ScriptValue::Null),
    }
}

fn access_index(object: &ScriptValue, index: &ScriptValue) -> ScriptResult<ScriptValue> {
    match (object, index) {
        (ScriptValue::Array(items), idx) => {
            let Some(idx) = idx.as_int() else {
                return Err(type_error("array index", idx));
            };
            let idx = usize::try_from(idx).ok();
            Ok(idx
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(ScriptValue::Null))
        }
        (ScriptValue::Object(map), ScriptValue::Str(key)) => {
            Ok(map.get(key).cloned().unwrap_or(ScriptValue::Null))
        }
        (ScriptValue::Null, _) => Err(ScriptError::runtime("cannot index null")),
        (other, _) => Err(ScriptError::runtime(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

#[allow(clippy::float_cmp)]
fn apply_binary(op: BinaryOp, lhs: &ScriptValue, rhs: &ScriptValue) -> ScriptResult<ScriptValue> {
    use ScriptValue::{Float, Int, Str};

    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Int(a), Int(b)) => Ok(Int(a + b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
            (Float(a), Float(b)) => Ok(Float(a + b)),
            (Str(_), _) | (_, Str(_)) => Ok(Str(format!("{}{}", lhs.render(), rhs.render()))),
            _ => Err(ScriptError::runtime(format!(
                "cannot add {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },

        BinaryOp::Sub => match numeric_pair(lhs, rhs, op)? {
            NumericPair::Ints(a, b) => Ok(Int(a - b)),
            NumericPair::Floats(a, b) => Ok(Float(a - b)),
        },

        BinaryOp::Mul => match numeric_pair(lhs, rhs, op)? {
            NumericPair::Ints(a, b) => Ok(Int(a * b)),
            NumericPair::Floats(a, b) => Ok(Float(a * b)),
        },

        BinaryOp::Div => match numeric_pair(lhs, rhs, op)? {
            NumericPair::Ints(_, 0) => Err(ScriptError::runtime("division by zero")),
            // exact integer division stays integral, like `6 / 2`
            NumericPair::Ints(a, b) if a % b == 0 => Ok(Int(a / b)),
            NumericPair::Ints(a, b) => Ok(Float(a as f64 / b as f64)),
            NumericPair::Floats(_, b) if b == 0.0 => {
                Err(ScriptError::runtime("division by zero"))
            }
            NumericPair::Floats(a, b) => Ok(Float(a / b)),
        },

        BinaryOp::Rem => match numeric_pair(lhs, rhs, op)? {
            NumericPair::Ints(_, 0) => Err(ScriptError::runtime("division by zero")),
            NumericPair::Ints(a, b) => Ok(Int(a % b)),
            NumericPair::Floats(_, b) if b == 0.0 => {
                Err(ScriptError::runtime("division by zero"))
            }
            NumericPair::Floats(a, b) => Ok(Float(a % b)),
        },

        BinaryOp::Eq => Ok(ScriptValue::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(ScriptValue::Bool(lhs != rhs)),

        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Float(a), Float(b)) => a.partial_cmp(b),
                (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
                (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
                (Str(a), Str(b)) => a.partial_cmp(b),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ScriptError::runtime(format!(
                    "cannot compare {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Le => ordering.is_le(),
                _ => ordering.is_ge(),
            };
            Ok(ScriptValue::Bool(result))
        }

        BinaryOp::And | BinaryOp::Or => {
            unreachable!("short-circuit operators are handled in eval")
        }
    }
}

/// Numeric operands normalized to a common representation.
enum NumericPair {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numeric_pair(
    lhs: &ScriptValue,
    rhs: &ScriptValue,
    op: BinaryOp,
) -> ScriptResult<NumericPair> {
    use ScriptValue::{Float, Int};

    match (lhs, rhs) {
        (Int(a), Int(b)) => Ok(NumericPair::Ints(*a, *b)),
        (Float(a), Float(b)) => Ok(NumericPair::Floats(*a, *b)),
        (Int(a), Float(b)) => Ok(NumericPair::Floats(*a as f64, *b)),
        (Float(a), Int(b)) => Ok(NumericPair::Floats(*a, *b as f64)),
        _ => Err(ScriptError::runtime(format!(
            "cannot apply '{op}' to {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}
