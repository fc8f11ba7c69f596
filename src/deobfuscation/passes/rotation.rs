//! Bounded simulator for string-array rotation functions.
//!
//! Obfuscators shuffle their string table at load time with a function like
//!
//! ```text
//! (function (arr, target) {
//!     while (true) {
//!         try {
//!             var check = parseInt(get(0x1a)) / 1 + -parseInt(get(0x1b)) / 2;
//!             if (check === target) break;
//!             else arr.push(arr.shift());
//!         } catch (e) {
//!             arr.push(arr.shift());
//!         }
//!     }
//! })(table, 0x3f2a1);
//! ```
//!
//! [`RotationSimulator`] executes such a function over a copy of the table. It
//! understands a deliberately small subset of the language: numeric and string
//! values, local variables and closures, update/arithmetic/comparison/logical
//! expressions, `parseInt`, calls to recognised accessor functions, `push` and
//! `shift` on the table, loops, `if`, `try/catch`, `break`, `continue` and
//! `return`. Anything else aborts the simulation with
//! [`Error::Unsupported`](crate::Error::Unsupported). Every executed statement
//! and function call costs one step; running out of steps aborts with
//! [`Error::StepLimit`](crate::Error::StepLimit). Nothing is ever executed for
//! real.

use std::{collections::HashMap, rc::Rc};

use swc_core::ecma::ast::{
    AssignOp, BinaryOp, CallExpr, Callee, Decl, Expr, Function, Lit, Pat, Stmt, UnaryOp,
    UpdateOp, VarDeclOrExpr,
};

use crate::{
    deobfuscation::passes::{
        constants::fold_numeric,
        utils::{
            as_ident, computed_index, member_name, method_call, number_to_js_string, parse_int,
            to_int32, unparen, AssignTargetProbe,
        },
    },
    Error, Result,
};

/// A recognised accessor: `get(i)` returns `table[i + delta]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accessor {
    /// Added to the numeric argument to form the table index.
    pub delta: f64,
    /// The parameter is subtracted from before anything is added to it, so a
    /// string argument is read as a number. Otherwise `+` would concatenate.
    pub coerces_strings: bool,
}

impl Accessor {
    /// Looks up the entry for argument `arg` in `table`.
    #[must_use]
    pub fn lookup<'t>(&self, table: &'t [String], arg: f64) -> Option<&'t String> {
        let index = arg + self.delta;
        if index.fract() != 0.0 || index < 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = index as usize;
        table.get(index)
    }
}

/// Outcome of a completed simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    /// The table after the rotation function returned.
    pub table: Vec<String>,
    /// Number of `push(shift())` operations performed.
    pub rotations: usize,
    /// Steps spent.
    pub steps: usize,
}

#[derive(Debug, Clone)]
enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    Undefined,
    Null,
    Table,
    Accessor(Accessor),
    Func(Rc<Function>),
}

enum Flow {
    Normal,
    Break(Option<String>),
    Continue(Option<String>),
    Return(Value),
}

enum Fault {
    Error(Error),
    Throw(Value),
}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        Fault::Error(err)
    }
}

type SimResult<T> = std::result::Result<T, Fault>;

fn unsupported<T>(what: impl Into<String>) -> SimResult<T> {
    Err(Fault::Error(Error::Unsupported(what.into())))
}

/// Executes rotation functions over a string table.
pub struct RotationSimulator<'a> {
    table_name: &'a str,
    table: Vec<String>,
    accessors: &'a HashMap<String, Accessor>,
    frames: Vec<HashMap<String, Value>>,
    max_steps: usize,
    steps: usize,
    rotations: usize,
}

impl<'a> RotationSimulator<'a> {
    /// Creates a simulator for the table declared as `table_name`.
    ///
    /// # Arguments
    ///
    /// * `table_name` - Name of the table at script level.
    /// * `table` - The table contents in declaration order.
    /// * `accessors` - Accessor functions callable from the rotation code, by name.
    /// * `max_steps` - Step budget.
    #[must_use]
    pub fn new(
        table_name: &'a str,
        table: Vec<String>,
        accessors: &'a HashMap<String, Accessor>,
        max_steps: usize,
    ) -> Self {
        Self {
            table_name,
            table,
            accessors,
            frames: Vec::new(),
            max_steps,
            steps: 0,
            rotations: 0,
        }
    }

    /// Runs `function` with the table as first argument and `count` as second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StepLimit`] when the budget runs out,
    /// [`Error::Unsupported`] for anything outside the supported subset
    /// (including an exception that escapes the function) and
    /// [`Error::Malformed`] if the table did not keep its length.
    pub fn run(mut self, function: &Function, count: f64) -> Result<Rotation> {
        let expected = self.table.len();
        match self.call(function, vec![Value::Table, Value::Num(count)]) {
            Ok(_) if self.table.len() != expected => Err(malformed_error!(
                "rotation of `{}` changed its length from {} to {}",
                self.table_name,
                expected,
                self.table.len()
            )),
            Ok(_) => Ok(Rotation {
                table: self.table,
                rotations: self.rotations,
                steps: self.steps,
            }),
            Err(Fault::Error(err)) => Err(err),
            Err(Fault::Throw(_)) => Err(Error::Unsupported(
                "rotation function threw an exception".to_string(),
            )),
        }
    }

    fn tick(&mut self) -> SimResult<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(Fault::Error(Error::StepLimit(self.max_steps)));
        }
        Ok(())
    }

    fn call(&mut self, function: &Function, args: Vec<Value>) -> SimResult<Value> {
        self.tick()?;
        if function.is_async || function.is_generator {
            return unsupported("async or generator function");
        }
        let Some(body) = &function.body else {
            return unsupported("function without body");
        };

        let mut frame = HashMap::new();
        let mut args = args.into_iter();
        for param in &function.params {
            let Pat::Ident(binding) = &param.pat else {
                return unsupported("destructuring parameter");
            };
            frame.insert(
                binding.id.sym.to_string(),
                args.next().unwrap_or(Value::Undefined),
            );
        }

        self.frames.push(frame);
        let flow = self.exec_block(&body.stmts);
        self.frames.pop();

        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
            Flow::Break(_) | Flow::Continue(_) => unsupported("break outside of a loop"),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> SimResult<Flow> {
        // Function declarations are hoisted.
        for stmt in stmts {
            if let Stmt::Decl(Decl::Fn(decl)) = stmt {
                self.declare(&decl.ident.sym, Value::Func(Rc::new((*decl.function).clone())));
            }
        }
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> SimResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Empty(_) | Stmt::Decl(Decl::Fn(_)) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.eval(&expr.expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Decl(Decl::Var(var)) => {
                for decl in &var.decls {
                    let Pat::Ident(binding) = &decl.name else {
                        return unsupported("destructuring declaration");
                    };
                    let value = match &decl.init {
                        Some(init) => self.eval(init)?,
                        None => Value::Undefined,
                    };
                    self.declare(&binding.id.sym, value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(block) => self.exec_block(&block.stmts),
            Stmt::If(if_stmt) => {
                if truthy(&self.eval(&if_stmt.test)?) {
                    self.exec(&if_stmt.cons)
                } else if let Some(alt) = &if_stmt.alt {
                    self.exec(alt)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(while_stmt) => self.run_loop(
                None,
                Some(&while_stmt.test),
                None,
                &while_stmt.body,
                false,
            ),
            Stmt::DoWhile(do_while) => {
                self.run_loop(None, Some(&do_while.test), None, &do_while.body, true)
            }
            Stmt::For(for_stmt) => {
                if let Some(init) = &for_stmt.init {
                    match init {
                        VarDeclOrExpr::VarDecl(var) => {
                            self.exec(&Stmt::Decl(Decl::Var(var.clone())))?;
                        }
                        VarDeclOrExpr::Expr(expr) => {
                            self.eval(expr)?;
                        }
                    }
                }
                self.run_loop(
                    None,
                    for_stmt.test.as_deref(),
                    for_stmt.update.as_deref(),
                    &for_stmt.body,
                    false,
                )
            }
            Stmt::Labeled(labeled) => {
                let label = labeled.label.sym.to_string();
                let flow = match &*labeled.body {
                    Stmt::While(w) => {
                        self.run_loop(Some(&label), Some(&w.test), None, &w.body, false)?
                    }
                    Stmt::DoWhile(d) => {
                        self.run_loop(Some(&label), Some(&d.test), None, &d.body, true)?
                    }
                    other => self.exec(other)?,
                };
                match flow {
                    Flow::Break(Some(l)) if l == label => Ok(Flow::Normal),
                    other => Ok(other),
                }
            }
            Stmt::Try(try_stmt) => {
                let result = self.exec_block(&try_stmt.block.stmts);
                let flow = match result {
                    Err(Fault::Throw(value)) => match &try_stmt.handler {
                        Some(handler) => {
                            let mut frame = HashMap::new();
                            if let Some(param) = &handler.param {
                                let Pat::Ident(binding) = param else {
                                    return unsupported("destructuring catch parameter");
                                };
                                frame.insert(binding.id.sym.to_string(), value);
                            }
                            self.frames.push(frame);
                            let flow = self.exec_block(&handler.body.stmts);
                            self.frames.pop();
                            flow
                        }
                        None => Err(Fault::Throw(value)),
                    },
                    other => other,
                };
                if let Some(finalizer) = &try_stmt.finalizer {
                    match self.exec_block(&finalizer.stmts)? {
                        Flow::Normal => {}
                        overriding => return Ok(overriding),
                    }
                }
                flow
            }
            Stmt::Break(brk) => Ok(Flow::Break(brk.label.as_ref().map(|l| l.sym.to_string()))),
            Stmt::Continue(cont) => Ok(Flow::Continue(
                cont.label.as_ref().map(|l| l.sym.to_string()),
            )),
            Stmt::Return(ret) => {
                let value = match &ret.arg {
                    Some(arg) => self.eval(arg)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(throw) => {
                let value = self.eval(&throw.arg)?;
                Err(Fault::Throw(value))
            }
            _ => unsupported("statement outside the rotation subset"),
        }
    }

    fn run_loop(
        &mut self,
        label: Option<&str>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        test_after: bool,
    ) -> SimResult<Flow> {
        let mut first = true;
        loop {
            self.tick()?;
            if !(test_after && first) {
                if let Some(test) = test {
                    if !truthy(&self.eval(test)?) {
                        return Ok(Flow::Normal);
                    }
                }
            }
            first = false;

            match self.exec(body)? {
                Flow::Normal => {}
                Flow::Break(None) => return Ok(Flow::Normal),
                Flow::Continue(None) => {}
                Flow::Continue(Some(l)) if Some(l.as_str()) == label => {}
                other => return Ok(other),
            }

            if let Some(update) = update {
                self.eval(update)?;
            }
        }
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> SimResult<()> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        unsupported(format!("assignment to global `{name}`"))
    }

    fn lookup(&self, name: &str) -> SimResult<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Ok(value.clone());
            }
        }
        if name == self.table_name {
            return Ok(Value::Table);
        }
        if let Some(accessor) = self.accessors.get(name) {
            return Ok(Value::Accessor(*accessor));
        }
        match name {
            "undefined" => Ok(Value::Undefined),
            "NaN" => Ok(Value::Num(f64::NAN)),
            "Infinity" => Ok(Value::Num(f64::INFINITY)),
            _ => unsupported(format!("reference to unknown global `{name}`")),
        }
    }

    fn eval(&mut self, expr: &Expr) -> SimResult<Value> {
        match expr {
            Expr::Paren(paren) => self.eval(&paren.expr),
            Expr::Lit(Lit::Num(num)) => Ok(Value::Num(num.value)),
            Expr::Lit(Lit::Str(s)) => Ok(Value::Str(s.value.to_string())),
            Expr::Lit(Lit::Bool(b)) => Ok(Value::Bool(b.value)),
            Expr::Lit(Lit::Null(_)) => Ok(Value::Null),
            Expr::Ident(id) => self.lookup(&id.sym),
            Expr::Fn(fn_expr) => Ok(Value::Func(Rc::new((*fn_expr.function).clone()))),
            Expr::Seq(seq) => {
                let mut last = Value::Undefined;
                for e in &seq.exprs {
                    last = self.eval(e)?;
                }
                Ok(last)
            }
            Expr::Cond(cond) => {
                if truthy(&self.eval(&cond.test)?) {
                    self.eval(&cond.cons)
                } else {
                    self.eval(&cond.alt)
                }
            }
            Expr::Unary(unary) => {
                let value = self.eval(&unary.arg)?;
                match unary.op {
                    UnaryOp::Minus => Ok(Value::Num(-to_number(&value))),
                    UnaryOp::Plus => Ok(Value::Num(to_number(&value))),
                    UnaryOp::Bang => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Tilde => Ok(Value::Num(f64::from(!to_int32(to_number(&value))))),
                    UnaryOp::Void => Ok(Value::Undefined),
                    _ => unsupported("unary operator outside the rotation subset"),
                }
            }
            Expr::Update(update) => {
                let Some(name) = as_ident(&update.arg) else {
                    return unsupported("update of a non-variable");
                };
                let name = name.to_string();
                let old = to_number(&self.lookup(&name)?);
                let new = match update.op {
                    UpdateOp::PlusPlus => old + 1.0,
                    UpdateOp::MinusMinus => old - 1.0,
                };
                self.assign(&name, Value::Num(new))?;
                Ok(Value::Num(if update.prefix { new } else { old }))
            }
            Expr::Bin(bin) => match bin.op {
                BinaryOp::LogicalAnd => {
                    let left = self.eval(&bin.left)?;
                    if truthy(&left) {
                        self.eval(&bin.right)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::LogicalOr => {
                    let left = self.eval(&bin.left)?;
                    if truthy(&left) {
                        Ok(left)
                    } else {
                        self.eval(&bin.right)
                    }
                }
                op => {
                    let left = self.eval(&bin.left)?;
                    let right = self.eval(&bin.right)?;
                    binary(op, &left, &right)
                }
            },
            Expr::Assign(assign) => {
                let probe = AssignTargetProbe::of(assign);
                let Some(name) = probe.simple_name().map(str::to_string) else {
                    return unsupported("assignment to a non-variable");
                };
                let right = self.eval(&assign.right)?;
                let value = match assign.op {
                    AssignOp::Assign => right,
                    AssignOp::AddAssign => binary(BinaryOp::Add, &self.lookup(&name)?, &right)?,
                    AssignOp::SubAssign => binary(BinaryOp::Sub, &self.lookup(&name)?, &right)?,
                    AssignOp::MulAssign => binary(BinaryOp::Mul, &self.lookup(&name)?, &right)?,
                    AssignOp::DivAssign => binary(BinaryOp::Div, &self.lookup(&name)?, &right)?,
                    _ => return unsupported("compound assignment outside the rotation subset"),
                };
                self.assign(&name, value.clone())?;
                Ok(value)
            }
            Expr::Member(member) => {
                let object = self.eval(&member.obj)?;
                if !matches!(object, Value::Table) {
                    return unsupported("member access on a non-table value");
                }
                if let Some("length") = member_name(member) {
                    return Ok(self.table_len());
                }
                match computed_index(member) {
                    Some(index) => {
                        let index = match self.eval(index)? {
                            Value::Str(key) => key_index(&key).unwrap_or(f64::NAN),
                            other => to_number(&other),
                        };
                        let accessor = Accessor {
                            delta: 0.0,
                            coerces_strings: false,
                        };
                        Ok(accessor
                            .lookup(&self.table, index)
                            .map_or(Value::Undefined, |s| Value::Str(s.clone())))
                    }
                    None => unsupported("table property outside the rotation subset"),
                }
            }
            Expr::Call(call) => self.eval_call(call),
            _ => unsupported("expression outside the rotation subset"),
        }
    }

    fn eval_call(&mut self, call: &CallExpr) -> SimResult<Value> {
        if let Some((object, method)) = method_call(call) {
            if matches!(self.eval(object)?, Value::Table) {
                return self.table_method(method, call);
            }
            return unsupported(format!("call of method `{method}`"));
        }

        let Callee::Expr(callee) = &call.callee else {
            return unsupported("super or import call");
        };
        let callee = match unparen(callee) {
            Expr::Ident(id) if &*id.sym == "parseInt" => {
                let text = match call.args.first() {
                    Some(arg) => to_js_string(&self.eval(&arg.expr)?),
                    None => "undefined".to_string(),
                };
                let radix = match call.args.get(1) {
                    Some(arg) => Some(to_int32(to_number(&self.eval(&arg.expr)?))),
                    None => None,
                };
                #[allow(clippy::cast_sign_loss)]
                let radix = radix.filter(|r| *r != 0).map(|r| r as u32);
                return Ok(Value::Num(parse_int(&text, radix)));
            }
            other => self.eval(other)?,
        };

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            if arg.spread.is_some() {
                return unsupported("spread argument");
            }
            args.push(self.eval(&arg.expr)?);
        }

        match callee {
            Value::Func(function) => self.call(&function, args),
            Value::Accessor(accessor) => {
                self.tick()?;
                let index = match args.first() {
                    Some(Value::Str(_)) if !accessor.coerces_strings => {
                        return unsupported("string argument to a concatenating accessor")
                    }
                    arg => arg.map_or(f64::NAN, to_number),
                };
                Ok(accessor
                    .lookup(&self.table, index)
                    .map_or(Value::Undefined, |s| Value::Str(s.clone())))
            }
            _ => Err(Fault::Throw(Value::Str("TypeError: not a function".into()))),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn table_len(&self) -> Value {
        Value::Num(self.table.len() as f64)
    }

    fn table_method(
        &mut self,
        method: &str,
        call: &CallExpr,
    ) -> SimResult<Value> {
        match method {
            "shift" if call.args.is_empty() => {
                if self.table.is_empty() {
                    return Ok(Value::Undefined);
                }
                Ok(Value::Str(self.table.remove(0)))
            }
            "push" if call.args.len() == 1 => {
                let is_rotation = matches!(
                    unparen(&call.args[0].expr),
                    Expr::Call(inner) if method_call(inner).is_some_and(|(_, m)| m == "shift")
                );
                match self.eval(&call.args[0].expr)? {
                    Value::Str(s) => {
                        self.table.push(s);
                        if is_rotation {
                            self.rotations += 1;
                        }
                        Ok(self.table_len())
                    }
                    _ => unsupported("push of a non-string value"),
                }
            }
            other => unsupported(format!("table method `{other}`")),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        Value::Undefined | Value::Null => false,
        Value::Table | Value::Accessor(_) | Value::Func(_) => true,
    }
}

/// `ToNumber` for the supported values.
fn to_number(value: &Value) -> f64 {
    match value {
        Value::Num(n) => *n,
        Value::Str(s) => string_to_number(s),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::Undefined | Value::Table | Value::Accessor(_) | Value::Func(_) => f64::NAN,
    }
}

/// The array index a string property key names, if it is in canonical form.
#[must_use]
pub fn key_index(key: &str) -> Option<f64> {
    let value = string_to_number(key);
    (number_to_js_string(value).as_deref() == Some(key)).then_some(value)
}

/// `ToNumber` applied to a string.
#[must_use]
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) =>
        {
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

fn to_js_string(value: &Value) -> String {
    match value {
        Value::Num(n) if n.is_nan() => "NaN".to_string(),
        Value::Num(n) if n.is_infinite() => {
            if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        }
        Value::Num(n) => number_to_js_string(*n).unwrap_or_else(|| n.to_string()),
        Value::Str(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Table | Value::Accessor(_) | Value::Func(_) => "[object]".to_string(),
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Table, Value::Table) => true,
        _ => false,
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Num(_), Value::Str(_) | Value::Bool(_))
        | (Value::Str(_) | Value::Bool(_), Value::Num(_))
        | (Value::Bool(_), Value::Str(_))
        | (Value::Str(_), Value::Bool(_)) => to_number(left) == to_number(right),
        _ => strict_equals(left, right),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> SimResult<Value> {
    let value = match op {
        BinaryOp::Add => {
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                return Ok(Value::Str(format!(
                    "{}{}",
                    to_js_string(left),
                    to_js_string(right)
                )));
            }
            Value::Num(to_number(left) + to_number(right))
        }
        BinaryOp::EqEqEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::NotEqEq => Value::Bool(!strict_equals(left, right)),
        BinaryOp::EqEq => Value::Bool(loose_equals(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(left, right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        other => match fold_numeric(other, to_number(left), to_number(right)) {
            Some(n) => Value::Num(n),
            None => return unsupported("binary operator outside the rotation subset"),
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use swc_core::ecma::ast::{Expr, Stmt};

    use super::*;
    use crate::source::SyntaxTree;

    /// Parses `(function (...) {...})(table, n);` and returns the function and `n`.
    fn rotation_function(source: &str) -> (Function, f64) {
        let tree = SyntaxTree::parse(source).unwrap();
        let Stmt::Expr(stmt) = &tree.script().body[0] else {
            panic!("expected expression statement");
        };
        let Expr::Call(call) = unparen(&stmt.expr) else {
            panic!("expected call");
        };
        let Callee::Expr(callee) = &call.callee else {
            panic!("expected callee");
        };
        let Expr::Fn(function) = unparen(callee) else {
            panic!("expected function");
        };
        let Expr::Lit(Lit::Num(n)) = &*call.args[1].expr else {
            panic!("expected count");
        };
        ((*function.function).clone(), n.value)
    }

    fn table(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_counted_rotation() {
        let (function, count) = rotation_function(
            "(function (a, n) { while (--n) { a.push(a.shift()); } })(t, 3);",
        );
        let accessors = HashMap::new();
        let rotation = RotationSimulator::new("t", table(&["a", "b", "c", "d"]), &accessors, 10_000)
            .run(&function, count)
            .unwrap();
        assert_eq!(rotation.table, table(&["c", "d", "a", "b"]));
        assert_eq!(rotation.rotations, 2);
    }

    #[test]
    fn test_checksum_rotation_with_accessor() {
        // Rotates until get(0) parses to 2.
        let (function, count) = rotation_function(
            r#"(function (arr, target) {
                while (true) {
                    try {
                        var v = parseInt(get(0x10));
                        if (v === target) break;
                        else arr['push'](arr['shift']());
                    } catch (e) {
                        arr['push'](arr['shift']());
                    }
                }
            })(t, 2);"#,
        );
        let mut accessors = HashMap::new();
        accessors.insert(
            "get".to_string(),
            Accessor {
                delta: -16.0,
                coerces_strings: true,
            },
        );
        let rotation =
            RotationSimulator::new("t", table(&["1x", "junk", "2y", "3z"]), &accessors, 10_000)
                .run(&function, count)
                .unwrap();
        assert_eq!(rotation.table, table(&["2y", "3z", "1x", "junk"]));
        assert_eq!(rotation.rotations, 2);
    }

    #[test]
    fn test_step_limit() {
        let (function, count) = rotation_function(
            "(function (a, n) { while (true) { a.push(a.shift()); } })(t, 0);",
        );
        let accessors = HashMap::new();
        let err = RotationSimulator::new("t", table(&["a", "b"]), &accessors, 500)
            .run(&function, count)
            .unwrap_err();
        assert!(matches!(err, Error::StepLimit(500)));
    }

    #[test]
    fn test_unknown_global_is_unsupported() {
        let (function, count) = rotation_function(
            "(function (a, n) { while (--n) { a.push(a.shift()); atob(a[0]); } })(t, 3);",
        );
        let accessors = HashMap::new();
        let err = RotationSimulator::new("t", table(&["a", "b"]), &accessors, 10_000)
            .run(&function, count)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_growing_table_is_malformed() {
        let (function, count) =
            rotation_function("(function (a, n) { a.push(a.shift()); a.push('extra'); })(t, 1);");
        let accessors = HashMap::new();
        let err = RotationSimulator::new("t", table(&["a", "b"]), &accessors, 10_000)
            .run(&function, count)
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("0x1b"), 27.0);
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_key_index_requires_canonical_form() {
        assert_eq!(key_index("2"), Some(2.0));
        assert_eq!(key_index("0x2"), None);
        assert_eq!(key_index("02"), None);
    }
}
