use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::syntax::{BinOp, CallExpr, Expr, FunctionDef, Program, Rhs, Stmt, StmtKind};
use super::value::{DemoRef, DemoValue};
use super::DemoContext;
use crate::runtime::{ContextRef, DebugException};
use crate::suspend::SuspendCoordinator;

const RUNTIME_ERROR: &str = "RuntimeError";

/// Evaluate `expr` with `lookup` resolving variable names. Never runs calls,
/// so it is safe to use from the session thread against a suspended frame.
pub(super) fn evaluate(expr: &Expr, lookup: &dyn Fn(&str) -> Option<DemoRef>) -> Result<DemoRef, String> {
    let value = match expr {
        Expr::Null => DemoValue::Null,
        Expr::Bool(b) => DemoValue::Bool(*b),
        Expr::Int(n) => DemoValue::Int(*n),
        Expr::Float(f) => DemoValue::Float(*f),
        Expr::Str(s) => DemoValue::Str(s.clone()),
        Expr::Var(name) => return lookup(name).ok_or_else(|| format!("{name} is not defined")),
        Expr::List(items) => DemoValue::List(
            items
                .iter()
                .map(|item| evaluate(item, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Record(fields) => DemoValue::Record(
            fields
                .iter()
                .map(|(key, value)| Ok((key.clone(), evaluate(value, lookup)?)))
                .collect::<Result<_, String>>()?,
        ),
        Expr::Table(columns, rows) => DemoValue::Table {
            columns: columns.clone(),
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| evaluate(cell, lookup))
                        .collect::<Result<Vec<_>, String>>()
                })
                .collect::<Result<_, _>>()?,
        },
        Expr::Field(target, field) => {
            let target = evaluate(target, lookup)?;
            let DemoValue::Record(fields) = target.as_ref() else {
                return Err(format!("cannot read field {field} of {}", target.type_name()));
            };
            return fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(field))
                .map(|(_, value)| value.clone())
                .ok_or_else(|| format!("record has no field {field}"));
        }
        Expr::Index(target, index) => {
            let target = evaluate(target, lookup)?;
            let index = evaluate(index, lookup)?;
            return index_into(&target, &index);
        }
        Expr::Neg(inner) => match evaluate(inner, lookup)?.as_ref() {
            DemoValue::Int(n) => DemoValue::Int(n.checked_neg().ok_or_else(overflow)?),
            DemoValue::Float(f) => DemoValue::Float(-f),
            other => return Err(format!("cannot negate {}", other.type_name())),
        },
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, lookup)?;
            let rhs = evaluate(rhs, lookup)?;
            binary(*op, &lhs, &rhs)?
        }
    };
    Ok(Arc::new(value))
}

/// Lists and table rows are indexed from 1.
fn index_into(target: &DemoRef, index: &DemoRef) -> Result<DemoRef, String> {
    let DemoValue::Int(n) = index.as_ref() else {
        return Err(format!("index must be a number, got {}", index.type_name()));
    };
    let slot = n
        .checked_sub(1)
        .and_then(|slot| usize::try_from(slot).ok())
        .ok_or_else(|| format!("index {n} out of range"))?;
    match target.as_ref() {
        DemoValue::List(items) => items
            .get(slot)
            .cloned()
            .ok_or_else(|| format!("index {n} out of range")),
        DemoValue::Table { columns, rows } => {
            let row = rows.get(slot).ok_or_else(|| format!("row {n} out of range"))?;
            Ok(Arc::new(DemoValue::Record(
                columns.iter().cloned().zip(row.iter().cloned()).collect(),
            )))
        }
        other => Err(format!("cannot index {}", other.type_name())),
    }
}

fn overflow() -> String {
    "integer overflow".to_string()
}

fn binary(op: BinOp, lhs: &DemoRef, rhs: &DemoRef) -> Result<DemoValue, String> {
    use DemoValue::{Bool, Float, Int, List, Str};

    let mismatch = || {
        format!(
            "unsupported operands {} and {} for {op:?}",
            lhs.type_name(),
            rhs.type_name()
        )
    };

    Ok(match op {
        BinOp::Eq => Bool(lhs.loose_eq(rhs)),
        BinOp::Ne => Bool(!lhs.loose_eq(rhs)),
        BinOp::Add => match (lhs.as_ref(), rhs.as_ref()) {
            (Int(a), Int(b)) => Int(a.checked_add(*b).ok_or_else(overflow)?),
            (Str(a), b) => Str(format!("{a}{b}")),
            (a, Str(b)) => Str(format!("{a}{b}")),
            (List(a), List(b)) => List(a.iter().chain(b).cloned().collect()),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Float(x + y),
                _ => return Err(mismatch()),
            },
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div => match (lhs.as_ref(), rhs.as_ref()) {
            (Int(_), Int(0)) if op == BinOp::Div => return Err("division by zero".to_string()),
            (Int(a), Int(b)) => Int(match op {
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                _ => a.checked_div(*b),
            }
            .ok_or_else(overflow)?),
            (a, b) => {
                let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                    return Err(mismatch());
                };
                Float(match op {
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    _ => x / y,
                })
            }
        },
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ordering = match (lhs.as_ref(), rhs.as_ref()) {
                (Str(a), Str(b)) => a.partial_cmp(b),
                (a, b) => match (a.as_number(), b.as_number()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => return Err(mismatch()),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Bool(false));
            };
            Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Le => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
    })
}

enum Flow {
    Next,
    Return(DemoRef),
    /// Already reported to the coordinator; unwinding.
    Throw(DebugException),
}

enum CallOutcome {
    Value(DemoRef),
    Thrown(DebugException),
}

/// Runs one program on the current OS thread, calling into the coordinator
/// before every statement.
pub(super) struct Interpreter {
    coordinator: Arc<SuspendCoordinator>,
    ctx: Arc<DemoContext>,
    ctx_ref: ContextRef,
    program: Arc<Program>,
}

impl Interpreter {
    pub(super) fn new(
        coordinator: Arc<SuspendCoordinator>,
        ctx: Arc<DemoContext>,
        program: Arc<Program>,
    ) -> Self {
        let ctx_ref: ContextRef = ctx.clone();
        Self {
            coordinator,
            ctx,
            ctx_ref,
            program,
        }
    }

    pub(super) fn run(&self) {
        self.ctx.push_frame("<main>", &self.program.file, None);
        let flow = self.block(&self.program.body);
        self.ctx.pop_frame();

        if let Flow::Throw(exception) = flow {
            tracing::warn!(
                target: "lumen.demo",
                thread = %self.ctx.name(),
                exception = %exception.type_name,
                "script terminated by uncaught exception"
            );
            self.coordinator.emit_output(
                &format!("Uncaught {}: {}\n", exception.type_name, exception.message),
                true,
            );
        }
    }

    fn block(&self, stmts: &[Stmt]) -> Flow {
        for stmt in stmts {
            match self.statement(stmt) {
                Flow::Next => {}
                other => return other,
            }
        }
        Flow::Next
    }

    fn enter_line(&self, line: u32) {
        self.ctx.set_line(line);
        self.coordinator
            .check_suspend(&self.ctx_ref, &self.program.file, line);
    }

    fn statement(&self, stmt: &Stmt) -> Flow {
        self.enter_line(stmt.line);
        match self.execute(stmt) {
            Ok(flow) => flow,
            Err(exception) => self.raise(stmt.line, exception),
        }
    }

    /// Report a new exception and stop on it if the client asked to.
    fn raise(&self, line: u32, exception: DebugException) -> Flow {
        if self
            .coordinator
            .notify_exception(self.ctx.id(), exception.clone(), false)
        {
            self.coordinator
                .check_suspend(&self.ctx_ref, &self.program.file, line);
        }
        Flow::Throw(exception)
    }

    fn error(&self, message: impl Into<String>) -> DebugException {
        DebugException::new(RUNTIME_ERROR, message).with_stack_trace(self.ctx.stack_trace())
    }

    fn eval(&self, expr: &Expr) -> Result<DemoRef, DebugException> {
        evaluate(expr, &|name: &str| self.ctx.lookup(0, name)).map_err(|message| self.error(message))
    }

    fn execute(&self, stmt: &Stmt) -> Result<Flow, DebugException> {
        match &stmt.kind {
            StmtKind::Func(def) => {
                self.ctx
                    .assign(&def.name, Arc::new(DemoValue::function(def.clone())));
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval(cond)?.is_truthy() {
                    then
                } else {
                    otherwise
                };
                return Ok(self.block(branch));
            }
            StmtKind::While { cond, body } => {
                let mut first = true;
                loop {
                    if !first {
                        self.enter_line(stmt.line);
                    }
                    first = false;
                    if !self.eval(cond)?.is_truthy() {
                        break;
                    }
                    match self.block(body) {
                        Flow::Next => {}
                        other => return Ok(other),
                    }
                }
            }
            StmtKind::Let { name, value } => {
                let value = match value {
                    Rhs::Expr(expr) => self.eval(expr)?,
                    Rhs::Call(call) => match self.call(call)? {
                        CallOutcome::Value(value) => value,
                        CallOutcome::Thrown(exception) => return Ok(Flow::Throw(exception)),
                    },
                };
                self.ctx.assign(name, value);
            }
            StmtKind::Call(call) => {
                if let CallOutcome::Thrown(exception) = self.call(call)? {
                    return Ok(Flow::Throw(exception));
                }
            }
            StmtKind::Print(expr) => {
                let text = self.eval(expr)?.to_string();
                tracing::trace!(target: "lumen.demo", thread = %self.ctx.name(), %text, "print");
                self.coordinator.emit_output(&format!("{text}\n"), false);
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Arc::new(DemoValue::Null),
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Throw { type_name, message } => {
                let message = match message {
                    Some(expr) => self.eval(expr)?.to_string(),
                    None => String::new(),
                };
                return Err(DebugException::new(type_name.clone(), message)
                    .with_stack_trace(self.ctx.stack_trace()));
            }
            StmtKind::Break(label) => {
                self.coordinator.programmatic_break(
                    &self.ctx_ref,
                    &self.program.file,
                    stmt.line,
                    label.as_deref(),
                );
            }
            StmtKind::Sleep(expr) => {
                let millis = match self.eval(expr)?.as_ref() {
                    DemoValue::Int(n) if *n >= 0 => *n as u64,
                    other => return Err(self.error(format!("cannot sleep for {other}"))),
                };
                std::thread::sleep(Duration::from_millis(millis));
            }
        }
        Ok(Flow::Next)
    }

    fn call(&self, call: &CallExpr) -> Result<CallOutcome, DebugException> {
        let def = self.function(&call.function)?;
        if call.args.len() != def.params.len() {
            return Err(self.error(format!(
                "{} expects {} arguments, got {}",
                def.name,
                def.params.len(),
                call.args.len()
            )));
        }
        let args = call
            .args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let bound = def.params.iter().cloned().zip(args).collect();
        self.ctx.push_frame(&def.name, &def.file, Some(bound));
        self.ctx.set_line(def.line);
        let component = Path::new(&def.file)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        self.coordinator.on_function_entry(
            &self.ctx_ref,
            &def.name,
            component.as_deref(),
            &def.file,
            def.line,
        );

        let flow = self.block(&def.body);
        self.ctx.pop_frame();

        Ok(match flow {
            Flow::Next => CallOutcome::Value(Arc::new(DemoValue::Null)),
            Flow::Return(value) => CallOutcome::Value(value),
            Flow::Throw(exception) => CallOutcome::Thrown(exception),
        })
    }

    fn function(&self, name: &str) -> Result<Arc<FunctionDef>, DebugException> {
        match self.ctx.lookup(0, name).as_deref() {
            Some(DemoValue::Function { def, .. }) => Ok(def.clone()),
            Some(other) => Err(self.error(format!("{name} is a {}, not a function", other.type_name()))),
            None => Err(self.error(format!("function {name} is not defined"))),
        }
    }
}
