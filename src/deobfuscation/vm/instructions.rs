//! Instruction-set extraction from interpreter handlers.

use swc_core::ecma::{
    ast::{ArrowExpr, AssignExpr, BinExpr, BinaryOp, CallExpr, Expr, Function, Lit, MemberExpr, SwitchCase},
    visit::{Visit, VisitWith},
};

use crate::deobfuscation::{
    passes::utils::{as_ident, as_number, computed_index, method_call, number_to_js_string, AssignTargetProbe},
    vm::{detector::Interpreter, signatures::handler_body, InstructionDescriptor, InstructionType},
};

/// Describes every dispatch case of `interpreter`, in case order.
///
/// Each handler is classified by its dominant shape. The checks run in a fixed
/// order and the first that applies wins: jump, arithmetic, call, store, load,
/// stack, unknown.
#[must_use]
pub fn extract_instructions(interpreter: &Interpreter) -> Vec<InstructionDescriptor> {
    interpreter
        .cases
        .iter()
        .map(|case| describe(interpreter, case))
        .collect()
}

fn describe(interpreter: &Interpreter, case: &SwitchCase) -> InstructionDescriptor {
    let opcode = case_label(case);
    let mut scan = HandlerScan::new(interpreter);
    for stmt in handler_body(&case.cons) {
        stmt.visit_with(&mut scan);
    }

    let (kind, name, description) = if scan.counter_writes > 0 && scan.is_pure_jump() {
        (
            InstructionType::Jump,
            "JMP".to_string(),
            "moves the program counter".to_string(),
        )
    } else if let Some(op) = scan.arithmetic {
        (
            InstructionType::Arithmetic,
            mnemonic(op).to_string(),
            format!("applies `{}` to its operands", op.as_str()),
        )
    } else if scan.dispatches {
        (
            InstructionType::Call,
            "CALL".to_string(),
            "invokes a function through apply/call".to_string(),
        )
    } else if scan.stores > 0 {
        (
            InstructionType::Store,
            "STORE".to_string(),
            "writes a variable or property".to_string(),
        )
    } else if scan.loads > 0 {
        (
            InstructionType::Load,
            "LOAD".to_string(),
            "reads a variable or property".to_string(),
        )
    } else if scan.pushes > 0 {
        (
            InstructionType::Stack,
            "PUSH".to_string(),
            "pushes an operand onto the stack".to_string(),
        )
    } else if scan.pops > 0 {
        (
            InstructionType::Stack,
            "POP".to_string(),
            "discards the top of the stack".to_string(),
        )
    } else {
        (
            InstructionType::Unknown,
            format!("OP_{}", opcode.trim_matches('"')),
            "unrecognised handler".to_string(),
        )
    };

    InstructionDescriptor {
        opcode,
        name,
        kind,
        description,
    }
}

/// The case label as written: a number, a quoted string, or `default`.
fn case_label(case: &SwitchCase) -> String {
    match case.test.as_deref() {
        None => "default".to_string(),
        Some(Expr::Lit(Lit::Str(s))) => format!("\"{}\"", s.value),
        Some(test) => as_number(test)
            .and_then(number_to_js_string)
            .or_else(|| as_ident(test).map(str::to_string))
            .unwrap_or_else(|| "?".to_string()),
    }
}

fn mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "ADD",
        BinaryOp::Sub => "SUB",
        BinaryOp::Mul => "MUL",
        BinaryOp::Div => "DIV",
        BinaryOp::Mod => "MOD",
        BinaryOp::Exp => "EXP",
        BinaryOp::BitXor => "XOR",
        BinaryOp::BitAnd => "AND",
        BinaryOp::BitOr => "OR",
        BinaryOp::LShift => "SHL",
        BinaryOp::RShift => "SHR",
        BinaryOp::ZeroFillRShift => "USHR",
        _ => "ALU",
    }
}

fn is_arithmetic(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Exp
            | BinaryOp::BitXor
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::LShift
            | BinaryOp::RShift
            | BinaryOp::ZeroFillRShift
    )
}

struct HandlerScan<'a> {
    interpreter: &'a Interpreter,
    counter_writes: usize,
    other_writes: usize,
    calls: usize,
    arithmetic: Option<BinaryOp>,
    dispatches: bool,
    stores: usize,
    loads: usize,
    pushes: usize,
    pops: usize,
}

impl<'a> HandlerScan<'a> {
    fn new(interpreter: &'a Interpreter) -> Self {
        Self {
            interpreter,
            counter_writes: 0,
            other_writes: 0,
            calls: 0,
            arithmetic: None,
            dispatches: false,
            stores: 0,
            loads: 0,
            pushes: 0,
            pops: 0,
        }
    }

    /// Only the counter is written and nothing is called.
    fn is_pure_jump(&self) -> bool {
        self.other_writes == 0 && self.calls == 0
    }

    fn is_counter(&self, expr: &Expr) -> bool {
        as_ident(expr) == Some(self.interpreter.counter.as_str())
    }

    fn is_stack(&self, object: &Expr) -> bool {
        match (&self.interpreter.stack, as_ident(object)) {
            (Some(stack), Some(name)) => stack == name,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

impl Visit for HandlerScan<'_> {
    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        let probe = AssignTargetProbe::of(n);
        if probe.simple_name() == Some(self.interpreter.counter.as_str()) {
            self.counter_writes += 1;
        } else {
            self.other_writes += 1;
            let onto_stack = probe
                .member_object()
                .is_some_and(|o| self.interpreter.stack.as_deref() == Some(o));
            if !onto_stack {
                self.stores += 1;
            }
        }
        n.visit_children_with(self);
    }

    fn visit_bin_expr(&mut self, n: &BinExpr) {
        if is_arithmetic(n.op)
            && self.arithmetic.is_none()
            && !self.is_counter(&n.left)
            && !self.is_counter(&n.right)
        {
            self.arithmetic = Some(n.op);
        }
        n.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        match method_call(n) {
            Some((_, "apply" | "call")) => self.dispatches = true,
            Some((object, "push")) if self.is_stack(object) => self.pushes += 1,
            Some((object, "pop")) if self.is_stack(object) => self.pops += 1,
            _ => self.calls += 1,
        }
        n.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if computed_index(n).is_some() {
            let object = as_ident(&n.obj);
            let on_table = object.is_some() && object == self.interpreter.table.as_deref();
            let on_stack = object.is_some() && object == self.interpreter.stack.as_deref();
            if !on_table && !on_stack {
                self.loads += 1;
            }
        }
        n.visit_children_with(self);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}
