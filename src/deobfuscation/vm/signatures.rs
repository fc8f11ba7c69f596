//! Known interpreter signatures and their handler templates.

use std::collections::HashMap;

use swc_core::ecma::{
    ast::{AssignExpr, BinaryOp, CallExpr, Decl, Expr, Pat, Stmt, SwitchCase, UpdateOp},
    visit::{Visit, VisitWith},
};

use crate::deobfuscation::{
    passes::utils::{as_ident, as_number, callee_name, computed_index, method_call, unparen, AssignTargetProbe},
    vm::detector::Interpreter,
};

/// Semantics of one recognised instruction handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerTemplate {
    /// `stack.push(code[pc++])`, optionally through `parseInt(.., 16)`.
    Push {
        /// The operand is a hex string.
        hex: bool,
    },
    /// `var b = stack.pop(); var a = stack.pop(); stack.push(a <op> b)`.
    Binary(BinaryOp),
    /// `stack.push(scope[code[pc++]])`: pushes the variable named by the operand.
    Load,
    /// `scope[code[pc++]] = stack.pop()`: stores into the variable named by the operand.
    Store,
    /// Pops `argc` arguments (the operand) and a callee, pushes the call result.
    Call,
    /// `stack.pop()`: evaluates and discards the top of stack.
    Pop,
    /// `return stack.pop()` or `return`.
    Halt,
}

impl HandlerTemplate {
    /// Number of operands the handler reads from the instruction table.
    #[must_use]
    pub fn operands(self) -> usize {
        match self {
            Self::Push { .. } | Self::Load | Self::Store | Self::Call => 1,
            Self::Binary(_) | Self::Pop | Self::Halt => 0,
        }
    }
}

/// A named interpreter layout that can be restored.
#[derive(Debug)]
pub struct VmSignature {
    /// Reported as `vmType`.
    pub name: &'static str,
    /// Human-readable summary.
    pub description: &'static str,
}

/// Stack machine over a literal instruction table.
pub static STACK_BYTECODE: VmSignature = VmSignature {
    name: "stack-bytecode",
    description: "stack machine over a literal instruction table",
};

impl VmSignature {
    /// Maps every opcode of `interpreter` to a template, or `None` if the
    /// interpreter does not fit this signature.
    #[must_use]
    pub fn handlers(&self, interpreter: &Interpreter) -> Option<HashMap<i64, HandlerTemplate>> {
        interpreter.bytecode.as_ref()?;
        let shape = Shape {
            stack: interpreter.stack.as_deref()?,
            table: interpreter.table.as_deref()?,
            counter: &interpreter.counter,
        };

        let mut handlers = HashMap::new();
        for case in &interpreter.cases {
            let opcode = case_opcode(case)?;
            let template = shape.template(handler_body(&case.cons))?;
            handlers.insert(opcode, template);
        }
        handlers
            .values()
            .any(|t| matches!(t, HandlerTemplate::Push { .. }))
            .then_some(handlers)
    }
}

/// The signature `interpreter` matches, if any.
#[must_use]
pub fn identify(interpreter: &Interpreter) -> Option<&'static VmSignature> {
    STACK_BYTECODE
        .handlers(interpreter)
        .map(|_| &STACK_BYTECODE)
}

/// Integral numeric case label.
pub(crate) fn case_opcode(case: &SwitchCase) -> Option<i64> {
    let value = as_number(case.test.as_deref()?)?;
    #[allow(clippy::cast_possible_truncation)]
    let opcode = value as i64;
    #[allow(clippy::cast_precision_loss)]
    let integral = opcode as f64 == value;
    integral.then_some(opcode)
}

/// Case body without its trailing `break;`, flattening a lone block.
pub(crate) fn handler_body(cons: &[Stmt]) -> &[Stmt] {
    let cons = match cons {
        [Stmt::Block(block)] => block.stmts.as_slice(),
        other => other,
    };
    match cons.split_last() {
        Some((Stmt::Break(b), rest)) if b.label.is_none() => rest,
        _ => cons,
    }
}

struct Shape<'a> {
    stack: &'a str,
    table: &'a str,
    counter: &'a str,
}

impl Shape<'_> {
    fn template(&self, body: &[Stmt]) -> Option<HandlerTemplate> {
        match body {
            [Stmt::Return(ret)] => match ret.arg.as_deref() {
                None => Some(HandlerTemplate::Halt),
                Some(arg) => self.is_pop(arg).then_some(HandlerTemplate::Halt),
            },
            [Stmt::Expr(stmt)] => self.single_expression(&stmt.expr),
            _ => self.binary(body).or_else(|| self.call(body)),
        }
    }

    fn single_expression(&self, expr: &Expr) -> Option<HandlerTemplate> {
        if self.is_pop(expr) {
            return Some(HandlerTemplate::Pop);
        }
        if let Expr::Assign(assign) = unparen(expr) {
            let probe = AssignTargetProbe::of(assign);
            return (probe.member_object().is_some()
                && self.is_pop(&assign.right)
                && self.reads_operand_in_target(assign))
            .then_some(HandlerTemplate::Store);
        }
        let pushed = self.pushed(expr)?;
        if self.is_operand(pushed) {
            return Some(HandlerTemplate::Push { hex: false });
        }
        if let Expr::Call(call) = unparen(pushed) {
            if is_hex_parse(call) && self.is_operand(&call.args[0].expr) {
                return Some(HandlerTemplate::Push { hex: true });
            }
        }
        if let Expr::Member(member) = unparen(pushed) {
            let scoped = as_ident(&member.obj).is_some_and(|o| o != self.table);
            if scoped && computed_index(member).is_some_and(|i| self.is_operand(i)) {
                return Some(HandlerTemplate::Load);
            }
        }
        None
    }

    /// `var b = pop; var a = pop; push(a op b)`.
    fn binary(&self, body: &[Stmt]) -> Option<HandlerTemplate> {
        let (last, decls) = body.split_last()?;
        let popped = self.popped_bindings(decls)?;
        let [right, left] = popped.as_slice() else {
            return None;
        };
        let Stmt::Expr(stmt) = last else {
            return None;
        };
        let Expr::Bin(bin) = unparen(self.pushed(&stmt.expr)?) else {
            return None;
        };
        (as_ident(&bin.left) == Some(left.as_str()) && as_ident(&bin.right) == Some(right.as_str()))
            .then_some(HandlerTemplate::Binary(bin.op))
    }

    /// Any handler that reads an operand, dispatches through `apply`/`call`
    /// and pushes the result.
    fn call(&self, body: &[Stmt]) -> Option<HandlerTemplate> {
        let mut reads_operand = false;
        let mut dispatches = false;
        for stmt in body {
            match stmt {
                Stmt::Decl(Decl::Var(var)) => {
                    for decl in &var.decls {
                        let Some(init) = decl.init.as_deref() else {
                            continue;
                        };
                        reads_operand |= self.is_operand(init);
                        dispatches |= self.is_dispatch(init);
                    }
                }
                Stmt::Expr(stmt) => {
                    if let Some(pushed) = self.pushed(&stmt.expr) {
                        dispatches |= self.is_dispatch(pushed);
                    }
                }
                _ => return None,
            }
        }
        (reads_operand && dispatches).then_some(HandlerTemplate::Call)
    }

    fn popped_bindings(&self, decls: &[Stmt]) -> Option<Vec<String>> {
        let mut names = Vec::new();
        for stmt in decls {
            let Stmt::Decl(Decl::Var(var)) = stmt else {
                return None;
            };
            for decl in &var.decls {
                let Pat::Ident(binding) = &decl.name else {
                    return None;
                };
                if !decl.init.as_deref().is_some_and(|init| self.is_pop(init)) {
                    return None;
                }
                names.push(binding.id.sym.to_string());
            }
        }
        Some(names)
    }

    fn is_dispatch(&self, expr: &Expr) -> bool {
        matches!(unparen(expr), Expr::Call(call) if matches!(method_call(call), Some((_, "apply" | "call"))))
    }

    /// The argument of `stack.push(arg)`.
    fn pushed<'e>(&self, expr: &'e Expr) -> Option<&'e Expr> {
        let Expr::Call(call) = unparen(expr) else {
            return None;
        };
        match (method_call(call), call.args.as_slice()) {
            (Some((object, "push")), [arg]) if as_ident(object) == Some(self.stack) && arg.spread.is_none() => {
                Some(&arg.expr)
            }
            _ => None,
        }
    }

    fn is_pop(&self, expr: &Expr) -> bool {
        let Expr::Call(call) = unparen(expr) else {
            return false;
        };
        matches!(method_call(call), Some((object, "pop")) if as_ident(object) == Some(self.stack))
            && call.args.is_empty()
    }

    /// `table[counter++]`.
    fn is_operand(&self, expr: &Expr) -> bool {
        let Expr::Member(member) = unparen(expr) else {
            return false;
        };
        let Some(Expr::Update(update)) = computed_index(member).map(unparen) else {
            return false;
        };
        as_ident(&member.obj) == Some(self.table)
            && update.op == UpdateOp::PlusPlus
            && !update.prefix
            && as_ident(&update.arg) == Some(self.counter)
    }

    fn reads_operand_in_target(&self, assign: &AssignExpr) -> bool {
        let mut finder = OperandFinder { shape: self, found: false };
        assign.left.visit_with(&mut finder);
        finder.found
    }
}

struct OperandFinder<'s, 'a> {
    shape: &'s Shape<'a>,
    found: bool,
}

impl Visit for OperandFinder<'_, '_> {
    fn visit_expr(&mut self, n: &Expr) {
        if self.shape.is_operand(n) {
            self.found = true;
            return;
        }
        n.visit_children_with(self);
    }
}

/// `parseInt(x, 16)`.
pub(crate) fn is_hex_parse(call: &CallExpr) -> bool {
    callee_name(call) == Some("parseInt")
        && call.args.len() == 2
        && as_number(&call.args[1].expr) == Some(16.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deobfuscation::vm::VmDetector, source::SyntaxTree};

    fn interpreter(source: &str) -> Interpreter {
        VmDetector::locate(&SyntaxTree::parse(source).unwrap()).unwrap()
    }

    const VM: &str = r#"
        var code = [0, "2", 0, "3", 1, 0, "a", 2, 3];
        function run(env, ctx) {
            var pc = 0;
            var stack = [];
            while (pc < code.length) {
                var op = code[pc++];
                switch (op) {
                    case 0: stack.push(parseInt(code[pc++], 16)); break;
                    case 1: var b = stack.pop(); var a = stack.pop(); stack.push(a * b); break;
                    case 2: var argc = code[pc++]; var args = stack.splice(stack.length - argc, argc); var f = stack.pop(); stack.push(f.apply(ctx, args)); break;
                    case 3: return stack.pop();
                    case 4: stack.push(env[code[pc++]]); break;
                    case 5: env[code[pc++]] = stack.pop(); break;
                    case 6: stack.pop(); break;
                }
            }
        }
    "#;

    #[test]
    fn test_stack_bytecode_handlers() {
        let handlers = STACK_BYTECODE.handlers(&interpreter(VM)).unwrap();
        assert_eq!(handlers[&0], HandlerTemplate::Push { hex: true });
        assert_eq!(handlers[&1], HandlerTemplate::Binary(BinaryOp::Mul));
        assert_eq!(handlers[&2], HandlerTemplate::Call);
        assert_eq!(handlers[&3], HandlerTemplate::Halt);
        assert_eq!(handlers[&4], HandlerTemplate::Load);
        assert_eq!(handlers[&5], HandlerTemplate::Store);
        assert_eq!(handlers[&6], HandlerTemplate::Pop);
        assert_eq!(identify(&interpreter(VM)).map(|s| s.name), Some("stack-bytecode"));
    }

    #[test]
    fn test_unknown_handler_is_custom() {
        let source = VM.replace("case 6: stack.pop(); break;", "case 6: ctx.x ^= 1; break;");
        assert!(identify(&interpreter(&source)).is_none());
    }

    #[test]
    fn test_handler_body_strips_break() {
        let tree = SyntaxTree::parse("switch (x) { case 1: { a(); break; } case 2: b(); break; }").unwrap();
        let Stmt::Switch(switch) = &tree.script().body[0] else {
            panic!("expected switch");
        };
        assert_eq!(handler_body(&switch.cases[0].cons).len(), 1);
        assert_eq!(handler_body(&switch.cases[1].cons).len(), 1);
        assert_eq!(case_opcode(&switch.cases[1]), Some(2));
    }
}
