//! Restoration of interpreted programs.

use std::collections::HashMap;

use swc_core::{
    common::{EqIgnoreSpan, DUMMY_SP},
    ecma::{
        ast::{
            AssignExpr, BinExpr, BinaryOp, CallExpr, Callee, Decl, EmptyStmt, Expr, ExprOrSpread, ExprStmt,
            Ident, Pat, ReturnStmt, Stmt, UpdateExpr, VarDecl, VarDeclKind, VarDeclarator,
        },
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
};

use crate::{
    deobfuscation::{
        passes::{
            fold_numeric,
            utils::{as_number, as_string, is_identifier_name, number, number_to_js_string, parenthesize, parse_int, string},
        },
        vm::{
            detector::{BytecodeValue, Interpreter},
            extract_instructions,
            signatures::STACK_BYTECODE,
            HandlerTemplate, RestorationResult, UnresolvedPart, VmDetection,
        },
    },
    source::SyntaxTree,
};

/// Confidence of a listing restored without unresolved parts.
pub const RESTORED_CEILING: f64 = 0.9;

/// Ceiling once any part is left unresolved.
pub const PARTIAL_CEILING: f64 = 0.75;

/// Confidence of a cleanup-only result for an unrecognised interpreter.
pub const CUSTOM_CEILING: f64 = 0.3;

/// Restores the program behind a detected interpreter.
pub struct VmRestorer {
    max_steps: usize,
}

impl VmRestorer {
    /// Creates a restorer that executes at most `max_steps` instructions.
    #[must_use]
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Restores `source`.
    ///
    /// An interpreter matching a known signature is executed symbolically over
    /// its literal bytecode. Anything else gets conservative cleanup of
    /// `source` and one unresolved part per instruction.
    #[must_use]
    pub fn restore_code(
        &self,
        source: &str,
        detection: &VmDetection,
        interpreter: Option<&Interpreter>,
    ) -> RestorationResult {
        if let Some(interpreter) = interpreter {
            if let (Some(handlers), Some(bytecode)) =
                (STACK_BYTECODE.handlers(interpreter), interpreter.bytecode.as_deref())
            {
                log::debug!(
                    "executing {} bytecode entries through {} handlers",
                    bytecode.len(),
                    handlers.len()
                );
                return self.execute(interpreter, bytecode, &handlers);
            }
        }
        Self::cleanup(source, detection, interpreter)
    }

    fn execute(
        &self,
        interpreter: &Interpreter,
        bytecode: &[BytecodeValue],
        handlers: &HashMap<i64, HandlerTemplate>,
    ) -> RestorationResult {
        let mut machine = Machine::default();
        let mut unresolved = Vec::new();
        let mut warnings = Vec::new();
        let mut pc = 0;
        let mut steps = 0;
        let mut halted = false;

        let mut fail = |pc: usize, reason: String, suggestion: &str| {
            unresolved.push(UnresolvedPart {
                location: format!("{} pc {pc}", interpreter.location),
                reason,
                suggestion: suggestion.to_string(),
            });
        };

        while pc < bytecode.len() {
            steps += 1;
            if steps > self.max_steps {
                fail(pc, format!("step limit of {} reached", self.max_steps), "raise the VM step limit");
                break;
            }
            let Some(opcode) = opcode_at(bytecode, pc) else {
                fail(pc, "opcode is not an integer".to_string(), "check the instruction table encoding");
                break;
            };
            let Some(template) = handlers.get(&opcode).copied() else {
                fail(
                    pc,
                    format!("opcode {opcode} has no handler"),
                    "the table may be encrypted or indexed indirectly",
                );
                break;
            };
            let at = pc;
            pc += 1;
            let operand = if template.operands() > 0 {
                let Some(operand) = bytecode.get(pc) else {
                    fail(at, format!("opcode {opcode} is missing its operand"), "check the table length");
                    break;
                };
                pc += 1;
                Some(operand)
            } else {
                None
            };

            match machine.step(template, operand) {
                Ok(Flow::Next) => {}
                Ok(Flow::Halt) => {
                    halted = true;
                    break;
                }
                Err(reason) => {
                    fail(at, reason, "trace this instruction by hand");
                    break;
                }
            }
        }

        if !halted && !machine.stack.is_empty() {
            warnings.push(format!("{} values left on the stack", machine.stack.len()));
        }

        let code = match SyntaxTree::from_stmts(machine.out).print() {
            Ok(code) => code,
            Err(err) => {
                warnings.push(format!("printing the restored listing failed: {err}"));
                String::new()
            }
        };
        let confidence = if unresolved.is_empty() {
            RESTORED_CEILING
        } else {
            #[allow(clippy::cast_precision_loss)]
            let penalty = 0.1 * unresolved.len() as f64;
            (RESTORED_CEILING - penalty).clamp(0.0, PARTIAL_CEILING)
        };

        RestorationResult {
            code,
            confidence,
            warnings,
            unresolved_parts: unresolved,
        }
    }

    fn cleanup(source: &str, detection: &VmDetection, interpreter: Option<&Interpreter>) -> RestorationResult {
        let mut warnings = Vec::new();
        let code = match SyntaxTree::parse(source) {
            Ok(mut tree) => {
                tree.script_mut().visit_mut_with(&mut Cleanup);
                tree.print().unwrap_or_else(|err| {
                    warnings.push(format!("printing the cleaned interpreter failed: {err}"));
                    source.to_string()
                })
            }
            Err(err) => {
                warnings.push(format!("cleanup skipped: {err}"));
                source.to_string()
            }
        };

        let unresolved_parts: Vec<UnresolvedPart> = match interpreter {
            Some(interpreter) => extract_instructions(interpreter)
                .into_iter()
                .map(|instruction| UnresolvedPart {
                    location: format!("{} opcode {}", interpreter.location, instruction.opcode),
                    reason: format!("{} ({}) matches no known handler template", instruction.name, instruction.kind),
                    suggestion: "trace the handler by hand or add a signature for this interpreter".to_string(),
                })
                .collect(),
            None => {
                let profile = detection.profile();
                (1..=profile.instruction_count)
                    .map(|n| UnresolvedPart {
                        location: format!("{} case #{n}", profile.interpreter_location),
                        reason: "interpreter located by text patterns only".to_string(),
                        suggestion: "fix the parse error and rerun for handler analysis".to_string(),
                    })
                    .collect()
            }
        };

        RestorationResult {
            code,
            confidence: CUSTOM_CEILING,
            warnings,
            unresolved_parts,
        }
    }
}

fn opcode_at(bytecode: &[BytecodeValue], pc: usize) -> Option<i64> {
    let BytecodeValue::Num(value) = bytecode.get(pc)? else {
        return None;
    };
    #[allow(clippy::cast_possible_truncation)]
    let opcode = *value as i64;
    #[allow(clippy::cast_precision_loss)]
    let integral = opcode as f64 == *value;
    integral.then_some(opcode)
}

enum Flow {
    Next,
    Halt,
}

/// Symbolic stack machine: stack slots hold expressions, effects become statements.
#[derive(Default)]
struct Machine {
    stack: Vec<Expr>,
    out: Vec<Stmt>,
}

impl Machine {
    fn pop(&mut self) -> Result<Expr, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_string())
    }

    fn step(&mut self, template: HandlerTemplate, operand: Option<&BytecodeValue>) -> Result<Flow, String> {
        match template {
            HandlerTemplate::Push { hex } => {
                let value = match (operand, hex) {
                    (Some(BytecodeValue::Str(text)), true) => number(parse_int(text, Some(16))),
                    (Some(BytecodeValue::Num(value)), true) => {
                        let text = number_to_js_string(*value).ok_or("operand is not a finite number")?;
                        number(parse_int(&text, Some(16)))
                    }
                    (Some(BytecodeValue::Str(text)), false) => string(text),
                    (Some(BytecodeValue::Num(value)), false) => number(*value),
                    (None, _) => return Err("push without operand".to_string()),
                };
                self.stack.push(value);
            }
            HandlerTemplate::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(binary(op, left, right));
            }
            HandlerTemplate::Load => {
                let name = variable_name(operand)?;
                self.stack.push(Expr::Ident(Ident::new(name.into(), DUMMY_SP)));
            }
            HandlerTemplate::Store => {
                let name = variable_name(operand)?;
                let value = self.pop()?;
                self.out.push(Stmt::Decl(Decl::Var(Box::new(VarDecl {
                    span: DUMMY_SP,
                    kind: VarDeclKind::Var,
                    declare: false,
                    decls: vec![VarDeclarator {
                        span: DUMMY_SP,
                        name: Pat::Ident(Ident::new(name.into(), DUMMY_SP).into()),
                        init: Some(Box::new(value)),
                        definite: false,
                    }],
                }))));
            }
            HandlerTemplate::Call => {
                let argc = match operand {
                    Some(BytecodeValue::Num(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let argc = *n as usize;
                        argc
                    }
                    _ => return Err("argument count is not a non-negative integer".to_string()),
                };
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.pop()?);
                }
                args.reverse();
                let callee = self.pop()?;
                self.stack.push(Expr::Call(CallExpr {
                    span: DUMMY_SP,
                    callee: Callee::Expr(Box::new(parenthesize(callee))),
                    args: args
                        .into_iter()
                        .map(|arg| ExprOrSpread {
                            spread: None,
                            expr: Box::new(arg),
                        })
                        .collect(),
                    type_args: None,
                }));
            }
            HandlerTemplate::Pop => {
                let value = self.pop()?;
                self.out.push(Stmt::Expr(ExprStmt {
                    span: DUMMY_SP,
                    expr: Box::new(value),
                }));
            }
            HandlerTemplate::Halt => {
                let arg = self.stack.pop().map(Box::new);
                self.out.push(Stmt::Return(ReturnStmt { span: DUMMY_SP, arg }));
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Next)
    }
}

fn variable_name(operand: Option<&BytecodeValue>) -> Result<&str, String> {
    match operand {
        Some(BytecodeValue::Str(name)) if is_identifier_name(name) => Ok(name),
        _ => Err("operand is not a variable name".to_string()),
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    if let (Some(l), Some(r)) = (as_number(&left), as_number(&right)) {
        if let Some(value) = fold_numeric(op, l, r).filter(|v| v.is_finite()) {
            return number(value);
        }
    }
    if op == BinaryOp::Add {
        if let (Some(l), Some(r)) = (as_string(&left), as_string(&right)) {
            return string(&format!("{l}{r}"));
        }
    }
    Expr::Bin(BinExpr {
        span: DUMMY_SP,
        op,
        left: Box::new(parenthesize(left)),
        right: Box::new(parenthesize(right)),
    })
}

/// Cleanup applied to interpreters that cannot be executed.
struct Cleanup;

impl VisitMut for Cleanup {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        stmts.retain(|stmt| !matches!(stmt, Stmt::Debugger(_) | Stmt::Empty(_)));
    }

    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        if let Stmt::Debugger(debugger) = stmt {
            *stmt = Stmt::Empty(EmptyStmt { span: debugger.span });
        }
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        let replacement = match &*expr {
            Expr::Cond(cond) if cond.cons.eq_ignore_span(&cond.alt) && is_pure(&cond.test) => {
                Some((*cond.cons).clone())
            }
            Expr::Bin(bin) if bin.op == BinaryOp::Add => match (as_string(&bin.left), as_string(&bin.right)) {
                (Some(""), Some(_)) => Some((*bin.right).clone()),
                (Some(_), Some("")) => Some((*bin.left).clone()),
                _ => None,
            },
            _ => None,
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
        }
    }
}

/// No calls, assignments or updates.
fn is_pure(expr: &Expr) -> bool {
    struct Effects(bool);

    impl Visit for Effects {
        fn visit_call_expr(&mut self, _: &CallExpr) {
            self.0 = true;
        }

        fn visit_assign_expr(&mut self, _: &AssignExpr) {
            self.0 = true;
        }

        fn visit_update_expr(&mut self, _: &UpdateExpr) {
            self.0 = true;
        }
    }

    let mut effects = Effects(false);
    expr.visit_with(&mut effects);
    !effects.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deobfuscation::vm::VmDetector,
        source::{normalize, SyntaxTree},
    };

    const VM: &str = r#"
        var code = [0, "a", 0, "14", 1, 5, "total", 4, "print", 4, "total", 2, 1, 6, 4, "total", 3];
        function run(env, ctx) {
            var pc = 0;
            var stack = [];
            while (pc < code.length) {
                var op = code[pc++];
                switch (op) {
                    case 0: stack.push(parseInt(code[pc++], 16)); break;
                    case 1: var b = stack.pop(); var a = stack.pop(); stack.push(a + b); break;
                    case 2: var argc = code[pc++]; var args = stack.splice(stack.length - argc, argc); var f = stack.pop(); stack.push(f.apply(ctx, args)); break;
                    case 3: return stack.pop();
                    case 4: stack.push(env[code[pc++]]); break;
                    case 5: env[code[pc++]] = stack.pop(); break;
                    case 6: stack.pop(); break;
                }
            }
        }
    "#;

    fn restore(source: &str, max_steps: usize) -> RestorationResult {
        let unit = normalize(source);
        let tree = SyntaxTree::parse(&unit.normalized).ok();
        let (detection, interpreter, _) = VmDetector::detect(&unit, tree.as_ref()).unwrap();
        VmRestorer::new(max_steps).restore_code(&unit.normalized, &detection, interpreter.as_ref())
    }

    fn compact(code: &str) -> String {
        code.split_whitespace().collect()
    }

    #[test]
    fn test_symbolic_execution() {
        let result = restore(VM, 1_000);
        assert!(result.is_complete(), "{:?}", result.unresolved_parts);
        assert_eq!(result.confidence, RESTORED_CEILING);
        assert_eq!(compact(&result.code), "vartotal=30;print(total);returntotal;");
    }

    #[test]
    fn test_step_limit_is_unresolved() {
        let result = restore(VM, 3);
        assert_eq!(result.unresolved_parts.len(), 1);
        assert!(result.unresolved_parts[0].reason.contains("step limit"));
        assert!(result.confidence <= PARTIAL_CEILING);
    }

    #[test]
    fn test_unknown_opcode_is_unresolved() {
        let source = VM.replace(r#"3];"#, r#"9];"#);
        let result = restore(&source, 1_000);
        assert_eq!(result.unresolved_parts.len(), 1);
        assert!(result.unresolved_parts[0].reason.contains("opcode 9"));
        assert!(result.confidence < RESTORED_CEILING);
    }

    #[test]
    fn test_custom_vm_cleanup() {
        let source = VM
            .replace("case 6: stack.pop(); break;", "case 6: debugger; ctx.x = ctx.y ? \"\" + \"k\" : \"\" + \"k\"; break;");
        let result = restore(&source, 1_000);
        assert_eq!(result.unresolved_parts.len(), 7);
        assert_eq!(result.confidence, CUSTOM_CEILING);
        assert!(!result.code.contains("debugger"));
        assert!(compact(&result.code).contains(r#"ctx.x="k";"#));
    }

    #[test]
    fn test_pattern_tier_gets_one_part_per_case() {
        let source = r#"
            var code = [0, 1, 2, 0, 1, 2, 0, 1, 2, 3];
            while (pc < code.length) {
                switch (code[pc++]) {
                    case 0: stack.push(parseInt(code[pc++], 16)); break;
                    case 1: fn.apply(ctx, args); break;
                    case 2: @@@
        "#;
        let result = restore(source, 1_000);
        assert_eq!(result.unresolved_parts.len(), 3);
        assert_eq!(result.code, normalize(source).normalized);
        assert_eq!(result.warnings.len(), 1);
    }
}
