//! Known commercial-obfuscator idioms.
//!
//! Two families are handled here:
//!
//! - Self-defending debugger traps. Bare `debugger;` statements, timers whose
//!   callback does nothing but `debugger`, and `constructor("debugger")` calls
//!   are removed. Each shape has its own transformation kind so the log shows
//!   whether a statement or a whole call was dropped.
//! - Decrypt helpers. One-parameter functions built around
//!   `String.fromCharCode` with `charCodeAt` or bit twiddling over character
//!   codes. Their bodies are never executed; when string decryption is on,
//!   constant call sites become the placeholder `"[decrypted:<name>]"`.
//!
//! Flattened control flow and dead branches are left to the dedicated passes.

use std::collections::HashSet;

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{
            BinExpr, BinaryOp, BlockStmtOrExpr, CallExpr, Callee, EmptyStmt, Expr, FnDecl,
            Function, Lit, MemberExpr, Pat, Stmt, VarDeclarator,
        },
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        config::OptionFlags,
        detection::{DetectionSignature, Technique},
        pass::{AstPass, PassContext, PassReport},
        passes::utils::{as_ident, as_string, callee_name, member_name, method_call, string, unparen},
    },
    source::SyntaxTree,
    Result,
};

/// Timer functions used to re-arm debugger traps.
const TIMERS: &[&str] = &["setInterval", "setTimeout"];

/// Confidence for `n` successful transformations: `min(1, 0.2 * n)`.
///
/// Zero at zero, non-decreasing, saturating at five.
#[must_use]
pub fn calculate_confidence(n: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = n as f64;
    (0.2 * n).min(1.0)
}

/// Removes debugger traps and neutralises decrypt-helper calls.
pub struct VendorSignaturePass;

impl Default for VendorSignaturePass {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorSignaturePass {
    /// Creates a new vendor-signature pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for VendorSignaturePass {
    fn name(&self) -> &'static str {
        "vendor-signatures"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::DebuggerStatementRemoval
    }

    fn description(&self) -> &'static str {
        "Removes self-defending debugger traps and marks decrypt-helper results"
    }

    fn run(&self, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<PassReport> {
        let mut report = PassReport::new();

        let mut traps = TrapRemover::default();
        tree.script_mut().visit_mut_with(&mut traps);
        report.changed(
            TransformationKind::DebuggerStatementRemoval,
            traps.statements,
            format!("removed {} debugger statements", traps.statements),
        );
        report.changed(
            TransformationKind::DebuggerTimerRemoval,
            traps.timers,
            format!("removed {} debugger timers", traps.timers),
        );
        report.changed(
            TransformationKind::DebuggerConstructorRemoval,
            traps.constructors,
            format!("removed {} debugger constructor calls", traps.constructors),
        );
        let signals = traps.statements + traps.timers + traps.constructors;
        if signals >= 2 {
            ctx.add_signature_once(DetectionSignature::new(
                Technique::SelfDefending,
                traps.evidence(),
                calculate_confidence(signals),
            ));
        }

        let mut helpers = DecryptHelpers::default();
        tree.script().visit_with(&mut helpers);
        if !helpers.names.is_empty() {
            let mut names: Vec<String> = helpers.names.iter().cloned().collect();
            names.sort();
            ctx.add_signature_once(DetectionSignature::new(
                Technique::DecryptHelper,
                names.iter().map(|n| format!("decrypt helper `{n}`")).collect(),
                calculate_confidence(2 + names.len()),
            ));

            if ctx.has(OptionFlags::DECRYPT_STRINGS) {
                let mut marker = Placeholders {
                    helpers: &helpers.names,
                    replaced: 0,
                };
                tree.script_mut().visit_mut_with(&mut marker);
                report.changed(
                    TransformationKind::DecryptHelperPlaceholder,
                    marker.replaced,
                    format!(
                        "replaced {} calls to {} with placeholders",
                        marker.replaced,
                        names.join(", ")
                    ),
                );
            }
        }

        Ok(report)
    }
}

#[derive(Default)]
struct TrapRemover {
    statements: usize,
    timers: usize,
    constructors: usize,
}

impl TrapRemover {
    fn evidence(&self) -> Vec<String> {
        [
            (self.statements, "debugger statements"),
            (self.timers, "debugger timers"),
            (self.constructors, "debugger constructor calls"),
        ]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, what)| format!("{count} {what}"))
        .collect()
    }
}

impl VisitMut for TrapRemover {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        let original = std::mem::take(stmts);
        for mut stmt in original {
            match &stmt {
                Stmt::Debugger(_) => self.statements += 1,
                Stmt::Expr(expr) if is_timer_trap(&expr.expr) => self.timers += 1,
                Stmt::Expr(expr) if is_constructor_trap(&expr.expr) => self.constructors += 1,
                _ => {
                    stmt.visit_mut_with(self);
                    stmts.push(stmt);
                }
            }
        }
    }

    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        // Single-statement positions such as `if (x) debugger;`.
        if matches!(stmt, Stmt::Debugger(_)) {
            *stmt = Stmt::Empty(EmptyStmt { span: DUMMY_SP });
            self.statements += 1;
            return;
        }
        stmt.visit_mut_children_with(self);
    }
}

/// `setInterval(function () { debugger; }, N)` and the arrow form.
fn is_timer_trap(expr: &Expr) -> bool {
    let Expr::Call(call) = unparen(expr) else {
        return false;
    };
    let name = match &call.callee {
        Callee::Expr(callee) => match unparen(callee) {
            Expr::Ident(id) => Some(&*id.sym),
            Expr::Member(member) => member_name(member),
            _ => None,
        },
        _ => None,
    };
    if !name.is_some_and(|n| TIMERS.contains(&n)) {
        return false;
    }
    let Some(callback) = call.args.first() else {
        return false;
    };
    match unparen(&callback.expr) {
        Expr::Fn(function) => only_debugger(function.function.body.as_ref().map(|b| &b.stmts[..])),
        Expr::Arrow(arrow) => match &*arrow.body {
            BlockStmtOrExpr::BlockStmt(block) => only_debugger(Some(block.stmts.as_slice())),
            BlockStmtOrExpr::Expr(_) => false,
        },
        _ => false,
    }
}

fn only_debugger(stmts: Option<&[Stmt]>) -> bool {
    matches!(stmts, Some([Stmt::Debugger(_)]))
}

/// A call statement that builds a function from the text `"debugger"`.
///
/// Only the statement's own call chain is inspected, so a trap nested in a
/// callback argument never takes the enclosing call with it.
fn is_constructor_trap(expr: &Expr) -> bool {
    let mut current = unparen(expr);
    if !matches!(current, Expr::Call(_)) {
        return false;
    }
    loop {
        match current {
            Expr::Call(call) => {
                if builds_debugger(call) {
                    return true;
                }
                let Callee::Expr(callee) = &call.callee else {
                    return false;
                };
                current = unparen(callee);
            }
            Expr::Member(member) => current = unparen(&member.obj),
            _ => return false,
        }
    }
}

/// `x.constructor("debugger")`.
fn builds_debugger(call: &CallExpr) -> bool {
    matches!(method_call(call), Some((_, "constructor")))
        && call
            .args
            .first()
            .and_then(|arg| as_string(&arg.expr))
            .is_some_and(|text| text.trim() == "debugger")
}

/// Collects names of functions that look like character-code decryptors.
#[derive(Default)]
struct DecryptHelpers {
    names: HashSet<String>,
}

impl DecryptHelpers {
    fn consider(&mut self, name: &str, function: &Function) {
        if function.params.len() != 1 || !matches!(function.params[0].pat, Pat::Ident(_)) {
            return;
        }
        let mut shape = CharCodeShape::default();
        function.body.visit_with(&mut shape);
        if shape.from_char_code && (shape.char_code_at || shape.bit_ops) {
            log::debug!("decrypt helper `{name}`");
            self.names.insert(name.to_string());
        }
    }
}

impl Visit for DecryptHelpers {
    fn visit_fn_decl(&mut self, n: &FnDecl) {
        self.consider(&n.ident.sym, &n.function);
        n.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        if let (Pat::Ident(binding), Some(Expr::Fn(function))) =
            (&n.name, n.init.as_deref().map(unparen))
        {
            self.consider(&binding.id.sym, &function.function);
        }
        n.visit_children_with(self);
    }
}

#[derive(Default)]
struct CharCodeShape {
    from_char_code: bool,
    char_code_at: bool,
    bit_ops: bool,
}

impl Visit for CharCodeShape {
    fn visit_member_expr(&mut self, n: &MemberExpr) {
        match member_name(n) {
            Some("fromCharCode") if as_ident(&n.obj) == Some("String") => {
                self.from_char_code = true;
            }
            Some("charCodeAt") => self.char_code_at = true,
            _ => {}
        }
        n.visit_children_with(self);
    }

    fn visit_bin_expr(&mut self, n: &BinExpr) {
        if matches!(
            n.op,
            BinaryOp::BitXor | BinaryOp::LShift | BinaryOp::RShift | BinaryOp::ZeroFillRShift
        ) {
            self.bit_ops = true;
        }
        n.visit_children_with(self);
    }
}

struct Placeholders<'a> {
    helpers: &'a HashSet<String>,
    replaced: usize,
}

impl VisitMut for Placeholders<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let Expr::Call(call) = expr else {
            return;
        };
        let Some(name) = callee_name(call).filter(|n| self.helpers.contains(*n)) else {
            return;
        };
        let constant = matches!(
            call.args.as_slice(),
            [arg] if arg.spread.is_none()
                && matches!(unparen(&arg.expr), Expr::Lit(Lit::Str(_) | Lit::Num(_)))
        );
        if constant {
            let placeholder = format!("[decrypted:{name}]");
            *expr = string(&placeholder);
            self.replaced += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::config::EngineConfig;

    fn run(source: &str, flags: OptionFlags) -> (String, PassContext, PassReport) {
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), flags);
        let report = VendorSignaturePass::new().run(&mut tree, &ctx).unwrap();
        (tree.print().unwrap(), ctx, report)
    }

    fn kinds(report: &PassReport) -> Vec<TransformationKind> {
        report.records().iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_calculate_confidence() {
        assert_eq!(calculate_confidence(0), 0.0);
        assert!((calculate_confidence(3) - 0.6).abs() < 1e-9);
        assert_eq!(calculate_confidence(5), 1.0);
        assert_eq!(calculate_confidence(50), 1.0);
        for n in 0..10 {
            assert!(calculate_confidence(n) <= calculate_confidence(n + 1));
        }
    }

    #[test]
    fn test_statement_and_timer_are_distinct() {
        let (code, ctx, report) = run(
            "debugger; setInterval(function () { debugger; }, 4000); work();",
            OptionFlags::empty(),
        );
        assert_eq!(code.trim(), "work();");
        assert_eq!(
            kinds(&report),
            vec![
                TransformationKind::DebuggerStatementRemoval,
                TransformationKind::DebuggerTimerRemoval
            ]
        );
        assert!(ctx.has_technique(&Technique::SelfDefending));
    }

    #[test]
    fn test_single_trap_does_not_claim_technique() {
        let (_, ctx, report) = run("debugger; work();", OptionFlags::empty());
        assert_eq!(kinds(&report), vec![TransformationKind::DebuggerStatementRemoval]);
        assert!(!ctx.has_technique(&Technique::SelfDefending));
    }

    #[test]
    fn test_timer_with_work_is_kept() {
        let (code, _, report) = run(
            "setTimeout(() => { poll(); }, 10);",
            OptionFlags::empty(),
        );
        assert!(code.contains("poll()"));
        assert!(report.is_empty());
    }

    #[test]
    fn test_arrow_timer_trap() {
        let (code, _, report) = run("window.setTimeout(() => { debugger; }, 10);", OptionFlags::empty());
        assert!(!code.contains("setTimeout"));
        assert_eq!(kinds(&report), vec![TransformationKind::DebuggerTimerRemoval]);
    }

    #[test]
    fn test_constructor_trap() {
        let (code, _, report) = run(
            r#"(function () {}).constructor("debugger").call("action"); go();"#,
            OptionFlags::empty(),
        );
        assert_eq!(code.trim(), "go();");
        assert_eq!(kinds(&report), vec![TransformationKind::DebuggerConstructorRemoval]);
    }

    #[test]
    fn test_constructor_trap_inside_callback_keeps_enclosing_call() {
        let (code, _, report) = run(
            r#"setup(function () {
                important();
                (function () {}).constructor("debugger").call("action");
                more();
            });"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("setup("));
        assert!(code.contains("important()"));
        assert!(code.contains("more()"));
        assert!(!code.contains("debugger"));
        assert_eq!(kinds(&report), vec![TransformationKind::DebuggerConstructorRemoval]);
    }

    #[test]
    fn test_constructor_trap_as_argument_is_not_a_trap_statement() {
        let (code, _, report) = run(
            r#"register((function () {}).constructor("debugger"));"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("register("));
        assert!(report.is_empty());
    }

    #[test]
    fn test_nested_debugger_in_single_statement_position() {
        let (code, _, _) = run("if (x) debugger; else go();", OptionFlags::empty());
        assert!(!code.contains("debugger"));
        assert!(code.contains("go()"));
    }

    #[test]
    fn test_decrypt_helper_placeholder() {
        let source = r#"
            function dec(s) {
                var out = "";
                for (var i = 0; i < s.length; i++) {
                    out += String.fromCharCode(s.charCodeAt(i) ^ 42);
                }
                return out;
            }
            use(dec("KOFFE"), dec(input));
        "#;
        let (code, ctx, report) = run(source, OptionFlags::DECRYPT_STRINGS);
        assert!(code.contains(r#"use("[decrypted:dec]", dec(input))"#));
        assert_eq!(kinds(&report), vec![TransformationKind::DecryptHelperPlaceholder]);
        assert!(ctx.has_technique(&Technique::DecryptHelper));

        let (code, ctx, report) = run(source, OptionFlags::empty());
        assert!(code.contains(r#"dec("KOFFE")"#));
        assert!(report.is_empty());
        assert!(ctx.has_technique(&Technique::DecryptHelper));
    }

    #[test]
    fn test_clean_code_is_untouched() {
        let (_, ctx, report) = run(
            "function greet(name) { return 'hi ' + name; } greet('x');",
            OptionFlags::DECRYPT_STRINGS,
        );
        assert!(report.is_empty());
        assert_eq!(ctx.signatures().count(), 0);
    }
}
