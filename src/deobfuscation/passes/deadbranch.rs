//! Dead-branch elimination.
//!
//! Replaces `if` statements and conditional expressions whose test is a
//! boolean or numeric literal by the branch that is taken:
//!
//! ```text
//! // Before
//! if (!![]) { run(); } else { trap(); }
//! var mode = 0 ? "debug" : "release";
//!
//! // After
//! run();
//! var mode = "release";
//! ```
//!
//! Branch contents are spliced into the enclosing statement list only when
//! they hold no block-scoped declarations; otherwise the block is kept. `var`
//! names declared in a dropped branch stay declared, and so do the names of
//! functions declared in it, which sloppy-mode scripts hoist as `var` too.
//!
//! A conditional called as a function keeps its receiver unbound:
//! `(1 ? obj.f : g)()` becomes `(0, obj.f)()`, not `obj.f()`.

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{
            ArrowExpr, BindingIdent, BlockStmt, Callee, Decl, EmptyStmt, Expr, FnDecl, Function,
            Ident, Invalid, OptChainBase, Pat, SeqExpr, Stmt, VarDecl, VarDeclKind, VarDeclarator,
        },
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        pass::{AstPass, PassContext, PassReport},
        passes::utils::{has_block_scoped_decl, number, parenthesize, static_truthiness, unparen},
    },
    source::SyntaxTree,
    Result,
};

/// Removes statically decided branches.
pub struct DeadBranchPass;

impl Default for DeadBranchPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadBranchPass {
    /// Creates a new dead-branch elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for DeadBranchPass {
    fn name(&self) -> &'static str {
        "dead-branch-elimination"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::DeadBranchElimination
    }

    fn description(&self) -> &'static str {
        "Keeps only the taken arm of literal-tested if statements and conditionals"
    }

    fn run(&self, tree: &mut SyntaxTree, _ctx: &PassContext) -> Result<PassReport> {
        let mut eliminator = Eliminator {
            eliminated: 0,
            in_callee: false,
        };
        tree.script_mut().visit_mut_with(&mut eliminator);

        let mut report = PassReport::new();
        report.changed(
            TransformationKind::DeadBranchElimination,
            eliminator.eliminated,
            format!("removed {} dead branches", eliminator.eliminated),
        );
        Ok(report)
    }
}

struct Eliminator {
    eliminated: usize,
    /// The expression being visited is the callee of a call.
    in_callee: bool,
}

impl Eliminator {
    /// Pushes `stmt` onto `out`, replacing a decidable `if` by its taken arm.
    fn flatten_into(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::If(if_stmt) if static_truthiness(&if_stmt.test).is_some() => {
                let taken = static_truthiness(&if_stmt.test).unwrap_or(true);
                self.eliminated += 1;

                let (kept, dropped) = if taken {
                    (Some(*if_stmt.cons), if_stmt.alt.map(|alt| *alt))
                } else {
                    (if_stmt.alt.map(|alt| *alt), Some(*if_stmt.cons))
                };

                if let Some(dropped) = dropped {
                    if let Some(decl) = hoisted_declaration(&dropped) {
                        out.push(decl);
                    }
                }

                match kept {
                    Some(Stmt::Block(block)) if !has_block_scoped_decl(&block.stmts) => {
                        for inner in block.stmts {
                            self.flatten_into(inner, out);
                        }
                    }
                    Some(Stmt::Decl(decl)) if !matches!(decl, Decl::Var(_)) => {
                        let mut block = Stmt::Block(BlockStmt {
                            span: DUMMY_SP,
                            stmts: vec![Stmt::Decl(decl)],
                        });
                        block.visit_mut_with(self);
                        out.push(block);
                    }
                    Some(other) => self.flatten_into(other, out),
                    None => {}
                }
            }
            Stmt::Empty(_) => {}
            mut other => {
                other.visit_mut_with(self);
                out.push(other);
            }
        }
    }
}

impl VisitMut for Eliminator {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        let original = std::mem::take(stmts);
        let mut out = Vec::with_capacity(original.len());
        for stmt in original {
            self.flatten_into(stmt, &mut out);
        }
        *stmts = out;
    }

    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        // Single-statement positions (`while (x) if (1) a();`).
        if let Stmt::If(if_stmt) = stmt {
            if static_truthiness(&if_stmt.test).is_some() {
                let decided = std::mem::replace(stmt, Stmt::Empty(EmptyStmt { span: DUMMY_SP }));
                let mut out = Vec::new();
                self.flatten_into(decided, &mut out);
                *stmt = Stmt::Block(BlockStmt {
                    span: DUMMY_SP,
                    stmts: out,
                });
                return;
            }
        }
        stmt.visit_mut_children_with(self);
    }

    fn visit_mut_callee(&mut self, callee: &mut Callee) {
        match callee {
            Callee::Expr(expr) => {
                self.in_callee = true;
                expr.visit_mut_with(self);
                self.in_callee = false;
            }
            other => other.visit_mut_children_with(self),
        }
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        let in_callee = std::mem::take(&mut self.in_callee);
        // `((c ? a.f : g))()` is still a call through the inner conditional.
        self.in_callee = in_callee && matches!(expr, Expr::Paren(_));
        expr.visit_mut_children_with(self);
        self.in_callee = false;

        if let Expr::Cond(cond) = expr {
            if let Some(taken) = static_truthiness(&cond.test) {
                let arm = if taken { &mut cond.cons } else { &mut cond.alt };
                let branch = std::mem::replace(&mut **arm, Expr::Invalid(Invalid { span: DUMMY_SP }));
                *expr = if in_callee && is_method_reference(&branch) {
                    unbound(branch)
                } else {
                    parenthesize(branch)
                };
                self.eliminated += 1;
            }
        }
    }
}

/// `obj.f` or `obj?.f`, which would bind `this` when called directly.
fn is_method_reference(expr: &Expr) -> bool {
    match unparen(expr) {
        Expr::Member(_) | Expr::SuperProp(_) => true,
        Expr::OptChain(chain) => matches!(&*chain.base, OptChainBase::Member(_)),
        _ => false,
    }
}

/// `(0, expr)`, which reads `expr` without binding it as a receiver.
fn unbound(expr: Expr) -> Expr {
    parenthesize(Expr::Seq(SeqExpr {
        span: DUMMY_SP,
        exprs: vec![Box::new(number(0.0)), Box::new(expr)],
    }))
}

/// Builds `var a, b;` for every `var` or function name declared in `dropped`.
fn hoisted_declaration(dropped: &Stmt) -> Option<Stmt> {
    let mut collector = VarNames::default();
    dropped.visit_with(&mut collector);
    if collector.names.is_empty() {
        return None;
    }

    let decls = collector
        .names
        .into_iter()
        .map(|name| VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(BindingIdent::from(Ident::new(name.into(), DUMMY_SP))),
            init: None,
            definite: false,
        })
        .collect();

    Some(Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        kind: VarDeclKind::Var,
        declare: false,
        decls,
    }))))
}

/// Collects `var`-declared and function-declared names outside nested functions.
#[derive(Default)]
struct VarNames {
    names: Vec<String>,
}

impl Visit for VarNames {
    fn visit_var_decl(&mut self, n: &VarDecl) {
        if n.kind == VarDeclKind::Var {
            for decl in &n.decls {
                let mut bindings = BindingNames::default();
                decl.name.visit_with(&mut bindings);
                for name in bindings.names {
                    if !self.names.contains(&name) {
                        self.names.push(name);
                    }
                }
            }
        }
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        let name = n.ident.sym.to_string();
        if !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}

#[derive(Default)]
struct BindingNames {
    names: Vec<String>,
}

impl Visit for BindingNames {
    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        self.names.push(n.id.sym.to_string());
    }

    fn visit_expr(&mut self, _: &Expr) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::config::{EngineConfig, OptionFlags};

    fn eliminate(source: &str) -> (String, PassReport) {
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), OptionFlags::empty());
        let report = DeadBranchPass::new().run(&mut tree, &ctx).unwrap();
        (tree.print().unwrap(), report)
    }

    #[test]
    fn test_keeps_taken_branch() {
        let (code, report) = eliminate("if (true) { keep(); } else { drop(); }");
        assert!(code.contains("keep()"));
        assert!(!code.contains("drop()"));
        assert!(report.is_changed());
    }

    #[test]
    fn test_numeric_false_takes_else() {
        let (code, _) = eliminate("if (0) { drop(); } else { keep(); }");
        assert!(code.contains("keep()"));
        assert!(!code.contains("drop()"));
    }

    #[test]
    fn test_missing_else_removes_statement() {
        let (code, _) = eliminate("if (false) drop(); after();");
        assert!(!code.contains("drop()"));
        assert!(code.contains("after()"));
    }

    #[test]
    fn test_block_scoped_branch_is_kept_as_block() {
        let (code, _) = eliminate("if (1) { let x = 1; use(x); }");
        assert!(code.contains("let x = 1"));
        assert!(code.contains('{'));
        assert!(!code.contains("if"));
    }

    #[test]
    fn test_var_from_dropped_branch_stays_declared() {
        let (code, _) = eliminate("if (false) { var hidden = 1; } log(hidden);");
        assert!(code.contains("var hidden;"));
        assert!(!code.contains("= 1"));
    }

    #[test]
    fn test_function_from_dropped_branch_stays_declared() {
        let (code, _) = eliminate("if (false) { function h() {} } else { go(); } log(typeof h);");
        assert!(code.contains("var h;"));
        assert!(code.contains("go()"));
        assert!(!code.contains("function h"));
    }

    #[test]
    fn test_inner_function_names_are_not_hoisted() {
        let (code, _) = eliminate("if (0) { run(function () { function inner() {} }); }");
        assert!(!code.contains("inner"));
    }

    #[test]
    fn test_conditional_callee_keeps_receiver_unbound() {
        let (code, report) = eliminate("(1 ? obj.f : g)(); var h = 1 ? obj.f : g; (0 ? a : b)();");
        let compact: String = code.split_whitespace().collect();
        assert!(compact.contains("(0,obj.f)();"));
        assert!(compact.contains("varh=obj.f;"));
        assert!(compact.contains("b();"));
        assert!(report.is_changed());
    }

    #[test]
    fn test_conditional_expression() {
        let (code, _) = eliminate(r#"var mode = 0 ? "debug" : "release";"#);
        assert!(code.contains("release"));
        assert!(!code.contains("debug"));
    }

    #[test]
    fn test_undecidable_test_untouched() {
        let (code, report) = eliminate("if (flag) { a(); } else { b(); }");
        assert!(code.contains("if (flag)"));
        assert!(report.is_empty());
    }

    #[test]
    fn test_nested_statement_position() {
        let (code, _) = eliminate("while (x) if (1) a(); else b();");
        assert!(code.contains("a()"));
        assert!(!code.contains("b()"));
    }
}
