//! Trivial-expression simplification.
//!
//! Rewrites the boolean encodings minifiers and obfuscators favour, and drops
//! parentheses that only wrap a literal:
//!
//! | Before     | After     |
//! |------------|-----------|
//! | `!0`       | `true`    |
//! | `!1`       | `false`   |
//! | `![]`      | `false`   |
//! | `!![]`     | `true`    |
//! | `("x")`    | `"x"`     |
//! | `o["key"]` | `o.key` (aggressive only) |
//!
//! Parentheses around a number used as a member object (`(5).toFixed()`) and
//! around a string used as a statement (`("use strict");`) are kept, since
//! removing them would change how the code parses.

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{Expr, ExprStmt, Ident, Lit, MemberExpr, MemberProp, UnaryExpr, UnaryOp},
        visit::{VisitMut, VisitMutWith},
    },
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        config::OptionFlags,
        pass::{AstPass, PassContext, PassReport},
        passes::utils::{as_string, boolean, is_identifier_name, static_truthiness, unparen},
    },
    source::SyntaxTree,
    Result,
};

/// Simplifies trivial expressions.
pub struct SimplifyPass;

impl Default for SimplifyPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SimplifyPass {
    /// Creates a new simplification pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for SimplifyPass {
    fn name(&self) -> &'static str {
        "expression-simplification"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::ExpressionSimplification
    }

    fn description(&self) -> &'static str {
        "Rewrites boolean encodings and redundant parentheses"
    }

    fn run(&self, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<PassReport> {
        let mut simplifier = Simplifier {
            aggressive: ctx.has(OptionFlags::AGGRESSIVE),
            simplified: 0,
        };
        tree.script_mut().visit_mut_with(&mut simplifier);

        let mut report = PassReport::new();
        report.changed(
            TransformationKind::ExpressionSimplification,
            simplifier.simplified,
            format!("simplified {} expressions", simplifier.simplified),
        );
        Ok(report)
    }
}

struct Simplifier {
    aggressive: bool,
    simplified: usize,
}

impl VisitMut for Simplifier {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        match expr {
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Bang,
                arg,
                ..
            }) => {
                let negated = match unparen(arg) {
                    Expr::Lit(Lit::Num(_) | Lit::Bool(_)) => static_truthiness(arg).map(|v| !v),
                    Expr::Array(array) if array.elems.is_empty() => Some(false),
                    _ => None,
                };
                if let Some(value) = negated {
                    *expr = boolean(value);
                    self.simplified += 1;
                }
            }
            Expr::Paren(paren) if matches!(&*paren.expr, Expr::Lit(_)) => {
                let inner = std::mem::replace(
                    &mut *paren.expr,
                    Expr::Lit(Lit::Bool(swc_core::ecma::ast::Bool {
                        span: DUMMY_SP,
                        value: false,
                    })),
                );
                *expr = inner;
                self.simplified += 1;
            }
            _ => {}
        }
    }

    fn visit_mut_member_expr(&mut self, member: &mut MemberExpr) {
        match &mut *member.obj {
            Expr::Paren(paren) if matches!(unparen(&paren.expr), Expr::Lit(Lit::Num(_))) => {
                paren.expr.visit_mut_with(self);
                member.prop.visit_mut_with(self);
            }
            _ => member.visit_mut_children_with(self),
        }

        if self.aggressive {
            if let MemberProp::Computed(computed) = &member.prop {
                if let Some(name) = as_string(&computed.expr).filter(|n| is_identifier_name(n)) {
                    member.prop = MemberProp::Ident(Ident::new(name.into(), DUMMY_SP));
                    self.simplified += 1;
                }
            }
        }
    }

    fn visit_mut_expr_stmt(&mut self, stmt: &mut ExprStmt) {
        match &mut *stmt.expr {
            Expr::Paren(paren) if matches!(&*paren.expr, Expr::Lit(Lit::Str(_))) => {}
            _ => stmt.visit_mut_children_with(self),
        }
    }
}
