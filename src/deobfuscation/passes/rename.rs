//! Opt-in identifier renaming.
//!
//! Declared names in the hash-like `_0x1a2b` style are replaced by fresh
//! sequential names (`v1`, `v2`, ...) in order of first declaration. Property
//! keys and member property names are never touched. A shorthand property
//! `{ _0x1a2b }` is expanded to `{ _0x1a2b: v1 }` so the key keeps its name, and
//! names bound through shorthand destructuring are left alone entirely.

use std::collections::{HashMap, HashSet};

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{
            ArrowExpr, AssignPatProp, BindingIdent, CatchClause, ClassDecl, ClassExpr, Expr,
            FnDecl, FnExpr, Ident, KeyValueProp, MemberProp, Param, Prop, PropName,
            Script, VarDeclarator,
        },
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        config::OptionFlags,
        pass::{AstPass, PassContext, PassReport},
        passes::utils::is_hash_name,
    },
    source::SyntaxTree,
    Result,
};

/// Renames hash-like declared identifiers.
pub struct RenamePass;

impl Default for RenamePass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenamePass {
    /// Creates a new renaming pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for RenamePass {
    fn name(&self) -> &'static str {
        "identifier-renaming"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::IdentifierRenaming
    }

    fn should_run(&self, ctx: &PassContext) -> bool {
        ctx.has(OptionFlags::RENAME_VARIABLES)
    }

    fn description(&self) -> &'static str {
        "Renames _0x-style declared identifiers to sequential names"
    }

    fn run(&self, tree: &mut SyntaxTree, _ctx: &PassContext) -> Result<PassReport> {
        let mut declared = DeclaredNames::default();
        tree.script().visit_with(&mut declared);

        let mut used = AllNames::default();
        tree.script().visit_with(&mut used);

        let mut mapping = HashMap::new();
        let mut next = 1;
        for name in declared
            .order
            .iter()
            .filter(|n| is_hash_name(n) && !declared.excluded.contains(*n))
        {
            let fresh = loop {
                let candidate = format!("v{next}");
                next += 1;
                if !used.names.contains(&candidate) {
                    break candidate;
                }
            };
            mapping.insert(name.clone(), fresh);
        }

        let mut report = PassReport::new();
        if mapping.is_empty() {
            return Ok(report);
        }

        let count = mapping.len();
        tree.script_mut().visit_mut_with(&mut Renamer { mapping });
        report.changed(
            TransformationKind::IdentifierRenaming,
            count,
            format!("renamed {count} identifiers"),
        );
        Ok(report)
    }
}

/// Every name declared in `script`, in declaration order.
pub(crate) fn declared_names(script: &Script) -> Vec<String> {
    let mut declared = DeclaredNames::default();
    script.visit_with(&mut declared);
    declared.order
}

/// Collects declared names in declaration order.
#[derive(Default)]
struct DeclaredNames {
    order: Vec<String>,
    seen: HashSet<String>,
    excluded: HashSet<String>,
}

impl DeclaredNames {
    fn declare(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.order.push(name.to_string());
        }
    }

    fn declare_bindings<N: VisitWith<BindingCollector>>(&mut self, node: &N) {
        let mut bindings = BindingCollector::default();
        node.visit_with(&mut bindings);
        for name in bindings.names {
            self.declare(&name);
        }
    }
}

impl Visit for DeclaredNames {
    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        self.declare_bindings(&n.name);
        n.visit_children_with(self);
    }

    fn visit_param(&mut self, n: &Param) {
        self.declare_bindings(&n.pat);
        n.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, n: &ArrowExpr) {
        for param in &n.params {
            self.declare_bindings(param);
        }
        n.visit_children_with(self);
    }

    fn visit_catch_clause(&mut self, n: &CatchClause) {
        if let Some(param) = &n.param {
            self.declare_bindings(param);
        }
        n.visit_children_with(self);
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        self.declare(&n.ident.sym);
        n.visit_children_with(self);
    }

    fn visit_fn_expr(&mut self, n: &FnExpr) {
        if let Some(ident) = &n.ident {
            self.declare(&ident.sym);
        }
        n.visit_children_with(self);
    }

    fn visit_class_decl(&mut self, n: &ClassDecl) {
        self.declare(&n.ident.sym);
        n.visit_children_with(self);
    }

    fn visit_class_expr(&mut self, n: &ClassExpr) {
        if let Some(ident) = &n.ident {
            self.declare(&ident.sym);
        }
        n.visit_children_with(self);
    }

    fn visit_assign_pat_prop(&mut self, n: &AssignPatProp) {
        let mut keys = IdentCollector::default();
        n.key.visit_with(&mut keys);
        self.excluded.extend(keys.names);
        n.visit_children_with(self);
    }
}

/// Collects names bound by a pattern, skipping default-value expressions.
#[derive(Default)]
struct BindingCollector {
    names: Vec<String>,
}

impl Visit for BindingCollector {
    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        self.names.push(n.id.sym.to_string());
    }

    fn visit_expr(&mut self, _: &Expr) {}
}

#[derive(Default)]
struct IdentCollector {
    names: Vec<String>,
}

impl Visit for IdentCollector {
    fn visit_ident(&mut self, n: &Ident) {
        self.names.push(n.sym.to_string());
    }
}

/// Every identifier-like name in the program, property names included.
#[derive(Default)]
struct AllNames {
    names: HashSet<String>,
}

impl Visit for AllNames {
    fn visit_ident(&mut self, n: &Ident) {
        self.names.insert(n.sym.to_string());
    }
}

struct Renamer {
    mapping: HashMap<String, String>,
}

impl VisitMut for Renamer {
    fn visit_mut_ident(&mut self, n: &mut Ident) {
        if let Some(fresh) = self.mapping.get(&*n.sym) {
            n.sym = fresh.as_str().into();
        }
    }

    fn visit_mut_member_prop(&mut self, n: &mut MemberProp) {
        if let MemberProp::Computed(computed) = n {
            computed.visit_mut_with(self);
        }
    }

    fn visit_mut_prop_name(&mut self, n: &mut PropName) {
        if let PropName::Computed(computed) = n {
            computed.visit_mut_with(self);
        }
    }

    fn visit_mut_prop(&mut self, n: &mut Prop) {
        if let Prop::Shorthand(ident) = n {
            if let Some(fresh) = self.mapping.get(&*ident.sym) {
                let key = ident.clone();
                *n = Prop::KeyValue(KeyValueProp {
                    key: PropName::Ident(key),
                    value: Box::new(Expr::Ident(Ident::new(fresh.as_str().into(), DUMMY_SP))),
                });
                return;
            }
        }
        n.visit_mut_children_with(self);
    }
}
