//! String-array resolution.
//!
//! Obfuscators move every string literal into one script-level array and
//! replace each use by an index into it, often through an accessor function
//! and after rotating the array at load time:
//!
//! ```text
//! // Before
//! var _0x5a = ["log", "Hello"];
//! (function (a, n) { while (--n) { a.push(a.shift()); } })(_0x5a, 2);
//! function _0x1b(i) { i = i - 0; return _0x5a[i]; }
//! console[_0x1b(1)](_0x1b(0));
//!
//! // After
//! var _0x5a = ["Hello", "log"];
//! function _0x1b(i) { i = i - 0; return _0x5a[i]; }
//! console["log"]("Hello");
//! ```
//!
//! A candidate table is a script-level variable initialised with an array of
//! string literals that is never written, never redeclared and never passed
//! anywhere except as the first argument of a rotation call. Reads with a
//! constant index, and calls with a constant argument to an accessor of the
//! form `function f(i) { i = i - K; return table[i]; }` (or an alias of one),
//! are replaced by the string they produce.
//!
//! Rotation calls are executed by the bounded
//! [`RotationSimulator`](super::rotation::RotationSimulator). When it
//! succeeds, the table is rewritten in its rotated order and the call removed.
//! When it fails, the table is reported as unresolved and nothing that depends
//! on its order is inlined. In aggressive mode, accessors and tables left
//! without references are removed.

use std::collections::HashMap;

use swc_core::ecma::{
    ast::{
        ArrayLit, AssignExpr, AssignOp, BinaryOp, BindingIdent, CallExpr, Callee, Decl, Expr,
        ExprOrSpread, FnDecl, Function, Ident, Lit, MemberExpr, MemberProp, Pat, PropName, Script,
        Stmt, UnaryExpr, UnaryOp, UpdateExpr, VarDeclarator,
    },
    visit::{Visit, VisitMut, VisitMutWith, VisitWith},
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        config::OptionFlags,
        detection::{DetectionEvidence, DetectionScore, DetectionSignature, Technique},
        pass::{AstPass, PassContext, PassReport},
        passes::{
            constants::fold_numeric,
            rotation::{key_index, string_to_number, Accessor, RotationSimulator},
            utils::{
                as_ident, as_number, computed_index, count_refs, is_hash_name, method_call,
                resolve_chain, string, unparen, AssignTargetProbe,
            },
        },
    },
    source::SyntaxTree,
    Result,
};

/// Array methods that modify the array in place.
const MUTATORS: &[&str] = &[
    "push",
    "pop",
    "shift",
    "unshift",
    "splice",
    "reverse",
    "sort",
    "fill",
    "copyWithin",
];

/// Resolves string-array indirection.
pub struct StringArrayPass;

impl Default for StringArrayPass {
    fn default() -> Self {
        Self::new()
    }
}

impl StringArrayPass {
    /// Creates a new string-array pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for StringArrayPass {
    fn name(&self) -> &'static str {
        "string-array-resolution"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::StringArrayExtraction
    }

    fn should_run(&self, ctx: &PassContext) -> bool {
        ctx.has(OptionFlags::DECRYPT_STRINGS)
    }

    fn description(&self) -> &'static str {
        "Inlines string-array lookups and undoes load-time rotation"
    }

    fn run(&self, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<PassReport> {
        let mut report = PassReport::new();
        let names: Vec<String> = find_tables(tree.script())
            .into_iter()
            .map(|t| t.name)
            .collect();

        for name in names {
            // Positions shift as earlier tables are resolved.
            let Some(table) = find_tables(tree.script())
                .into_iter()
                .find(|t| t.name == name)
            else {
                continue;
            };
            resolve_table(tree, ctx, &table, &mut report)?;
        }
        Ok(report)
    }
}

/// A script-level string table.
#[derive(Debug, Clone)]
struct Table {
    name: String,
    stmt: usize,
    declarator: usize,
    values: Vec<String>,
}

/// A rotation call `(function (a, n) { ... })(table, N)`.
struct RotationCall {
    stmt: usize,
    function: Function,
    count: f64,
}

fn resolve_table(
    tree: &mut SyntaxTree,
    ctx: &PassContext,
    table: &Table,
    report: &mut PassReport,
) -> Result<()> {
    let rotation = find_rotation(tree.script(), &table.name);

    let mut usage = TableUsage::new(&table.name);
    for (index, stmt) in tree.script().body.iter().enumerate() {
        if rotation.as_ref().is_some_and(|r| r.stmt == index) {
            continue;
        }
        stmt.visit_with(&mut usage);
    }
    if !usage.is_read_only() {
        log::debug!("array `{}` is not a constant string table", table.name);
        return Ok(());
    }

    let accessors = find_accessors(tree.script(), &table.name);
    if usage.reads == 0 && accessors.is_empty() && rotation.is_none() {
        return Ok(());
    }

    let score = DetectionScore::new();
    score.add(DetectionEvidence::StructuralPattern {
        description: format!("constant string table `{}`", table.name),
        confidence: 30,
    });
    if is_hash_name(&table.name) {
        score.add(DetectionEvidence::NamingPattern {
            pattern: "_0x[0-9a-f]+".to_string(),
            match_count: 1,
            confidence_per_match: 20,
        });
    }
    if !accessors.is_empty() {
        score.add(DetectionEvidence::StructuralPattern {
            description: format!("{} accessor functions", accessors.len()),
            confidence: 30,
        });
    }
    ctx.add_signature_once(DetectionSignature::from_score(Technique::StringArray, &score));

    let mut values = table.values.clone();
    if let Some(rotation) = rotation {
        let rotation_score = DetectionScore::new();
        rotation_score.add(DetectionEvidence::StructuralPattern {
            description: format!("push/shift rotation of `{}`", table.name),
            confidence: 80,
        });
        ctx.add_signature_once(DetectionSignature::from_score(
            Technique::StringArrayRotation,
            &rotation_score,
        ));

        let simulator = RotationSimulator::new(
            &table.name,
            values,
            &accessors,
            ctx.config.rotation_max_steps,
        );
        match simulator.run(&rotation.function, rotation.count) {
            Ok(rotated) => {
                values = rotated.table;
                rewrite_table(tree.script_mut(), table, &values);
                tree.script_mut().body.remove(rotation.stmt);
                report.changed(
                    TransformationKind::StringArrayReorder,
                    1,
                    format!(
                        "rotated `{}` {} times in {} steps",
                        table.name, rotated.rotations, rotated.steps
                    ),
                );
            }
            Err(err) => {
                ctx.unresolved(
                    TransformationKind::StringArrayReorder,
                    format!("rotation of `{}` not resolved: {err}", table.name),
                );
                return Ok(());
            }
        }
    }

    let mut inliner = Inliner {
        table: &table.name,
        values: &values,
        accessors: &accessors,
        inlined: 0,
    };
    tree.script_mut().visit_mut_with(&mut inliner);
    report.changed(
        TransformationKind::StringArrayExtraction,
        inliner.inlined,
        format!("inlined {} lookups into `{}`", inliner.inlined, table.name),
    );

    if ctx.has(OptionFlags::AGGRESSIVE) {
        let mut scaffolding: Vec<String> = accessors.keys().cloned().collect();
        scaffolding.sort();
        scaffolding.push(table.name.clone());
        let removed = remove_unreferenced(tree.script_mut(), &scaffolding);
        report.changed(
            TransformationKind::ScaffoldingRemoval,
            removed,
            format!("removed {removed} unreferenced declarations of `{}`", table.name),
        );
    }
    Ok(())
}

/// Finds script-level `var t = ["a", "b", ...]` declarations.
fn find_tables(script: &Script) -> Vec<Table> {
    let mut tables = Vec::new();
    for (stmt, item) in script.body.iter().enumerate() {
        let Stmt::Decl(Decl::Var(var)) = item else {
            continue;
        };
        for (declarator, decl) in var.decls.iter().enumerate() {
            let Pat::Ident(binding) = &decl.name else {
                continue;
            };
            let Some(Expr::Array(array)) = decl.init.as_deref() else {
                continue;
            };
            if let Some(values) = string_elements(array) {
                tables.push(Table {
                    name: binding.id.sym.to_string(),
                    stmt,
                    declarator,
                    values,
                });
            }
        }
    }
    tables
}

fn string_elements(array: &ArrayLit) -> Option<Vec<String>> {
    if array.elems.is_empty() {
        return None;
    }
    array
        .elems
        .iter()
        .map(|elem| match elem {
            Some(ExprOrSpread { spread: None, expr }) => match &**expr {
                Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn rewrite_table(script: &mut Script, table: &Table, values: &[String]) {
    let Some(Stmt::Decl(Decl::Var(var))) = script.body.get_mut(table.stmt) else {
        return;
    };
    let Some(decl) = var.decls.get_mut(table.declarator) else {
        return;
    };
    if let Some(Expr::Array(array)) = decl.init.as_deref_mut() {
        array.elems = values
            .iter()
            .map(|v| {
                Some(ExprOrSpread {
                    spread: None,
                    expr: Box::new(string(v)),
                })
            })
            .collect();
    }
}

/// Finds a script-level rotation call whose first argument is `table`.
fn find_rotation(script: &Script, table: &str) -> Option<RotationCall> {
    script.body.iter().enumerate().find_map(|(stmt, item)| {
        let Stmt::Expr(expr_stmt) = item else {
            return None;
        };
        let mut expr = unparen(&expr_stmt.expr);
        if let Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang,
            arg,
            ..
        }) = expr
        {
            expr = unparen(arg);
        }
        let Expr::Call(call) = expr else {
            return None;
        };
        let Callee::Expr(callee) = &call.callee else {
            return None;
        };
        let Expr::Fn(function) = unparen(callee) else {
            return None;
        };
        if call.args.len() != 2 || as_ident(&call.args[0].expr) != Some(table) {
            return None;
        }
        let count = as_number(&call.args[1].expr)?;

        let mut probe = RotatesArray::default();
        function.function.visit_with(&mut probe);
        probe.found.then(|| RotationCall {
            stmt,
            function: (*function.function).clone(),
            count,
        })
    })
}

/// Looks for `x.push(x.shift())`.
#[derive(Default)]
struct RotatesArray {
    found: bool,
}

impl Visit for RotatesArray {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Some((_, "push")) = method_call(call) {
            if let Some(Expr::Call(inner)) = call.args.first().map(|a| unparen(&a.expr)) {
                if matches!(method_call(inner), Some((_, "shift"))) {
                    self.found = true;
                }
            }
        }
        call.visit_children_with(self);
    }
}

/// Classifies every use of a table name.
struct TableUsage<'a> {
    name: &'a str,
    declarations: usize,
    reads: usize,
    writes: usize,
    escapes: usize,
}

impl<'a> TableUsage<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            declarations: 0,
            reads: 0,
            writes: 0,
            escapes: 0,
        }
    }

    fn is_read_only(&self) -> bool {
        self.declarations == 1 && self.writes == 0 && self.escapes == 0
    }

    fn is_table(&self, expr: &Expr) -> bool {
        as_ident(expr) == Some(self.name)
    }

    fn is_table_member(&self, expr: &Expr) -> bool {
        matches!(unparen(expr), Expr::Member(m) if self.is_table(&m.obj))
    }
}

impl Visit for TableUsage<'_> {
    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        match &n.name {
            Pat::Ident(binding) if &*binding.id.sym == self.name => {
                self.declarations += 1;
                n.init.visit_with(self);
            }
            _ => n.visit_children_with(self),
        }
    }

    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        if &*n.id.sym == self.name {
            self.declarations += 1;
        }
    }

    fn visit_ident(&mut self, n: &Ident) {
        if &*n.sym == self.name {
            self.escapes += 1;
        }
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if self.is_table(&n.obj) {
            self.reads += 1;
        } else {
            n.obj.visit_with(self);
        }
        if let MemberProp::Computed(computed) = &n.prop {
            computed.visit_with(self);
        }
    }

    fn visit_prop_name(&mut self, n: &PropName) {
        if let PropName::Computed(computed) = n {
            computed.visit_with(self);
        }
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        let probe = AssignTargetProbe::of(n);
        if probe.simple_name() == Some(self.name) || probe.member_object() == Some(self.name) {
            self.writes += 1;
        }
        n.visit_children_with(self);
    }

    fn visit_update_expr(&mut self, n: &UpdateExpr) {
        if self.is_table_member(&n.arg) {
            self.writes += 1;
        }
        n.visit_children_with(self);
    }

    fn visit_unary_expr(&mut self, n: &UnaryExpr) {
        if n.op == UnaryOp::Delete && self.is_table_member(&n.arg) {
            self.writes += 1;
        }
        n.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if let Some((object, method)) = method_call(n) {
            if self.is_table(object) && MUTATORS.contains(&method) {
                self.writes += 1;
            }
        }
        n.visit_children_with(self);
    }
}

/// Counts every binding of a name: declarations, parameters and assignments.
struct Bindings<'a> {
    name: &'a str,
    count: usize,
}

impl Visit for Bindings<'_> {
    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        if &*n.id.sym == self.name {
            self.count += 1;
        }
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        if &*n.ident.sym == self.name {
            self.count += 1;
        }
        n.visit_children_with(self);
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        if AssignTargetProbe::of(n).simple_name() == Some(self.name) {
            self.count += 1;
        }
        n.visit_children_with(self);
    }
}

fn bound_once(script: &Script, name: &str) -> bool {
    let mut bindings = Bindings { name, count: 0 };
    script.visit_with(&mut bindings);
    bindings.count == 1
}

/// Finds script-level accessors of `table` and their aliases.
fn find_accessors(script: &Script, table: &str) -> HashMap<String, Accessor> {
    let mut accessors = HashMap::new();
    let mut aliases = HashMap::new();

    for item in &script.body {
        match item {
            Stmt::Decl(Decl::Fn(decl)) => {
                if let Some(accessor) = accessor_shape(&decl.function, table) {
                    accessors.insert(decl.ident.sym.to_string(), accessor);
                }
            }
            Stmt::Decl(Decl::Var(var)) => {
                for decl in &var.decls {
                    let Pat::Ident(binding) = &decl.name else {
                        continue;
                    };
                    let name = binding.id.sym.to_string();
                    match decl.init.as_deref().map(unparen) {
                        Some(Expr::Fn(function)) => {
                            if let Some(accessor) = accessor_shape(&function.function, table) {
                                accessors.insert(name, accessor);
                            }
                        }
                        Some(Expr::Ident(target)) => {
                            aliases.insert(name, target.sym.to_string());
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    for alias in aliases.keys() {
        let target = resolve_chain(&aliases, alias.clone());
        if let Some(accessor) = accessors.get(&target).copied() {
            accessors.insert(alias.clone(), accessor);
        }
    }

    accessors.retain(|name, _| bound_once(script, name));
    accessors
}

/// Matches `function (i) { [i = i - K;] [var t =] table[i (- K)]; return ...; }`.
fn accessor_shape(function: &Function, table: &str) -> Option<Accessor> {
    let Pat::Ident(param) = &function.params.first()?.pat else {
        return None;
    };
    let param = &*param.id.sym;
    let stmts = &function.body.as_ref()?.stmts;

    let mut arith = ParamArith::default();
    let mut temp = None;
    let (last, prefix) = stmts.split_last()?;

    for stmt in prefix {
        match stmt {
            Stmt::Expr(expr_stmt) if temp.is_none() => {
                let Expr::Assign(assign) = unparen(&expr_stmt.expr) else {
                    return None;
                };
                if AssignTargetProbe::of(assign).simple_name() != Some(param) {
                    return None;
                }
                match assign.op {
                    AssignOp::Assign => offset_from(&assign.right, param, &mut arith)?,
                    AssignOp::SubAssign => arith.apply(BinaryOp::Sub, const_number(&assign.right)?),
                    AssignOp::AddAssign => arith.apply(BinaryOp::Add, const_number(&assign.right)?),
                    _ => return None,
                }
            }
            Stmt::Decl(Decl::Var(var)) if temp.is_none() && var.decls.len() == 1 => {
                let decl = &var.decls[0];
                let Pat::Ident(binding) = &decl.name else {
                    return None;
                };
                table_read(decl.init.as_deref()?, table, param, &mut arith)?;
                temp = Some(binding.id.sym.to_string());
            }
            _ => return None,
        }
    }

    let Stmt::Return(ret) = last else {
        return None;
    };
    let arg = ret.arg.as_deref()?;
    match &temp {
        Some(name) if as_ident(arg) == Some(name.as_str()) => {}
        Some(_) => return None,
        None => table_read(arg, table, param, &mut arith)?,
    }
    Some(Accessor {
        delta: arith.delta,
        coerces_strings: arith.numeric == Some(true),
    })
}

/// Arithmetic an accessor applies to its parameter before indexing.
#[derive(Default)]
struct ParamArith {
    delta: f64,
    /// Whether the first operation was a subtraction, once one was seen.
    numeric: Option<bool>,
}

impl ParamArith {
    fn apply(&mut self, op: BinaryOp, k: f64) {
        let subtract = op == BinaryOp::Sub;
        self.numeric.get_or_insert(subtract);
        self.delta += if subtract { -k } else { k };
    }
}

/// `table[param]`, `table[param - K]` or `table[param + K]`.
fn table_read(expr: &Expr, table: &str, param: &str, arith: &mut ParamArith) -> Option<()> {
    let Expr::Member(member) = unparen(expr) else {
        return None;
    };
    if as_ident(&member.obj) != Some(table) {
        return None;
    }
    offset_from(computed_index(member)?, param, arith)
}

/// `param`, `param - K` or `param + K`, recorded into `arith`.
fn offset_from(expr: &Expr, param: &str, arith: &mut ParamArith) -> Option<()> {
    let expr = unparen(expr);
    if as_ident(expr) == Some(param) {
        return Some(());
    }
    let Expr::Bin(bin) = expr else {
        return None;
    };
    if as_ident(&bin.left) != Some(param) || !matches!(bin.op, BinaryOp::Sub | BinaryOp::Add) {
        return None;
    }
    arith.apply(bin.op, const_number(&bin.right)?);
    Some(())
}

/// Evaluates a constant numeric expression, including numeric strings.
fn const_number(expr: &Expr) -> Option<f64> {
    match unparen(expr) {
        Expr::Lit(Lit::Num(n)) => Some(n.value),
        Expr::Lit(Lit::Str(s)) => Some(string_to_number(&s.value)).filter(|v| !v.is_nan()),
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Minus,
            arg,
            ..
        }) => const_number(arg).map(|v| -v),
        Expr::Bin(bin) if bin.op != BinaryOp::Add => {
            fold_numeric(bin.op, const_number(&bin.left)?, const_number(&bin.right)?)
                .filter(|v| v.is_finite())
        }
        Expr::Bin(bin) => {
            let left = as_number(&bin.left).or_else(|| const_numeric_only(&bin.left))?;
            let right = as_number(&bin.right).or_else(|| const_numeric_only(&bin.right))?;
            Some(left + right)
        }
        _ => None,
    }
}

/// Like [`const_number`] but refuses strings, for `+` where they concatenate.
fn const_numeric_only(expr: &Expr) -> Option<f64> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(_)) => None,
        other => const_number(other),
    }
}

struct Inliner<'a> {
    table: &'a str,
    values: &'a [String],
    accessors: &'a HashMap<String, Accessor>,
    inlined: usize,
}

impl Inliner<'_> {
    fn resolve(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Member(member) if as_ident(&member.obj) == Some(self.table) => {
                let index = match unparen(computed_index(member)?) {
                    Expr::Lit(Lit::Str(key)) => key_index(&key.value)?,
                    other => const_number(other)?,
                };
                let accessor = Accessor {
                    delta: 0.0,
                    coerces_strings: false,
                };
                accessor.lookup(self.values, index).cloned()
            }
            Expr::Call(call) => {
                let Callee::Expr(callee) = &call.callee else {
                    return None;
                };
                let accessor = self.accessors.get(as_ident(callee)?)?;
                let arg = call.args.first()?;
                let string_arg = matches!(unparen(&arg.expr), Expr::Lit(Lit::Str(_)));
                if arg.spread.is_some() || (string_arg && !accessor.coerces_strings) {
                    return None;
                }
                accessor.lookup(self.values, const_number(&arg.expr)?).cloned()
            }
            _ => None,
        }
    }
}

impl VisitMut for Inliner<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        if let Some(value) = self.resolve(expr) {
            *expr = string(&value);
            self.inlined += 1;
        }
    }
}

/// Removes script-level declarations of `names` that nothing references any
/// more, repeating until no more can be removed.
fn remove_unreferenced(script: &mut Script, names: &[String]) -> usize {
    let mut removed = 0;
    loop {
        let dead = names
            .iter()
            .find(|name| declared_at_top(script, name) && count_refs(&*script, name) == 1);
        let Some(dead) = dead.cloned() else {
            break;
        };
        remove_declaration(script, &dead);
        removed += 1;
    }
    removed
}

fn declared_at_top(script: &Script, name: &str) -> bool {
    script.body.iter().any(|stmt| match stmt {
        Stmt::Decl(Decl::Fn(decl)) => &*decl.ident.sym == name,
        Stmt::Decl(Decl::Var(var)) => var
            .decls
            .iter()
            .any(|d| matches!(&d.name, Pat::Ident(b) if &*b.id.sym == name)),
        _ => false,
    })
}

fn remove_declaration(script: &mut Script, name: &str) {
    script.body.retain_mut(|stmt| match stmt {
        Stmt::Decl(Decl::Fn(decl)) => &*decl.ident.sym != name,
        Stmt::Decl(Decl::Var(var)) => {
            var.decls
                .retain(|d| !matches!(&d.name, Pat::Ident(b) if &*b.id.sym == name));
            !var.decls.is_empty()
        }
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::config::EngineConfig;

    fn resolve(source: &str, flags: OptionFlags) -> (String, PassContext, PassReport) {
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), flags | OptionFlags::DECRYPT_STRINGS);
        let report = StringArrayPass::new().run(&mut tree, &ctx).unwrap();
        (tree.print().unwrap(), ctx, report)
    }

    #[test]
    fn test_direct_index_is_inlined() {
        let (code, ctx, report) = resolve(
            r#"var arr = ["alpha", "beta"]; use(arr[1]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains(r#"use("beta")"#));
        assert!(report.is_changed());
        assert!(ctx.has_technique(&Technique::StringArray));
    }

    #[test]
    fn test_accessor_with_offset() {
        let (code, _, _) = resolve(
            r#"var _0xa = ["log", "Hello"];
               function _0xb(i) { i = i - 0x10; var t = _0xa[i]; return t; }
               var _0xc = _0xb;
               console[_0xb(0x10)](_0xc("0x11"));"#,
            OptionFlags::empty(),
        );
        assert!(code.contains(r#"console["log"]("Hello")"#));
    }

    #[test]
    fn test_string_argument_to_adding_accessor_is_kept() {
        let (code, _, _) = resolve(
            r#"var t = ["a", "b", "c"];
               function g(i) { return t[i + 1]; }
               use(g("0"), g(1));"#,
            OptionFlags::empty(),
        );
        assert!(code.contains(r#"use(g("0"), "c")"#));
    }

    #[test]
    fn test_non_canonical_string_key_is_kept() {
        let (code, _, _) = resolve(
            r#"var t = ["a", "b"]; use(t["0x1"], t["1"]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains(r#"use(t["0x1"], "b")"#));
    }

    #[test]
    fn test_rotation_is_applied_then_inlined() {
        let (code, ctx, report) = resolve(
            r#"var t = ["a", "b", "c", "d"];
               (function (arr, n) { while (--n) { arr.push(arr.shift()); } })(t, 3);
               function get(i) { return t[i - 0]; }
               out(get(0), t[3]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains(r#"out("c", "b")"#));
        assert!(!code.contains("shift"));
        let compact: String = code.split_whitespace().collect();
        assert!(compact.contains(r#"["c","d","a","b"]"#));
        assert!(ctx.has_technique(&Technique::StringArrayRotation));
        assert!(report
            .records()
            .iter()
            .any(|r| r.kind == TransformationKind::StringArrayReorder && r.succeeded));
    }

    #[test]
    fn test_unresolved_rotation_blocks_inlining() {
        let (code, ctx, report) = resolve(
            r#"var t = ["a", "b"];
               (function (arr, n) { while (--n) { arr.push(arr.shift()); fetch(); } })(t, 3);
               out(t[0]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("out(t[0])"));
        assert!(!report.is_changed());
        assert_eq!(ctx.log.failed_count(), 1);
        assert_eq!(ctx.warnings().count(), 1);
    }

    #[test]
    fn test_written_array_is_not_a_table() {
        let (code, _, report) = resolve(
            r#"var arr = ["a", "b"]; arr[0] = "z"; use(arr[0]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("use(arr[0])"));
        assert!(report.is_empty());
    }

    #[test]
    fn test_escaping_array_is_not_a_table() {
        let (code, _, report) = resolve(
            r#"var arr = ["a", "b"]; mutate(arr); use(arr[0]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("use(arr[0])"));
        assert!(report.is_empty());
    }

    #[test]
    fn test_shadowed_name_is_not_a_table() {
        let (code, _, _) = resolve(
            r#"var arr = ["a", "b"]; function f(arr) { return arr[0]; } use(arr[1]);"#,
            OptionFlags::empty(),
        );
        assert!(code.contains("return arr[0]"));
        assert!(code.contains("use(arr[1])"));
    }

    #[test]
    fn test_aggressive_removes_scaffolding() {
        let (code, _, report) = resolve(
            r#"var _0xa = ["x"]; function _0xb(i) { return _0xa[i]; } use(_0xb(0));"#,
            OptionFlags::AGGRESSIVE,
        );
        assert_eq!(code.trim(), r#"use("x");"#);
        assert!(report
            .records()
            .iter()
            .any(|r| r.kind == TransformationKind::ScaffoldingRemoval));
    }

    #[test]
    fn test_second_run_is_quiet() {
        let source = r#"var arr = ["alpha", "beta"]; use(arr[1]);"#;
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), OptionFlags::DECRYPT_STRINGS);
        let pass = StringArrayPass::new();
        assert!(pass.run(&mut tree, &ctx).unwrap().is_changed());
        assert!(pass.run(&mut tree, &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_index_untouched() {
        let (code, _, _) = resolve(r#"var arr = ["a"]; use(arr[4], arr[0.5]);"#, OptionFlags::empty());
        assert!(code.contains("arr[4]"));
        assert!(code.contains("arr[0.5]"));
    }
}
