//! Control-flow flattening reversal.
//!
//! Flattening replaces a sequence of blocks by a dispatcher loop that picks
//! the next block from a state variable. Two shapes are recognised.
//!
//! State-variable dispatchers, where every case assigns the next state:
//!
//! ```text
//! var state = 1;
//! while (true) {
//!     switch (state) {
//!         case 1: a(); state = 2; break;
//!         case 2: if (x) { state = 3; } else { state = 4; } break;
//!         case 3: b(); state = 4; break;
//!         case 4: c(); return;
//!     }
//! }
//! ```
//!
//! becomes `a(); if (x) { b(); } c(); return;`. Transitions may be plain
//! assignments, conditional expressions, or `if`/`else` assignments; the two
//! arms of a conditional transition are traced up to the first state both
//! reach. A loop of the form `while (state !== END)` exits when `END` is
//! reached.
//!
//! Split-order dispatchers, where the block order is a string:
//!
//! ```text
//! var order = "2|0|1".split("|"), i = 0;
//! while (true) {
//!     switch (order[i++]) {
//!         case "0": b(); continue;
//!         case "1": c(); continue;
//!         case "2": a(); continue;
//!     }
//!     break;
//! }
//! ```
//!
//! becomes `a(); b(); c();`.
//!
//! A dispatcher is left untouched when its graph revisits a state, when a
//! block jumps out of the switch in any other way, or when the state variable
//! is used by a block itself. Such dispatchers are reported as unresolved.
//!
//! When the state variable is still read after the loop, the restored code
//! ends with an assignment of the end state so later reads see the same value.

use std::collections::{HashMap, HashSet, VecDeque};

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{
            ArrowExpr, AssignExpr, AssignOp, AssignTarget, BinaryOp, BlockStmt, BreakStmt,
            ContinueStmt, Decl, DoWhileStmt, Expr, ExprStmt, ForInStmt, ForOfStmt, ForStmt,
            Function, Ident, IfStmt, Lit, Pat, SimpleAssignTarget, Stmt, SwitchCase, SwitchStmt,
            UpdateExpr, UpdateOp, WhileStmt,
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
        passes::utils::{
            as_ident, as_string, computed_index, count_refs, has_block_scoped_decl, method_call,
            number, static_truthiness, string, unparen, AssignTargetProbe,
        },
    },
    source::SyntaxTree,
    Result,
};

/// Upper bound on blocks emitted for one dispatcher.
const MAX_EMITTED_BLOCKS: usize = 4096;

/// Restores flattened control flow.
pub struct ControlFlowPass;

impl Default for ControlFlowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlowPass {
    /// Creates a new control-flow restoration pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for ControlFlowPass {
    fn name(&self) -> &'static str {
        "control-flow-restoration"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::ControlFlowRestoration
    }

    fn should_run(&self, ctx: &PassContext) -> bool {
        ctx.has(OptionFlags::RESTORE_CONTROL_FLOW)
    }

    fn description(&self) -> &'static str {
        "Rebuilds sequential code from switch-based dispatcher loops"
    }

    fn run(&self, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<PassReport> {
        let mut restorer = Restorer { ctx, restored: 0 };
        tree.script_mut().visit_mut_with(&mut restorer);

        let mut report = PassReport::new();
        report.changed(
            TransformationKind::ControlFlowRestoration,
            restorer.restored,
            format!("restored {} dispatcher loops", restorer.restored),
        );
        Ok(report)
    }
}

/// Case label value. Numbers and strings never compare equal under `===`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StateKey {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKey::Num(n) => write!(f, "{n}"),
            StateKey::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl StateKey {
    fn to_expr(&self) -> Expr {
        match self {
            #[allow(clippy::cast_precision_loss)]
            StateKey::Num(n) => number(*n as f64),
            StateKey::Str(s) => string(s),
        }
    }
}

fn state_key(expr: &Expr) -> Option<StateKey> {
    match unparen(expr) {
        Expr::Lit(Lit::Num(n)) if n.value.fract() == 0.0 && n.value.abs() < 9.0e15 => {
            #[allow(clippy::cast_possible_truncation)]
            let value = n.value as i64;
            Some(StateKey::Num(value))
        }
        Expr::Lit(Lit::Str(s)) => Some(StateKey::Str(s.value.to_string())),
        _ => None,
    }
}

/// How a block hands over to the next one.
#[derive(Debug, Clone)]
enum Transition {
    Goto(StateKey),
    Branch(Box<Expr>, StateKey, StateKey),
    Exit,
}

#[derive(Debug, Clone)]
struct Block {
    body: Vec<Stmt>,
    transition: Transition,
}

/// A recognised `while (...) switch (state) { ... }` dispatcher.
struct StateMachine {
    state: String,
    blocks: HashMap<StateKey, Block>,
    end: Option<StateKey>,
    /// Emit `state = END;` where the loop would have exited.
    assign_end: bool,
}

impl StateMachine {
    fn successors(&self, key: &StateKey) -> Vec<StateKey> {
        match self.blocks.get(key).map(|b| &b.transition) {
            Some(Transition::Goto(next)) => vec![next.clone()],
            Some(Transition::Branch(_, a, b)) => vec![a.clone(), b.clone()],
            Some(Transition::Exit) | None => Vec::new(),
        }
    }

    fn reachable(&self, from: &StateKey) -> HashSet<StateKey> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from.clone()]);
        while let Some(key) = queue.pop_front() {
            if seen.insert(key.clone()) {
                queue.extend(self.successors(&key));
            }
        }
        seen
    }

    /// First state reachable from both `a` and `b`, searched from `b`.
    fn join(&self, a: &StateKey, b: &StateKey) -> Option<StateKey> {
        let from_a = self.reachable(a);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b.clone()]);
        while let Some(key) = queue.pop_front() {
            if from_a.contains(&key) {
                return Some(key);
            }
            if seen.insert(key.clone()) {
                queue.extend(self.successors(&key));
            }
        }
        None
    }

    /// Emits the blocks visited from `from` until `stop`, the end state or an exit.
    fn trace(
        &self,
        from: StateKey,
        stop: Option<&StateKey>,
        visited: &mut HashSet<StateKey>,
        budget: &mut usize,
        out: &mut Vec<Stmt>,
    ) -> std::result::Result<(), String> {
        let mut current = from;
        loop {
            if stop == Some(&current) {
                return Ok(());
            }
            if self.end.as_ref() == Some(&current) {
                if self.assign_end {
                    out.push(assign_state(&self.state, &current));
                }
                return Ok(());
            }
            if !visited.insert(current.clone()) {
                return Err(format!("state {current} is revisited"));
            }
            let Some(block) = self.blocks.get(&current) else {
                return Err(format!("no case for state {current}"));
            };
            *budget = budget
                .checked_sub(1)
                .ok_or_else(|| "too many blocks".to_string())?;

            emit_block(&block.body, out);
            match &block.transition {
                Transition::Exit => return Ok(()),
                Transition::Goto(next) => current = next.clone(),
                Transition::Branch(test, a, b) => {
                    let join = self.join(a, b);
                    let mut cons = Vec::new();
                    let mut alt = Vec::new();
                    self.trace(a.clone(), join.as_ref(), &mut visited.clone(), budget, &mut cons)?;
                    self.trace(b.clone(), join.as_ref(), &mut visited.clone(), budget, &mut alt)?;
                    out.push(Stmt::If(IfStmt {
                        span: DUMMY_SP,
                        test: test.clone(),
                        cons: Box::new(block_stmt(cons)),
                        alt: (!alt.is_empty()).then(|| Box::new(block_stmt(alt))),
                    }));
                    match join {
                        Some(next) => {
                            let after = self.reachable(&next);
                            let arms = self.reachable(a);
                            visited.extend(
                                arms.union(&self.reachable(b))
                                    .filter(|key| !after.contains(*key))
                                    .cloned(),
                            );
                            current = next;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

fn assign_state(state: &str, key: &StateKey) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(Expr::Assign(AssignExpr {
            span: DUMMY_SP,
            op: AssignOp::Assign,
            left: AssignTarget::Simple(SimpleAssignTarget::Ident(
                Ident::new(state.into(), DUMMY_SP).into(),
            )),
            right: Box::new(key.to_expr()),
        })),
    })
}

fn block_stmt(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(BlockStmt {
        span: DUMMY_SP,
        stmts,
    })
}

/// Appends a block's statements, keeping a scope when it declares `let`/`const`.
fn emit_block(body: &[Stmt], out: &mut Vec<Stmt>) {
    if has_block_scoped_decl(body) {
        out.push(block_stmt(body.to_vec()));
    } else {
        out.extend(body.iter().cloned());
    }
}

struct Restorer<'a> {
    ctx: &'a PassContext,
    restored: usize,
}

impl VisitMut for Restorer<'_> {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);

        let mut index = 0;
        while index < stmts.len() {
            index = match self.restore_at(stmts, index) {
                Some(next) => next,
                None => index + 1,
            };
        }
    }
}

impl Restorer<'_> {
    /// Restores a dispatcher loop at `stmts[index]`, returning the index after
    /// the emitted code.
    fn restore_at(&mut self, stmts: &mut Vec<Stmt>, index: usize) -> Option<usize> {
        let (test, body) = loop_parts(&stmts[index])?;

        if let Some(machine) = state_machine(test, body) {
            return self.restore_state_machine(stmts, index, machine);
        }
        if let Some(dispatch) = split_dispatch(body) {
            return self.restore_split(stmts, index, dispatch);
        }
        None
    }

    fn flag(&self, evidence: String) {
        self.ctx.add_signature_once(DetectionSignature::new(
            Technique::ControlFlowFlattening,
            vec![evidence],
            0.8,
        ));
    }

    fn left_in_place(&self, var: &str, reason: &str) {
        self.ctx.unresolved(
            TransformationKind::ControlFlowRestoration,
            format!("dispatcher on `{var}` left in place: {reason}"),
        );
    }

    fn restore_state_machine(
        &mut self,
        stmts: &mut Vec<Stmt>,
        index: usize,
        machine: std::result::Result<StateMachine, (String, String)>,
    ) -> Option<usize> {
        let state = match &machine {
            Ok(machine) => machine.state.as_str(),
            Err((state, _)) => state.as_str(),
        };
        let (decl_index, initial) = find_initializer(&stmts[..index], state)?;
        self.flag(format!("switch dispatcher on `{state}`"));

        let mut machine = match machine {
            Ok(machine) => machine,
            Err((state, reason)) => {
                self.left_in_place(&state, &reason);
                return None;
            }
        };
        machine.assign_end = count_refs(&*stmts, &machine.state)
            > count_refs(&stmts[index], &machine.state) + 1;

        let mut out = Vec::new();
        let mut budget = MAX_EMITTED_BLOCKS;
        if let Err(reason) =
            machine.trace(initial, None, &mut HashSet::new(), &mut budget, &mut out)
        {
            self.left_in_place(&machine.state, &reason);
            return None;
        }

        let emitted = out.len();
        stmts.splice(index..=index, out);
        self.restored += 1;

        if remove_if_unused(stmts, decl_index, &machine.state) {
            Some(index - 1 + emitted)
        } else {
            Some(index + emitted)
        }
    }

    fn restore_split(
        &mut self,
        stmts: &mut Vec<Stmt>,
        index: usize,
        dispatch: SplitDispatch,
    ) -> Option<usize> {
        let SplitDispatch {
            order_var,
            counter_var,
            cases,
        } = dispatch;
        let (decl_index, order) = find_split_order(&stmts[..index], &order_var, &counter_var)?;
        self.flag(format!("split-order dispatcher on `{order_var}`"));

        let cases = match cases {
            Ok(cases) => cases,
            Err(reason) => {
                self.left_in_place(&order_var, &reason);
                return None;
            }
        };

        let mut out = Vec::new();
        for key in &order {
            let Some(case) = cases.get(key) else {
                self.left_in_place(&order_var, &format!("no case for \"{key}\""));
                return None;
            };
            let (body, terminal) = match case.split_last() {
                Some((Stmt::Continue(ContinueStmt { label: None, .. }), rest)) => (rest, false),
                Some((Stmt::Return(_) | Stmt::Throw(_), _)) => (case.as_slice(), true),
                _ => {
                    self.left_in_place(&order_var, &format!("case \"{key}\" falls through"));
                    return None;
                }
            };
            emit_block(body, &mut out);
            if terminal {
                break;
            }
        }

        let emitted = out.len();
        stmts.splice(index..=index, out);
        self.restored += 1;

        let mut removed = 0;
        for name in [&order_var, &counter_var] {
            if remove_if_unused(stmts, decl_index, name) {
                removed = 1;
            }
        }
        Some(index - removed + emitted)
    }
}

/// Splits `while (test) body` and `for (;test;) body` into their parts.
fn loop_parts(stmt: &Stmt) -> Option<(Option<&Expr>, &Stmt)> {
    match stmt {
        Stmt::While(WhileStmt { test, body, .. }) => Some((Some(&**test), &**body)),
        Stmt::For(ForStmt {
            init: None,
            test,
            update: None,
            body,
            ..
        }) => Some((test.as_deref(), &**body)),
        _ => None,
    }
}

/// The single `switch` inside a loop body, and whether a `break;` follows it.
fn dispatch_switch(body: &Stmt) -> Option<(&SwitchStmt, bool)> {
    match body {
        Stmt::Switch(switch) => Some((switch, false)),
        Stmt::Block(block) => match block.stmts.as_slice() {
            [Stmt::Switch(switch)] => Some((switch, false)),
            [Stmt::Switch(switch), Stmt::Break(BreakStmt { label: None, .. })] => {
                Some((switch, true))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Recognises a state-variable dispatcher. The inner error carries the state
/// variable and why one of its cases cannot be restored.
fn state_machine(
    test: Option<&Expr>,
    body: &Stmt,
) -> Option<std::result::Result<StateMachine, (String, String)>> {
    let (switch, trailing_break) = dispatch_switch(body)?;
    if trailing_break {
        return None;
    }
    let state = as_ident(&switch.discriminant)?.to_string();

    let end = match test {
        None => None,
        Some(test) if static_truthiness(test) == Some(true) => None,
        Some(test) => {
            let Expr::Bin(bin) = unparen(test) else {
                return None;
            };
            if !matches!(bin.op, BinaryOp::NotEqEq | BinaryOp::NotEq)
                || as_ident(&bin.left) != Some(state.as_str())
            {
                return None;
            }
            Some(state_key(&bin.right)?)
        }
    };

    let mut blocks = HashMap::new();
    let mut rejected = None;
    for case in &switch.cases {
        let key = state_key(case.test.as_deref()?)?;
        match analyse_case(case, &state) {
            Ok(block) => {
                if blocks.insert(key, block).is_some() {
                    return None;
                }
            }
            Err(reason) => {
                rejected.get_or_insert_with(|| format!("case {key} {reason}"));
            }
        }
    }
    if let Some(reason) = rejected {
        return Some(Err((state, reason)));
    }
    Some(Ok(StateMachine {
        state,
        blocks,
        end,
        assign_end: false,
    }))
}

/// Parses one case into its body and transition.
fn analyse_case(case: &SwitchCase, state: &str) -> std::result::Result<Block, String> {
    let no_transition = || "has no recognisable transition".to_string();
    let (body, transition) = match case.cons.split_last() {
        Some((Stmt::Return(_) | Stmt::Throw(_), _)) => (case.cons.clone(), Transition::Exit),
        Some((
            Stmt::Break(BreakStmt { label: None, .. })
            | Stmt::Continue(ContinueStmt { label: None, .. }),
            rest,
        )) => {
            let (last, rest) = rest.split_last().ok_or_else(no_transition)?;
            (
                rest.to_vec(),
                transition_of(last, state).ok_or_else(no_transition)?,
            )
        }
        _ => return Err("falls through".to_string()),
    };

    if count_refs(&body, state) != 0 {
        return Err(format!("reads `{state}`"));
    }
    if has_escaping_jump(&body) {
        return Err("jumps out of the dispatcher".to_string());
    }
    Ok(Block { body, transition })
}

/// Reads `state = K`, `state = c ? K1 : K2` or `if (c) state = K1; else state = K2`.
fn transition_of(stmt: &Stmt, state: &str) -> Option<Transition> {
    match stmt {
        Stmt::Expr(expr_stmt) => {
            let Expr::Assign(assign) = unparen(&expr_stmt.expr) else {
                return None;
            };
            if assign.op != swc_core::ecma::ast::AssignOp::Assign
                || AssignTargetProbe::of(assign).simple_name() != Some(state)
            {
                return None;
            }
            match unparen(&assign.right) {
                Expr::Cond(cond) => {
                    if count_refs(&*cond.test, state) != 0 {
                        return None;
                    }
                    Some(Transition::Branch(
                        cond.test.clone(),
                        state_key(&cond.cons)?,
                        state_key(&cond.alt)?,
                    ))
                }
                other => Some(Transition::Goto(state_key(other)?)),
            }
        }
        Stmt::If(if_stmt) => {
            let cons = single_goto(&if_stmt.cons, state)?;
            let alt = single_goto(if_stmt.alt.as_deref()?, state)?;
            if count_refs(&*if_stmt.test, state) != 0 {
                return None;
            }
            Some(Transition::Branch(if_stmt.test.clone(), cons, alt))
        }
        _ => None,
    }
}

fn single_goto(stmt: &Stmt, state: &str) -> Option<StateKey> {
    let stmt = match stmt {
        Stmt::Block(block) if block.stmts.len() == 1 => &block.stmts[0],
        other => other,
    };
    match transition_of(stmt, state)? {
        Transition::Goto(key) => Some(key),
        _ => None,
    }
}

/// Finds `var state = K` before the loop with no other use of `state` between.
fn find_initializer(before: &[Stmt], state: &str) -> Option<(usize, StateKey)> {
    for (index, stmt) in before.iter().enumerate().rev() {
        if count_refs(stmt, state) == 0 {
            continue;
        }
        let Stmt::Decl(Decl::Var(var)) = stmt else {
            return None;
        };
        return var.decls.iter().find_map(|decl| match &decl.name {
            Pat::Ident(binding) if &*binding.id.sym == state => {
                Some((index, state_key(decl.init.as_deref()?)?))
            }
            _ => None,
        });
    }
    None
}

/// A recognised split-order dispatcher. `cases` holds the reason a case
/// cannot be restored instead of the cases when one is rejected.
struct SplitDispatch {
    order_var: String,
    counter_var: String,
    cases: std::result::Result<HashMap<String, Vec<Stmt>>, String>,
}

/// Matches `switch (order[i++]) { case "k": ...; continue; ... } break;`.
fn split_dispatch(body: &Stmt) -> Option<SplitDispatch> {
    let (switch, trailing_break) = dispatch_switch(body)?;
    if !trailing_break {
        return None;
    }
    let Expr::Member(member) = unparen(&switch.discriminant) else {
        return None;
    };
    let order_var = as_ident(&member.obj)?.to_string();
    let Expr::Update(UpdateExpr {
        op: UpdateOp::PlusPlus,
        prefix: false,
        arg,
        ..
    }) = unparen(computed_index(member)?)
    else {
        return None;
    };
    let counter_var = as_ident(arg)?.to_string();

    let mut cases = HashMap::new();
    let mut rejected = None;
    for case in &switch.cases {
        let key = as_string(case.test.as_deref()?)?.to_string();
        if count_refs(&case.cons, &order_var) != 0 || count_refs(&case.cons, &counter_var) != 0
        {
            rejected.get_or_insert_with(|| format!("case \"{key}\" reads the dispatch state"));
        } else if has_escaping_jump(strip_continue(&case.cons)) {
            rejected.get_or_insert_with(|| format!("case \"{key}\" jumps out of the dispatcher"));
        }
        if cases.insert(key, case.cons.clone()).is_some() {
            return None;
        }
    }
    Some(SplitDispatch {
        order_var,
        counter_var,
        cases: rejected.map_or(Ok(cases), Err),
    })
}

fn strip_continue(stmts: &[Stmt]) -> &[Stmt] {
    match stmts.split_last() {
        Some((Stmt::Continue(ContinueStmt { label: None, .. }), rest)) => rest,
        _ => stmts,
    }
}

/// Finds `var order = "...".split(sep), i = 0;` before the loop.
fn find_split_order(
    before: &[Stmt],
    order_var: &str,
    counter_var: &str,
) -> Option<(usize, Vec<String>)> {
    let (index, stmt) = before.iter().enumerate().rev().find(|(_, stmt)| {
        count_refs(*stmt, order_var) != 0 || count_refs(*stmt, counter_var) != 0
    })?;
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };

    let mut order = None;
    let mut counter_zero = false;
    for decl in &var.decls {
        let Pat::Ident(binding) = &decl.name else {
            continue;
        };
        let init = decl.init.as_deref()?;
        if &*binding.id.sym == order_var {
            let Expr::Call(call) = unparen(init) else {
                return None;
            };
            let (text, "split") = method_call(call)? else {
                return None;
            };
            let separator = as_string(&call.args.first()?.expr)?;
            order = Some(
                as_string(text)?
                    .split(separator)
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            );
        } else if &*binding.id.sym == counter_var {
            counter_zero = matches!(unparen(init), Expr::Lit(Lit::Num(n)) if n.value == 0.0);
        }
    }
    if !counter_zero {
        return None;
    }
    Some((index, order?))
}

/// Removes the declaration of `name` at `stmts[index]` when nothing else uses it.
fn remove_if_unused(stmts: &mut Vec<Stmt>, index: usize, name: &str) -> bool {
    if count_refs(&*stmts, name) != 1 {
        return false;
    }
    let Some(Stmt::Decl(Decl::Var(var))) = stmts.get_mut(index) else {
        return false;
    };
    var.decls
        .retain(|d| !matches!(&d.name, Pat::Ident(b) if &*b.id.sym == name));
    if var.decls.is_empty() {
        stmts.remove(index);
        return true;
    }
    false
}

/// `true` if `stmts` contain a `break` or `continue` that would leave them.
fn has_escaping_jump(stmts: &[Stmt]) -> bool {
    let mut finder = EscapingJumps {
        loop_depth: 0,
        switch_depth: 0,
        found: false,
    };
    for stmt in stmts {
        stmt.visit_with(&mut finder);
    }
    finder.found
}

struct EscapingJumps {
    loop_depth: usize,
    switch_depth: usize,
    found: bool,
}

impl EscapingJumps {
    fn in_loop<N: VisitWith<Self>>(&mut self, node: &N) {
        self.loop_depth += 1;
        node.visit_children_with(self);
        self.loop_depth -= 1;
    }
}

impl Visit for EscapingJumps {
    fn visit_break_stmt(&mut self, n: &BreakStmt) {
        if n.label.is_some() || (self.loop_depth == 0 && self.switch_depth == 0) {
            self.found = true;
        }
    }

    fn visit_continue_stmt(&mut self, n: &ContinueStmt) {
        if n.label.is_some() || self.loop_depth == 0 {
            self.found = true;
        }
    }

    fn visit_switch_stmt(&mut self, n: &SwitchStmt) {
        self.switch_depth += 1;
        n.visit_children_with(self);
        self.switch_depth -= 1;
    }

    fn visit_while_stmt(&mut self, n: &WhileStmt) {
        self.in_loop(n);
    }

    fn visit_do_while_stmt(&mut self, n: &DoWhileStmt) {
        self.in_loop(n);
    }

    fn visit_for_stmt(&mut self, n: &ForStmt) {
        self.in_loop(n);
    }

    fn visit_for_in_stmt(&mut self, n: &ForInStmt) {
        self.in_loop(n);
    }

    fn visit_for_of_stmt(&mut self, n: &ForOfStmt) {
        self.in_loop(n);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::config::EngineConfig;

    fn restore(source: &str) -> (String, PassContext, PassReport) {
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), OptionFlags::RESTORE_CONTROL_FLOW);
        let report = ControlFlowPass::new().run(&mut tree, &ctx).unwrap();
        (tree.print().unwrap(), ctx, report)
    }

    fn compact(code: &str) -> String {
        code.split_whitespace().collect()
    }

    #[test]
    fn test_linear_state_machine() {
        let (code, ctx, report) = restore(
            "function f() { var state = 1; while (true) { switch (state) { \
             case 1: a(); state = 2; break; \
             case 2: b(); return; } } }",
        );
        assert_eq!(compact(&code), "functionf(){a();b();return;}");
        assert!(report.is_changed());
        assert!(ctx.has_technique(&Technique::ControlFlowFlattening));
    }

    #[test]
    fn test_cases_out_of_order() {
        let (code, _, _) = restore(
            "function f() { var s = 3; while (!![]) { switch (s) { \
             case 1: second(); s = 2; break; \
             case 2: third(); return; \
             case 3: first(); s = 1; continue; } } }",
        );
        assert_eq!(compact(&code), "functionf(){first();second();third();return;}");
    }

    #[test]
    fn test_conditional_join() {
        let (code, _, _) = restore(
            "function f(x) { var s = 1; while (true) { switch (s) { \
             case 1: a(); if (x) { s = 2; } else { s = 3; } break; \
             case 2: b(); s = 3; break; \
             case 3: c(); return; } } }",
        );
        assert_eq!(compact(&code), "functionf(x){a();if(x){b();}c();return;}");
    }

    #[test]
    fn test_ternary_transition() {
        let (code, _, _) = restore(
            "function f(x) { var s = 1; while (true) { switch (s) { \
             case 1: s = x ? 2 : 3; break; \
             case 2: b(); return 1; \
             case 3: c(); return 2; } } }",
        );
        assert_eq!(
            compact(&code),
            "functionf(x){if(x){b();return1;}else{c();return2;}}"
        );
    }

    #[test]
    fn test_end_state_exits_loop() {
        let (code, _, _) = restore(
            "var s = 0; while (s !== 9) { switch (s) { \
             case 0: a(); s = 1; break; \
             case 1: b(); s = 9; break; } } after();",
        );
        assert_eq!(compact(&code), "a();b();after();");
    }

    #[test]
    fn test_cycle_is_unresolved() {
        let (code, ctx, report) = restore(
            "function f() { var s = 1; while (true) { switch (s) { \
             case 1: a(); s = 2; break; \
             case 2: b(); s = 1; break; } } }",
        );
        assert!(code.contains("switch"));
        assert!(report.is_empty());
        assert_eq!(ctx.log.failed_count(), 1);
        assert!(ctx.warnings().next().unwrap().contains("revisited"));
    }

    #[test]
    fn test_end_state_assigned_when_read_after_loop() {
        let (code, _, report) = restore(
            "function f() { var s = 1; while (s !== 3) { switch (s) { \
             case 1: a(); s = 2; break; \
             case 2: b(); s = 3; break; } } return s; }",
        );
        assert_eq!(compact(&code), "functionf(){vars=1;a();b();s=3;returns;}");
        assert!(report.is_changed());
    }

    #[test]
    fn test_end_state_assigned_once_after_branches_join() {
        let (code, _, _) = restore(
            "function f(x) { var s = 1; while (s !== 9) { switch (s) { \
             case 1: if (x) { s = 2; } else { s = 9; } break; \
             case 2: b(); s = 9; break; } } return s; }",
        );
        assert_eq!(
            compact(&code),
            "functionf(x){vars=1;if(x){b();}s=9;returns;}"
        );
    }

    #[test]
    fn test_state_used_inside_block_is_unresolved() {
        let (code, ctx, report) = restore(
            "function f() { var s = 1; while (true) { switch (s) { \
             case 1: log(s); s = 2; break; \
             case 2: return; } } }",
        );
        assert!(code.contains("switch"));
        assert!(report.is_empty());
        assert_eq!(ctx.log.failed_count(), 1);
        assert!(ctx.warnings().next().unwrap().contains("case 1 reads `s`"));
    }

    #[test]
    fn test_escaping_jump_is_unresolved() {
        let (code, ctx, report) = restore(
            "function f(x) { var s = 1; while (true) { switch (s) { \
             case 1: if (x) { continue; } s = 2; break; \
             case 2: return; } } }",
        );
        assert!(code.contains("switch"));
        assert!(report.is_empty());
        assert_eq!(ctx.log.failed_count(), 1);
        assert!(ctx
            .warnings()
            .next()
            .unwrap()
            .contains("jumps out of the dispatcher"));
    }

    #[test]
    fn test_ordinary_switch_in_loop_is_not_reported() {
        let (code, ctx, report) = restore(
            "function f() { while (true) { switch (next()) { case 1: a(); break; } } }",
        );
        assert!(code.contains("switch"));
        assert!(report.is_empty());
        assert_eq!(ctx.log.failed_count(), 0);
    }

    #[test]
    fn test_split_order() {
        let (code, ctx, report) = restore(
            r#"var o = "2|0|1".split("|"), i = 0;
               while (true) { switch (o[i++]) {
                   case "0": b(); continue;
                   case "1": c(); continue;
                   case "2": a(); continue;
               } break; }"#,
        );
        assert_eq!(compact(&code), "a();b();c();");
        assert!(report.is_changed());
        assert!(ctx.has_technique(&Technique::ControlFlowFlattening));
    }

    #[test]
    fn test_split_order_missing_case() {
        let (code, ctx, _) = restore(
            r#"var o = "0|5".split("|"), i = 0;
               while (true) { switch (o[i++]) { case "0": a(); continue; } break; }"#,
        );
        assert!(code.contains("switch"));
        assert_eq!(ctx.log.failed_count(), 1);
    }

    #[test]
    fn test_split_order_case_reading_counter_is_unresolved() {
        let (code, ctx, _) = restore(
            r#"var o = "0|1".split("|"), i = 0;
               while (true) { switch (o[i++]) {
                   case "0": log(i); continue;
                   case "1": b(); continue;
               } break; }"#,
        );
        assert!(code.contains("switch"));
        assert_eq!(ctx.log.failed_count(), 1);
        assert!(ctx.warnings().next().unwrap().contains("reads the dispatch state"));
    }

    #[test]
    fn test_block_scoped_bodies_keep_scope() {
        let (code, _, _) = restore(
            "function f() { var s = 1; while (true) { switch (s) { \
             case 1: let x = 1; use(x); s = 2; break; \
             case 2: let y = 2; use(y); return; } } }",
        );
        assert_eq!(
            compact(&code),
            "functionf(){{letx=1;use(x);}{lety=2;use(y);return;}}"
        );
    }

    #[test]
    fn test_gated_by_option() {
        let ctx = PassContext::new(EngineConfig::default(), OptionFlags::empty());
        assert!(!ControlFlowPass::new().should_run(&ctx));
    }
}
