//! Two-tier interpreter detection.

use std::{
    collections::{HashMap, HashSet},
    sync::OnceLock,
};

use regex::Regex;
use swc_core::{
    ecma::{
        ast::{
            ArrowExpr, AssignExpr, AssignOp, BinaryOp, CallExpr, DoWhileStmt, Expr, ForStmt, Function, Lit,
            MemberExpr, Pat, Stmt, SwitchCase, SwitchStmt, UpdateExpr, VarDeclarator, WhileStmt,
        },
        visit::{Visit, VisitWith},
    },
};

use crate::{
    deobfuscation::{
        detection::{DetectionEvidence, DetectionScore},
        passes::utils::{as_ident, as_number, callee_name, computed_index, method_call, unparen, AssignTargetProbe},
        vm::{signatures, Complexity, VmDetection, VmProfile, CUSTOM_VM},
    },
    source::{SourceUnit, SyntaxTree},
};

/// A literal bytecode entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BytecodeValue {
    /// A number literal.
    Num(f64),
    /// A string literal, typically a hex-encoded operand.
    Str(String),
}

/// An interpreter located in the syntax tree.
#[derive(Debug, Clone)]
pub struct Interpreter {
    /// Program-counter variable.
    pub counter: String,
    /// Instruction table indexed by the counter, if any.
    pub table: Option<String>,
    /// Literal contents of the instruction table, when it is declared as one.
    pub bytecode: Option<Vec<BytecodeValue>>,
    /// Array used as an operand stack through `push`/`pop`.
    pub stack: Option<String>,
    /// The dispatch cases.
    pub cases: Vec<SwitchCase>,
    /// `line:column` of the dispatch `switch`.
    pub location: String,
    /// The dispatch `switch` reads the counter, directly or through the table.
    pub dispatch_reads_counter: bool,
    /// `.apply(...)` or `.call(...)` inside the loop.
    pub dispatch_call: bool,
    /// `parseInt(x, 16)` inside the loop.
    pub operand_decoding: bool,
}

impl Interpreter {
    /// `true` when every tree signal co-occurs.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.dispatch_reads_counter && self.table.is_some() && self.dispatch_call && self.operand_decoding
    }

    fn score(&self) -> DetectionScore {
        let score = DetectionScore::new();
        score.add(DetectionEvidence::StructuralPattern {
            description: format!("program counter `{}`", self.counter),
            confidence: 20,
        });
        if self.dispatch_reads_counter {
            score.add(DetectionEvidence::StructuralPattern {
                description: "switch dispatch inside a loop".to_string(),
                confidence: 20,
            });
        }
        if let Some(table) = &self.table {
            score.add(DetectionEvidence::StructuralPattern {
                description: format!("instruction table `{table}`"),
                confidence: 20,
            });
        }
        if self.dispatch_call {
            score.add(DetectionEvidence::TextualSignal {
                name: "apply/call dispatch".to_string(),
                confidence: 20,
            });
        }
        if self.operand_decoding {
            score.add(DetectionEvidence::TextualSignal {
                name: "parseInt(x, 16) operand decoding".to_string(),
                confidence: 20,
            });
        }
        score
    }

    fn profile(&self) -> VmProfile {
        VmProfile {
            instruction_count: self.cases.len(),
            interpreter_location: self.location.clone(),
            complexity: Complexity::from_case_count(self.cases.len()),
            has_switch: true,
            has_instruction_array: self.table.is_some(),
            has_program_counter: true,
            vm_type: signatures::identify(self)
                .map_or_else(|| CUSTOM_VM.to_string(), |s| s.name.to_string()),
        }
    }
}

/// Finds bytecode interpreters.
pub struct VmDetector;

impl VmDetector {
    /// Runs the tree tier, falling back to the pattern tier when `tree` is
    /// `None` or the tree result is inconclusive.
    ///
    /// Returns the detection, the located interpreter for tree detections and
    /// the accumulated evidence.
    #[must_use]
    pub fn detect(
        unit: &SourceUnit,
        tree: Option<&SyntaxTree>,
    ) -> Option<(VmDetection, Option<Interpreter>, DetectionScore)> {
        if let Some(tree) = tree {
            match Self::locate(tree) {
                Some(interpreter) if interpreter.is_complete() => {
                    let profile = interpreter.profile();
                    let score = interpreter.score();
                    log::debug!(
                        "interpreter at {} ({} cases, {})",
                        profile.interpreter_location,
                        profile.instruction_count,
                        profile.vm_type
                    );
                    return Some((VmDetection::Tree(profile), Some(interpreter), score));
                }
                Some(_) => log::debug!("dispatch loop without all interpreter signals"),
                None => return None,
            }
        }
        Self::detect_pattern(&unit.normalized).map(|(profile, score)| {
            (VmDetection::Pattern(profile), None, score)
        })
    }

    /// Tree tier: the best dispatch loop in `tree`, complete or not.
    #[must_use]
    pub fn locate(tree: &SyntaxTree) -> Option<Interpreter> {
        let mut counters = CounterCandidates::default();
        tree.script().visit_with(&mut counters);
        let counters = counters.counters();
        if counters.is_empty() {
            return None;
        }

        let mut tables = ArrayLiterals::default();
        tree.script().visit_with(&mut tables);

        let mut finder = LoopFinder {
            tree,
            counters: &counters,
            tables: &tables.values,
            best: None,
        };
        tree.script().visit_with(&mut finder);
        finder.best
    }

    /// Pattern tier over raw text. Requires at least three of four signals.
    #[must_use]
    pub fn detect_pattern(text: &str) -> Option<(VmProfile, DetectionScore)> {
        let patterns = patterns();
        let score = DetectionScore::new();
        let mut has_instruction_array = false;
        let mut hits = 0;
        for (name, regex) in &patterns.signals {
            if regex.is_match(text) {
                hits += 1;
                has_instruction_array |= *name == INSTRUCTION_TABLE;
                score.add(DetectionEvidence::TextualSignal {
                    name: (*name).to_string(),
                    confidence: 15,
                });
            }
        }
        if hits < 3 {
            return None;
        }

        let cases = Patterns::count(patterns.case.as_ref(), text);
        let location = patterns
            .switch
            .as_ref()
            .and_then(|r| r.find(text))
            .map_or_else(|| "0:0".to_string(), |m| text_location(text, m.start()));
        let profile = VmProfile {
            instruction_count: cases,
            interpreter_location: location,
            complexity: Complexity::from_case_count(cases),
            has_switch: Patterns::count(patterns.switch.as_ref(), text) > 0,
            has_instruction_array,
            has_program_counter: Patterns::count(patterns.counter.as_ref(), text) > 0,
            vm_type: CUSTOM_VM.to_string(),
        };
        Some((profile, score))
    }
}

const INSTRUCTION_TABLE: &str = "numeric instruction table";

struct Patterns {
    signals: Vec<(&'static str, Regex)>,
    switch: Option<Regex>,
    case: Option<Regex>,
    counter: Option<Regex>,
}

impl Patterns {
    fn count(regex: Option<&Regex>, text: &str) -> usize {
        regex.map_or(0, |r| r.find_iter(text).count())
    }
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |source: &str| Regex::new(source).ok();
        let signals = [
            (
                "switch over table read",
                r"switch\s*\(\s*[\w$]+\s*\[\s*[\w$]+\s*(?:\+\+)?\s*\]\s*\)",
            ),
            ("apply/call dispatch", r"\.\s*(?:apply|call)\s*\("),
            ("parseInt(x, 16) operand decoding", r"parseInt\s*\([^,()]*,\s*16\s*\)"),
            (INSTRUCTION_TABLE, r"\[\s*(?:-?\d+\s*,\s*){8,}-?\d+\s*\]"),
        ]
        .into_iter()
        .filter_map(|(name, source)| compile(source).map(|regex| (name, regex)))
        .collect();
        Patterns {
            signals,
            switch: compile(r"switch\s*\("),
            case: compile(r"\bcase\s+[^:]+:"),
            counter: compile(r"[\w$]+\s*\[\s*[\w$]+\s*\+\+\s*\]"),
        }
    })
}

/// 1-based `line:column` of a byte offset.
fn text_location(text: &str, offset: usize) -> String {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    format!("{line}:{column}")
}

/// Variables initialised to a number literal and advanced with `++`/`+=`.
#[derive(Default)]
struct CounterCandidates {
    numeric: HashSet<String>,
    advanced: HashSet<String>,
}

impl CounterCandidates {
    fn counters(&self) -> HashSet<String> {
        self.numeric.intersection(&self.advanced).cloned().collect()
    }
}

impl Visit for CounterCandidates {
    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        if let (Pat::Ident(binding), Some(init)) = (&n.name, n.init.as_deref()) {
            if as_number(init).is_some() {
                self.numeric.insert(binding.id.sym.to_string());
            }
        }
        n.visit_children_with(self);
    }

    fn visit_update_expr(&mut self, n: &UpdateExpr) {
        if let Some(name) = as_ident(&n.arg) {
            self.advanced.insert(name.to_string());
        }
        n.visit_children_with(self);
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        if n.op == AssignOp::AddAssign {
            if let Some(name) = AssignTargetProbe::of(n).simple_name() {
                self.advanced.insert(name.to_string());
            }
        }
        n.visit_children_with(self);
    }
}

/// Every `var t = [literals...]` in the script.
#[derive(Default)]
struct ArrayLiterals {
    values: HashMap<String, Vec<BytecodeValue>>,
}

impl Visit for ArrayLiterals {
    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        if let (Pat::Ident(binding), Some(Expr::Array(array))) = (&n.name, n.init.as_deref()) {
            let values: Option<Vec<BytecodeValue>> = array
                .elems
                .iter()
                .map(|elem| {
                    let elem = elem.as_ref().filter(|e| e.spread.is_none())?;
                    match unparen(&elem.expr) {
                        Expr::Lit(Lit::Str(s)) => Some(BytecodeValue::Str(s.value.to_string())),
                        other => as_number(other).map(BytecodeValue::Num),
                    }
                })
                .collect();
            if let Some(values) = values.filter(|v| !v.is_empty()) {
                self.values.insert(binding.id.sym.to_string(), values);
            }
        }
        n.visit_children_with(self);
    }
}

struct LoopFinder<'a> {
    tree: &'a SyntaxTree,
    counters: &'a HashSet<String>,
    tables: &'a HashMap<String, Vec<BytecodeValue>>,
    best: Option<Interpreter>,
}

impl LoopFinder<'_> {
    fn examine(&mut self, body: &Stmt) {
        if self.best.as_ref().is_some_and(Interpreter::is_complete) {
            return;
        }
        let mut switches = FirstSwitch::default();
        body.visit_with(&mut switches);
        let Some(switch) = switches.found else {
            return;
        };

        let (counter, table) = match self.counter_read(&switch.discriminant) {
            Some(read) => read,
            None => {
                let Some(name) = as_ident(&switch.discriminant) else {
                    return;
                };
                let mut sources = AssignedFrom {
                    name,
                    values: Vec::new(),
                };
                body.visit_with(&mut sources);
                let Some(read) = sources
                    .values
                    .iter()
                    .find_map(|value| self.counter_read(value))
                else {
                    return;
                };
                read
            }
        };

        let mut scan = SignalScan::default();
        body.visit_with(&mut scan);
        let table = table.or_else(|| {
            scan.indexed
                .iter()
                .find(|(_, index)| index == &counter)
                .map(|(table, _)| table.clone())
        });
        let stack = scan
            .pushed
            .iter()
            .find(|name| scan.popped.contains(*name))
            .cloned();

        let interpreter = Interpreter {
            bytecode: table.as_ref().and_then(|t| self.tables.get(t)).cloned(),
            counter,
            table,
            stack,
            cases: switch.cases.clone(),
            location: self.tree.location(switch.span),
            dispatch_reads_counter: true,
            dispatch_call: scan.dispatch_call,
            operand_decoding: scan.operand_decoding,
        };

        let better = match &self.best {
            None => true,
            Some(best) => interpreter.is_complete() && !best.is_complete(),
        };
        if better {
            self.best = Some(interpreter);
        }
    }

    /// `pc`, `table[pc]`, `table[pc++]` or `table[pc + k]`.
    fn counter_read(&self, expr: &Expr) -> Option<(String, Option<String>)> {
        match unparen(expr) {
            Expr::Ident(id) if self.counters.contains(&*id.sym) => Some((id.sym.to_string(), None)),
            Expr::Member(member) => {
                let table = as_ident(&member.obj)?;
                let counter = index_counter(computed_index(member)?)?;
                self.counters
                    .contains(counter)
                    .then(|| (counter.to_string(), Some(table.to_string())))
            }
            _ => None,
        }
    }
}

fn index_counter(index: &Expr) -> Option<&str> {
    match unparen(index) {
        Expr::Ident(_) => as_ident(index),
        Expr::Update(update) => as_ident(&update.arg),
        Expr::Bin(bin) if matches!(bin.op, BinaryOp::Add | BinaryOp::Sub) => as_ident(&bin.left),
        _ => None,
    }
}

impl Visit for LoopFinder<'_> {
    fn visit_while_stmt(&mut self, n: &WhileStmt) {
        self.examine(&n.body);
        n.visit_children_with(self);
    }

    fn visit_do_while_stmt(&mut self, n: &DoWhileStmt) {
        self.examine(&n.body);
        n.visit_children_with(self);
    }

    fn visit_for_stmt(&mut self, n: &ForStmt) {
        self.examine(&n.body);
        n.visit_children_with(self);
    }
}

/// The first `switch` outside nested functions.
#[derive(Default)]
struct FirstSwitch {
    found: Option<SwitchStmt>,
}

impl Visit for FirstSwitch {
    fn visit_switch_stmt(&mut self, n: &SwitchStmt) {
        if self.found.is_none() {
            self.found = Some(n.clone());
        }
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}

/// Right-hand sides assigned to `name`.
struct AssignedFrom<'a> {
    name: &'a str,
    values: Vec<Expr>,
}

impl Visit for AssignedFrom<'_> {
    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        if let (Pat::Ident(binding), Some(init)) = (&n.name, n.init.as_deref()) {
            if &*binding.id.sym == self.name {
                self.values.push(init.clone());
            }
        }
        n.visit_children_with(self);
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        if AssignTargetProbe::of(n).simple_name() == Some(self.name) {
            self.values.push((*n.right).clone());
        }
        n.visit_children_with(self);
    }
}

/// Interpreter signals inside a loop body.
#[derive(Default)]
struct SignalScan {
    dispatch_call: bool,
    operand_decoding: bool,
    /// `(table, index variable)` pairs of computed member reads.
    indexed: Vec<(String, String)>,
    pushed: Vec<String>,
    popped: HashSet<String>,
}

impl Visit for SignalScan {
    fn visit_call_expr(&mut self, n: &CallExpr) {
        match method_call(n) {
            Some((_, "apply" | "call")) => self.dispatch_call = true,
            Some((object, "push")) => {
                if let Some(name) = as_ident(object) {
                    if !self.pushed.iter().any(|p| p == name) {
                        self.pushed.push(name.to_string());
                    }
                }
            }
            Some((object, "pop")) => {
                if let Some(name) = as_ident(object) {
                    self.popped.insert(name.to_string());
                }
            }
            _ => {}
        }
        if callee_name(n) == Some("parseInt")
            && n.args.get(1).and_then(|a| as_number(&a.expr)) == Some(16.0)
        {
            self.operand_decoding = true;
        }
        n.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if let (Some(table), Some(index)) = (as_ident(&n.obj), computed_index(n)) {
            if let Some(counter) = index_counter(index) {
                self.indexed.push((table.to_string(), counter.to_string()));
            }
        }
        n.visit_children_with(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::normalize;

    const STACK_VM: &str = r#"
        var code = [0, "2", 0, "3", 1, 0, "a", 2, 3];
        function run(ctx, fn) {
            var pc = 0;
            var stack = [];
            while (pc < code.length) {
                var op = code[pc++];
                switch (op) {
                    case 0: stack.push(parseInt(code[pc++], 16)); break;
                    case 1: var b = stack.pop(); var a = stack.pop(); stack.push(a + b); break;
                    case 2: var n = stack.pop(); stack.push(fn.apply(ctx, [n])); break;
                    case 3: return stack.pop();
                }
            }
        }
    "#;

    fn detect(source: &str) -> Option<(VmDetection, Option<Interpreter>, DetectionScore)> {
        let unit = normalize(source);
        let tree = SyntaxTree::parse(&unit.normalized).ok();
        VmDetector::detect(&unit, tree.as_ref())
    }

    #[test]
    fn test_tree_detection() {
        let (detection, interpreter, score) = detect(STACK_VM).unwrap();
        let VmDetection::Tree(profile) = &detection else {
            panic!("expected tree tier");
        };
        assert_eq!(profile.instruction_count, 4);
        assert_eq!(profile.complexity, Complexity::Low);
        assert!(profile.has_instruction_array);
        assert!(profile.has_program_counter);
        assert_eq!(profile.interpreter_location, "8:17");

        let interpreter = interpreter.unwrap();
        assert_eq!(interpreter.counter, "pc");
        assert_eq!(interpreter.table.as_deref(), Some("code"));
        assert_eq!(interpreter.stack.as_deref(), Some("stack"));
        assert_eq!(interpreter.bytecode.as_ref().map(Vec::len), Some(9));
        assert_eq!(score.score(), 100);
    }

    #[test]
    fn test_flattened_control_flow_is_not_a_vm() {
        let source = "var s = 1; while (true) { switch (s) { case 1: a(); s = 2; break; case 2: return; } }";
        let wrapped = format!("function f() {{ {source} }}");
        assert!(detect(&wrapped).is_none());
    }

    #[test]
    fn test_missing_signal_falls_back_to_patterns() {
        // No apply/call and no parseInt: inconclusive tree, too few textual signals.
        let source = r#"
            var code = [0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
            var pc = 0;
            while (pc < code.length) { switch (code[pc++]) { case 0: a(); break; case 1: b(); break; } }
        "#;
        assert!(detect(source).is_none());
    }

    #[test]
    fn test_pattern_tier_on_unparseable_text() {
        let source = r#"
            var code = [0, 1, 2, 0, 1, 2, 0, 1, 2, 3];
            while (pc < code.length) {
                switch (code[pc++]) {
                    case 0: stack.push(parseInt(code[pc++], 16)); break;
                    case 1: fn.apply(ctx, args); break;
                    case 2: @@@ broken
        "#;
        let (detection, interpreter, _) = detect(source).unwrap();
        assert!(interpreter.is_none());
        let VmDetection::Pattern(profile) = detection else {
            panic!("expected pattern tier");
        };
        assert_eq!(profile.vm_type, CUSTOM_VM);
        assert_eq!(profile.instruction_count, 3);
        assert!(profile.has_program_counter);
    }

    #[test]
    fn test_pattern_requires_three_signals() {
        assert!(VmDetector::detect_pattern("fn.apply(this, args); parseInt(x, 16);").is_none());
    }

    #[test]
    fn test_text_location() {
        assert_eq!(text_location("ab\ncd", 4), "2:2");
        assert_eq!(text_location("abc", 0), "1:1");
    }
}
