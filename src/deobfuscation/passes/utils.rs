//! Shared utilities for deobfuscation passes.
//!
//! This module contains common functionality used by multiple passes: literal
//! construction and inspection, identifier usage counting and a few JavaScript
//! value conversions.

use std::collections::{HashMap, HashSet};

use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::{
            AssignExpr, Bool, CallExpr, Callee, Decl, Expr, Ident, Lit, MemberExpr,
            MemberProp, Number, ParenExpr, PropName, Stmt, Str, UnaryExpr, UnaryOp, VarDeclKind,
        },
        visit::{Visit, VisitWith},
    },
};

/// Follows a chain of mappings to find the ultimate target.
///
/// Given a map where keys point to values, and values may also be keys,
/// this function follows the chain until reaching a value that is not a key.
/// Handles cycles by stopping when a previously visited key is encountered.
///
/// Used to resolve alias chains such as `var b = a; var c = b;`.
///
/// # Arguments
///
/// * `map` - The mapping to follow.
/// * `start` - The starting key.
///
/// # Returns
///
/// The ultimate target after following the chain.
#[must_use]
pub fn resolve_chain<K>(map: &HashMap<K, K>, start: K) -> K
where
    K: Clone + std::hash::Hash + Eq,
{
    let mut current = start;
    let mut visited = HashSet::new();

    while let Some(next) = map.get(&current) {
        if !visited.insert(current.clone()) {
            // Cycle detected - return current position
            break;
        }
        current = next.clone();
    }

    current
}

/// Builds a number literal. Negative values become a unary minus over the
/// magnitude so the printed form re-parses to the same tree.
#[must_use]
pub fn number(value: f64) -> Expr {
    if value < 0.0 || (value == 0.0 && value.is_sign_negative()) {
        return Expr::Unary(UnaryExpr {
            span: DUMMY_SP,
            op: UnaryOp::Minus,
            arg: Box::new(number(-value)),
        });
    }
    Expr::Lit(Lit::Num(Number {
        span: DUMMY_SP,
        value,
        raw: None,
    }))
}

/// Builds a string literal.
#[must_use]
pub fn string(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

/// Builds a boolean literal.
#[must_use]
pub fn boolean(value: bool) -> Expr {
    Expr::Lit(Lit::Bool(Bool {
        span: DUMMY_SP,
        value,
    }))
}

/// Wraps `expr` in parentheses unless it is already a primary expression.
#[must_use]
pub fn parenthesize(expr: Expr) -> Expr {
    match expr {
        Expr::Lit(_)
        | Expr::Ident(_)
        | Expr::This(_)
        | Expr::Array(_)
        | Expr::Object(_)
        | Expr::Paren(_)
        | Expr::Member(_)
        | Expr::Call(_) => expr,
        other => Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(other),
        }),
    }
}

/// Strips any number of enclosing parentheses.
#[must_use]
pub fn unparen(expr: &Expr) -> &Expr {
    let mut current = expr;
    while let Expr::Paren(paren) = current {
        current = &*paren.expr;
    }
    current
}

/// Reads a numeric literal, including a negated one.
#[must_use]
pub fn as_number(expr: &Expr) -> Option<f64> {
    match unparen(expr) {
        Expr::Lit(Lit::Num(num)) => Some(num.value),
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Minus,
            arg,
            ..
        }) => match unparen(arg) {
            Expr::Lit(Lit::Num(num)) => Some(-num.value),
            _ => None,
        },
        _ => None,
    }
}

/// Reads a string literal.
#[must_use]
pub fn as_string(expr: &Expr) -> Option<&str> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(s)) => Some(&*s.value),
        _ => None,
    }
}

/// Reads a boolean literal.
#[must_use]
pub fn as_bool(expr: &Expr) -> Option<bool> {
    match unparen(expr) {
        Expr::Lit(Lit::Bool(b)) => Some(b.value),
        _ => None,
    }
}

/// Reads a plain identifier reference.
#[must_use]
pub fn as_ident(expr: &Expr) -> Option<&str> {
    match unparen(expr) {
        Expr::Ident(id) => Some(&*id.sym),
        _ => None,
    }
}

/// Decides the truthiness of a test that is a boolean or numeric literal, or
/// one of the usual encodings of `true` (`!0`, `!![]`, `1`).
#[must_use]
pub fn static_truthiness(expr: &Expr) -> Option<bool> {
    if let Some(value) = as_bool(expr) {
        return Some(value);
    }
    if let Some(value) = as_number(expr) {
        return Some(value != 0.0 && !value.is_nan());
    }
    match unparen(expr) {
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang,
            arg,
            ..
        }) => match unparen(arg) {
            Expr::Array(arr) if arr.elems.is_empty() => Some(false),
            inner => static_truthiness(inner).map(|v| !v),
        },
        _ => None,
    }
}

/// Returns `true` for names in the hash-like `_0x1a2b` style.
#[must_use]
pub fn is_hash_name(name: &str) -> bool {
    name.strip_prefix("_0x").is_some_and(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// Returns `true` if `name` can be written as a dotted property name.
#[must_use]
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Converts a number the way string concatenation would, for the values where
/// that conversion is unambiguous (finite integers below 10^15).
#[must_use]
pub fn number_to_js_string(value: f64) -> Option<String> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        if value == 0.0 {
            return Some("0".to_string());
        }
        #[allow(clippy::cast_possible_truncation)]
        return Some(format!("{}", value as i64));
    }
    None
}

/// ECMAScript `ToInt32`.
#[must_use]
pub fn to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    let truncated = value.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bits = modulo as u32;
    bits as i32
}

/// ECMAScript `ToUint32`.
#[must_use]
pub fn to_uint32(value: f64) -> u32 {
    to_int32(value) as u32
}

/// ECMAScript `parseInt` for the string forms obfuscators produce.
///
/// Leading whitespace and a sign are accepted, a `0x` prefix selects base 16
/// when no radix is given, and parsing stops at the first invalid digit.
/// Returns `NaN` when no digit was read.
#[must_use]
pub fn parse_int(text: &str, radix: Option<u32>) -> f64 {
    let trimmed = text.trim_start();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (radix, digits) = match radix {
        None | Some(16) if body.starts_with("0x") || body.starts_with("0X") => (16, &body[2..]),
        None | Some(0) => (10, body),
        Some(r) if (2..=36).contains(&r) => (r, body),
        Some(_) => return f64::NAN,
    };

    let mut value = 0.0_f64;
    let mut read = 0;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * f64::from(radix) + f64::from(d);
                read += 1;
            }
            None => break,
        }
    }
    if read == 0 {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Collects what an assignment target refers to, independent of how the
/// target is represented.
#[derive(Debug, Default)]
pub struct AssignTargetProbe {
    /// Identifiers bound or referenced by the target.
    pub idents: Vec<String>,
    /// The outermost member expression the target writes through, if any.
    pub member: Option<MemberExpr>,
}

impl Visit for AssignTargetProbe {
    fn visit_ident(&mut self, n: &Ident) {
        self.idents.push(n.sym.to_string());
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if self.member.is_none() {
            self.member = Some(n.clone());
        }
    }
}

impl AssignTargetProbe {
    /// Probes the left-hand side of `assign`.
    #[must_use]
    pub fn of(assign: &AssignExpr) -> Self {
        let mut probe = Self::default();
        assign.left.visit_with(&mut probe);
        probe
    }

    /// The assigned variable when the target is a plain identifier.
    #[must_use]
    pub fn simple_name(&self) -> Option<&str> {
        match (self.member.as_ref(), self.idents.as_slice()) {
            (None, [name]) => Some(name),
            _ => None,
        }
    }

    /// The object identifier written through when the target is `name[...]` or `name.x`.
    #[must_use]
    pub fn member_object(&self) -> Option<&str> {
        self.member.as_ref().and_then(|m| as_ident(&m.obj))
    }
}

/// Counts references to a name. Property names are not references.
#[derive(Debug)]
pub struct RefCounter<'a> {
    name: &'a str,
    /// Number of references seen.
    pub count: usize,
}

impl<'a> RefCounter<'a> {
    /// Creates a counter for `name`.
    #[must_use]
    pub fn new(name: &'a str) -> Self {
        Self { name, count: 0 }
    }
}

impl Visit for RefCounter<'_> {
    fn visit_ident(&mut self, n: &Ident) {
        if &*n.sym == self.name {
            self.count += 1;
        }
    }

    fn visit_member_prop(&mut self, n: &MemberProp) {
        if let MemberProp::Computed(computed) = n {
            computed.visit_with(self);
        }
    }

    fn visit_prop_name(&mut self, n: &PropName) {
        if let PropName::Computed(computed) = n {
            computed.visit_with(self);
        }
    }
}

/// Counts references to `name` inside `node`.
#[must_use]
pub fn count_refs<N>(node: &N, name: &str) -> usize
where
    N: for<'a> VisitWith<RefCounter<'a>>,
{
    let mut counter = RefCounter::new(name);
    node.visit_with(&mut counter);
    counter.count
}

/// Returns `true` if `stmts` declare anything block-scoped at their top level,
/// so they cannot be spliced into the enclosing scope.
#[must_use]
pub fn has_block_scoped_decl(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Decl(Decl::Var(var)) => var.kind != VarDeclKind::Var,
        Stmt::Decl(_) => true,
        _ => false,
    })
}

/// Returns the callee name when the call is `name(...)`.
#[must_use]
pub fn callee_name(call: &CallExpr) -> Option<&str> {
    match &call.callee {
        Callee::Expr(expr) => as_ident(expr),
        _ => None,
    }
}

/// Returns `(object, method)` when the call is `object.method(...)`.
#[must_use]
pub fn method_call(call: &CallExpr) -> Option<(&Expr, &str)> {
    let Callee::Expr(expr) = &call.callee else {
        return None;
    };
    let Expr::Member(member) = unparen(expr) else {
        return None;
    };
    Some((&*member.obj, member_name(member)?))
}

/// Returns the static property name of `obj.name` or `obj["name"]`.
#[must_use]
pub fn member_name(member: &MemberExpr) -> Option<&str> {
    match &member.prop {
        MemberProp::Ident(id) => Some(&*id.sym),
        MemberProp::Computed(computed) => as_string(&computed.expr),
        MemberProp::PrivateName(_) => None,
    }
}

/// Returns the computed index expression of `obj[index]`.
#[must_use]
pub fn computed_index(member: &MemberExpr) -> Option<&Expr> {
    match &member.prop {
        MemberProp::Computed(computed) => Some(&*computed.expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_chain_follows_mappings() {
        let mut map = HashMap::new();
        map.insert("c", "b");
        map.insert("b", "a");

        assert_eq!(resolve_chain(&map, "c"), "a");
        assert_eq!(resolve_chain(&map, "a"), "a");
    }

    #[test]
    fn test_resolve_chain_handles_cycles() {
        let mut map = HashMap::new();
        map.insert(1, 2);
        map.insert(2, 1);

        let result = resolve_chain(&map, 1);
        assert!(result == 1 || result == 2);
    }

    #[test]
    fn test_number_literal_sign() {
        assert_eq!(as_number(&number(-4.0)), Some(-4.0));
        assert!(matches!(number(-4.0), Expr::Unary(_)));
        assert!(matches!(number(4.0), Expr::Lit(Lit::Num(_))));
    }

    #[test]
    fn test_static_truthiness() {
        assert_eq!(static_truthiness(&boolean(true)), Some(true));
        assert_eq!(static_truthiness(&number(0.0)), Some(false));
        assert_eq!(static_truthiness(&number(f64::NAN)), Some(false));
        let name = Expr::Ident(Ident::new("x".into(), DUMMY_SP));
        assert_eq!(static_truthiness(&name), None);
    }

    #[test]
    fn test_hash_names() {
        assert!(is_hash_name("_0x1f2e"));
        assert!(!is_hash_name("_0x"));
        assert!(!is_hash_name("_0xzz"));
        assert!(!is_hash_name("counter"));
    }

    #[test]
    fn test_identifier_names() {
        assert!(is_identifier_name("log"));
        assert!(is_identifier_name("$el_2"));
        assert!(!is_identifier_name("2x"));
        assert!(!is_identifier_name("a-b"));
        assert!(!is_identifier_name(""));
    }

    #[test]
    fn test_number_to_js_string() {
        assert_eq!(number_to_js_string(42.0).as_deref(), Some("42"));
        assert_eq!(number_to_js_string(-3.0).as_deref(), Some("-3"));
        assert_eq!(number_to_js_string(0.5), None);
        assert_eq!(number_to_js_string(1e20), None);
    }

    #[test]
    fn test_int32_conversion() {
        assert_eq!(to_int32(4_294_967_295.0), -1);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("123abc", None), 123.0);
        assert_eq!(parse_int("  -42", None), -42.0);
        assert_eq!(parse_int("ff", Some(16)), 255.0);
        assert_eq!(parse_int("0x1A", None), 26.0);
        assert!(parse_int("abc", None).is_nan());
    }
}
