//! Constant folding.
//!
//! Replaces binary expressions whose operands are both literals with the
//! literal result:
//!
//! ```text
//! // Before
//! var size = 16 * 4 + 1;
//! var key = "ab" + "cd" + 7;
//!
//! // After
//! var size = 65;
//! var key = "abcd7";
//! ```
//!
//! Arithmetic follows IEEE-754 like the language does. Results that are not
//! finite are left unfolded. Number-to-string concatenation is folded only for
//! integers, where the printed form is unambiguous. Bitwise operators use
//! 32-bit integer semantics.

use swc_core::ecma::{
    ast::{BinExpr, BinaryOp, Expr},
    visit::{VisitMut, VisitMutWith},
};

use crate::{
    deobfuscation::{
        changes::TransformationKind,
        pass::{AstPass, PassContext, PassReport},
        passes::utils::{as_number, as_string, number, number_to_js_string, string, to_int32, to_uint32},
    },
    source::SyntaxTree,
    Result,
};

/// Folds binary expressions over literal operands.
pub struct ConstantFoldingPass;

impl Default for ConstantFoldingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantFoldingPass {
    /// Creates a new constant folding pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AstPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn kind(&self) -> TransformationKind {
        TransformationKind::ConstantFolding
    }

    fn description(&self) -> &'static str {
        "Folds arithmetic, concatenation and bitwise expressions over literals"
    }

    fn run(&self, tree: &mut SyntaxTree, _ctx: &PassContext) -> Result<PassReport> {
        let mut folder = Folder { folded: 0 };
        tree.script_mut().visit_mut_with(&mut folder);

        let mut report = PassReport::new();
        report.changed(
            TransformationKind::ConstantFolding,
            folder.folded,
            format!("folded {} expressions", folder.folded),
        );
        Ok(report)
    }
}

struct Folder {
    folded: usize,
}

impl VisitMut for Folder {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        if let Expr::Bin(bin) = expr {
            if let Some(folded) = fold_binary(bin) {
                *expr = folded;
                self.folded += 1;
            }
        }
    }
}

/// Folds `bin` if both operands are literals and the result is representable.
#[must_use]
pub fn fold_binary(bin: &BinExpr) -> Option<Expr> {
    if bin.op == BinaryOp::Add {
        match (as_string(&bin.left), as_string(&bin.right)) {
            (Some(l), Some(r)) => return Some(string(&format!("{l}{r}"))),
            (Some(l), None) => {
                let r = number_to_js_string(as_number(&bin.right)?)?;
                return Some(string(&format!("{l}{r}")));
            }
            (None, Some(r)) => {
                let l = number_to_js_string(as_number(&bin.left)?)?;
                return Some(string(&format!("{l}{r}")));
            }
            (None, None) => {}
        }
    }

    let l = as_number(&bin.left)?;
    let r = as_number(&bin.right)?;
    let value = fold_numeric(bin.op, l, r)?;
    if !value.is_finite() {
        return None;
    }
    Some(number(value))
}

/// Applies a numeric binary operator with JavaScript semantics.
#[must_use]
pub fn fold_numeric(op: BinaryOp, l: f64, r: f64) -> Option<f64> {
    let value = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        BinaryOp::Exp => l.powf(r),
        BinaryOp::BitAnd => f64::from(to_int32(l) & to_int32(r)),
        BinaryOp::BitOr => f64::from(to_int32(l) | to_int32(r)),
        BinaryOp::BitXor => f64::from(to_int32(l) ^ to_int32(r)),
        BinaryOp::LShift => f64::from(to_int32(l).wrapping_shl(to_uint32(r) & 31)),
        BinaryOp::RShift => f64::from(to_int32(l).wrapping_shr(to_uint32(r) & 31)),
        BinaryOp::ZeroFillRShift => f64::from(to_uint32(l).wrapping_shr(to_uint32(r) & 31)),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::config::{EngineConfig, OptionFlags};

    fn fold(source: &str) -> (String, PassReport) {
        let mut tree = SyntaxTree::parse(source).unwrap();
        let ctx = PassContext::new(EngineConfig::default(), OptionFlags::empty());
        let report = ConstantFoldingPass::new().run(&mut tree, &ctx).unwrap();
        (tree.print().unwrap(), report)
    }

    #[test]
    fn test_folds_arithmetic() {
        let (code, report) = fold("const x = 1 + 2;");
        assert!(code.contains("const x = 3;"));
        assert!(report.is_changed());
    }

    #[test]
    fn test_folds_nested_expressions() {
        let (code, _) = fold("var x = (16 * 4) + 1;");
        assert!(code.contains("65"));
    }

    #[test]
    fn test_folds_string_concatenation() {
        let (code, _) = fold(r#"var k = "ab" + "cd" + 7;"#);
        assert!(code.contains("abcd7"));
    }

    #[test]
    fn test_negative_result_is_unary() {
        let (code, _) = fold("var n = 1 - 5;");
        assert!(code.contains("-4"));
        assert!(SyntaxTree::parse(&code).is_ok());
    }

    #[test]
    fn test_skips_non_finite() {
        let (code, report) = fold("var n = 1 / 0;");
        assert!(code.contains("1 / 0"));
        assert!(report.is_empty());
    }

    #[test]
    fn test_skips_fractional_concatenation() {
        let (code, _) = fold(r#"var n = "v" + 0.1;"#);
        assert!(code.contains("0.1"));
    }

    #[test]
    fn test_bitwise_semantics() {
        assert_eq!(fold_numeric(BinaryOp::BitOr, 4_294_967_295.0, 0.0), Some(-1.0));
        assert_eq!(fold_numeric(BinaryOp::ZeroFillRShift, -1.0, 0.0), Some(4_294_967_295.0));
        assert_eq!(fold_numeric(BinaryOp::LShift, 1.0, 33.0), Some(2.0));
        assert_eq!(fold_numeric(BinaryOp::BitXor, 0x5a as f64, 0x0f as f64), Some(85.0));
    }

    #[test]
    fn test_leaves_variables_alone() {
        let (code, report) = fold("var n = a + 1;");
        assert!(code.contains("a + 1"));
        assert!(report.is_empty());
    }
}
