//! Built-in deobfuscation passes.
//!
//! Every pass implements [`AstPass`](crate::deobfuscation::AstPass), rewrites
//! the [`SyntaxTree`](crate::source::SyntaxTree) in place and hands a
//! [`PassReport`](crate::deobfuscation::PassReport) back to the scheduler.
//!
//! # Generic pipeline
//!
//! Run to a bounded fixed point before and after the targeted passes.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`ConstantFoldingPass`] | Folds binary expressions over literals |
//! | [`DeadBranchPass`] | Keeps the taken arm of statically decided `if` and `?:` |
//! | [`SimplifyPass`] | Rewrites `!0`, `!![]`, parenthesised literals and (aggressive) `obj["name"]` |
//! | [`RenamePass`] | Renames `_0x`-style declared names (opt-in) |
//!
//! # Targeted passes
//!
//! Run once, in this order, between the two generic sweeps.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`StringArrayPass`] | Resolves rotation and inlines string-array lookups |
//! | [`ControlFlowPass`] | Linearises state-machine and split-order dispatch loops |
//!
//! [`VendorSignaturePass`] runs last, after the second generic sweep.

mod constants;
mod controlflow;
mod deadbranch;
mod rename;
mod rotation;
mod simplify;
mod strings;
pub(crate) mod utils;
mod vendor;

pub use self::constants::ConstantFoldingPass;
pub use self::controlflow::ControlFlowPass;
pub use self::deadbranch::DeadBranchPass;
pub use self::rename::RenamePass;
pub use self::rotation::{Accessor, Rotation, RotationSimulator};
pub use self::simplify::SimplifyPass;
pub use self::strings::StringArrayPass;
pub use self::vendor::{calculate_confidence, VendorSignaturePass};

pub(crate) use self::constants::fold_numeric;
pub(crate) use self::rename::declared_names;
