//! Source text handling: normalisation and the parser/printer adapter.
//!
//! Everything that knows about raw text lives here. [`normalize`] prepares the
//! text, [`SyntaxTree`] turns it into a mutable tree and prints it back.

mod normalize;
mod tree;

pub use normalize::{normalize, NormalizationHints, SourceUnit};
pub use tree::SyntaxTree;
