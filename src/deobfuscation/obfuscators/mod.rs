//! Commercial obfuscator identification.
//!
//! Each supported product implements [`Obfuscator`] and is kept in an
//! [`ObfuscatorRegistry`]. Identification never changes the tree; it only
//! accumulates [`DetectionScore`] evidence, which the engine turns into a
//! vendor signature when the score reaches the registry threshold.
//!
//! # Supported products
//!
//! | Id | Product | Characteristic idioms |
//! |----|---------|-----------------------|
//! | `javascript-obfuscator` | javascript-obfuscator / obfuscator.io | `_0x` names, rotated string table, `while (!![])` dispatch |
//! | `jscrambler` | Jscrambler | `_$_` string tables, `for (;;)` dispatch with numeric states, char-code helpers |

mod javascript_obfuscator;
mod jscrambler;
mod registry;

pub use javascript_obfuscator::JavascriptObfuscator;
pub use jscrambler::Jscrambler;
pub use registry::{ObfuscatorInfo, ObfuscatorRegistry};

use crate::{
    deobfuscation::detection::DetectionScore,
    source::{SourceUnit, SyntaxTree},
};

/// A commercial obfuscator the engine can identify.
///
/// Implementations are stateless and shared between runs.
pub trait Obfuscator: Send + Sync {
    /// Stable identifier, reported as the vendor technique name.
    fn id(&self) -> String;

    /// Human-readable product name.
    fn name(&self) -> String;

    /// Scores how strongly the input looks like this product's output.
    ///
    /// # Arguments
    ///
    /// * `unit` - The normalised source.
    /// * `tree` - The parsed tree, or `None` if the source did not parse.
    fn detect(&self, unit: &SourceUnit, tree: Option<&SyntaxTree>) -> DetectionScore;

    /// Product versions the heuristics were written against.
    fn supported_versions(&self) -> &[&str] {
        &[]
    }

    /// Get a description of this obfuscator.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
