//! Bytecode-interpreter ("JSVMP") obfuscation.
//!
//! Some obfuscators compile the protected program into a custom bytecode and
//! ship an interpreter for it: a program counter, a table of instructions and
//! a `switch` that dispatches on the current opcode. This module finds such
//! interpreters, describes their instruction set and, where the interpreter
//! matches a known signature, restores the program by symbolic execution.
//!
//! # Detection tiers
//!
//! Detection is split into two tiers that are never merged:
//!
//! - [`VmDetection::Tree`] comes from the syntax tree and requires every
//!   interpreter signal to co-occur.
//! - [`VmDetection::Pattern`] comes from regular expressions over the text. It
//!   is only consulted when the text does not parse or the tree detector found
//!   a dispatch loop without the remaining signals, and it carries a lower
//!   confidence ceiling.
//!
//! # Restoration
//!
//! [`VmRestorer`] runs only on request. A recognised interpreter is executed
//! symbolically over its literal bytecode through the signature's template
//! table. Anything else gets conservative cleanup and one unresolved part per
//! instruction.

mod detector;
mod instructions;
mod restore;
mod signatures;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

pub use detector::{BytecodeValue, Interpreter, VmDetector};
pub use instructions::extract_instructions;
pub use restore::VmRestorer;
pub use signatures::{HandlerTemplate, VmSignature, STACK_BYTECODE};

/// Size class of an interpreter, by number of dispatch cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Fewer than 10 cases.
    Low,
    /// Fewer than 50 cases.
    Medium,
    /// 50 cases or more.
    High,
}

impl Complexity {
    /// Classifies an interpreter with `cases` dispatch cases.
    #[must_use]
    pub fn from_case_count(cases: usize) -> Self {
        match cases {
            0..=9 => Complexity::Low,
            10..=49 => Complexity::Medium,
            _ => Complexity::High,
        }
    }
}

/// What the detector learned about an interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmProfile {
    /// Number of dispatch cases.
    pub instruction_count: usize,
    /// `line:column` of the dispatch `switch`.
    pub interpreter_location: String,
    /// Size class.
    pub complexity: Complexity,
    /// A dispatch `switch` was found.
    pub has_switch: bool,
    /// A table indexed by the program counter was found.
    pub has_instruction_array: bool,
    /// A numeric program counter was found.
    pub has_program_counter: bool,
    /// `custom`, or the name of a matching signature.
    pub vm_type: String,
}

/// Name reported for interpreters that match no signature.
pub const CUSTOM_VM: &str = "custom";

/// A detected interpreter, tagged with the tier that found it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tier", content = "profile", rename_all = "lowercase")]
pub enum VmDetection {
    /// Found in the syntax tree with every signal present.
    Tree(VmProfile),
    /// Found by textual patterns only.
    Pattern(VmProfile),
}

impl VmDetection {
    /// The profile, whichever tier produced it.
    #[must_use]
    pub fn profile(&self) -> &VmProfile {
        match self {
            VmDetection::Tree(profile) | VmDetection::Pattern(profile) => profile,
        }
    }

    /// `"tree"` or `"pattern"`.
    #[must_use]
    pub fn tier(&self) -> &'static str {
        match self {
            VmDetection::Tree(_) => "tree",
            VmDetection::Pattern(_) => "pattern",
        }
    }
}

/// Broad class of an instruction handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstructionType {
    /// Arithmetic or bitwise operators.
    Arithmetic,
    /// Only pushes and pops.
    Stack,
    /// Reads a property or variable.
    Load,
    /// Writes a property or variable.
    Store,
    /// Only moves the program counter.
    Jump,
    /// Invokes a function through `apply` or `call`.
    Call,
    /// None of the above.
    Unknown,
}

/// One entry of an interpreter's instruction set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionDescriptor {
    /// The case label, as written.
    pub opcode: String,
    /// Mnemonic.
    pub name: String,
    /// Class of the handler.
    #[serde(rename = "type")]
    pub kind: InstructionType,
    /// What the handler does.
    pub description: String,
}

/// A piece of the interpreted program that could not be mapped back to source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedPart {
    /// Where the part lives (`line:column` or an opcode reference).
    pub location: String,
    /// Why it was not restored.
    pub reason: String,
    /// What an analyst could do next.
    pub suggestion: String,
}

/// Outcome of [`VmRestorer::restore_code`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationResult {
    /// Restored listing, or the cleaned-up interpreter source.
    pub code: String,
    /// Confidence in `code`, below the fully-restored ceiling whenever
    /// `unresolved_parts` is not empty.
    pub confidence: f64,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
    /// Parts left unresolved.
    pub unresolved_parts: Vec<UnresolvedPart>,
}

impl RestorationResult {
    /// `true` if nothing was left unresolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved_parts.is_empty()
    }
}
