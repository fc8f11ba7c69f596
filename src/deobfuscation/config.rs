//! Configuration for the deobfuscation engine.
//!
//! [`EngineConfig`] holds the tunables of the pipeline itself (iteration caps,
//! simulation bounds, confidence constants). [`DeobfuscateOptions`] is the
//! per-call request. [`OptionFlags`] is the compact form of the boolean options
//! that feeds the cache key.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Configuration for the deobfuscation engine.
///
/// The defaults are the values the pipeline is tuned for. Confidence constants
/// can be adjusted freely as long as the ceilings keep their order
/// (`pattern_vm_ceiling <= tree_vm_ceiling <= partial_restoration_ceiling <= 1`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum fixed-point iterations of the generic pass pipeline (default: 5).
    pub max_iterations: usize,

    /// Step bound for the string-array rotation simulator (default: 10,000).
    pub rotation_max_steps: usize,

    /// Step bound for symbolic execution of recognised bytecode (default: 10,000).
    pub vm_max_steps: usize,

    /// Detection threshold for vendor identification (0-100, default: 50).
    pub detection_threshold: usize,

    /// Confidence subtracted per unresolved restoration part (default: 0.05).
    pub unresolved_penalty: f64,

    /// Confidence subtracted per failed transformation record (default: 0.05).
    pub failure_penalty: f64,

    /// Confidence ceiling when a tree-tier VM was found but not restored (default: 0.5).
    pub tree_vm_ceiling: f64,

    /// Confidence ceiling when only the pattern tier found a VM (default: 0.3).
    pub pattern_vm_ceiling: f64,

    /// Confidence ceiling when a restoration left unresolved parts (default: 0.75).
    pub partial_restoration_ceiling: f64,

    /// Maximum characters of output sent to the collaborator (default: 4,000).
    pub collaborator_excerpt_chars: usize,

    /// How long to wait for the collaborator (default: 30 seconds).
    pub collaborator_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            rotation_max_steps: 10_000,
            vm_max_steps: 10_000,
            detection_threshold: 50,
            unresolved_penalty: 0.05,
            failure_penalty: 0.05,
            tree_vm_ceiling: 0.5,
            pattern_vm_ceiling: 0.3,
            partial_restoration_ceiling: 0.75,
            collaborator_excerpt_chars: 4_000,
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration for quick processing.
    ///
    /// Uses a single pipeline iteration and a tenth of the simulation budgets.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_iterations: 1,
            rotation_max_steps: 1_000,
            vm_max_steps: 1_000,
            ..Self::default()
        }
    }

    /// Sets the collaborator timeout.
    #[must_use]
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Sets the fixed-point iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }
}

/// External cleanup collaborator requested by the caller.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorChoice {
    /// No collaborator.
    #[default]
    None,
    /// An OpenAI chat backend.
    OpenAi,
    /// An Anthropic chat backend.
    Anthropic,
}

bitflags! {
    /// Boolean request options in compact form.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OptionFlags: u32 {
        /// Rename hash-like identifiers.
        const RENAME_VARIABLES = 0x0001;
        /// Enable transformations that are not strictly necessary.
        const AGGRESSIVE = 0x0002;
        /// Attempt VM restoration.
        const AGGRESSIVE_VM = 0x0004;
        /// Include extracted instruction descriptors in the result.
        const EXTRACT_INSTRUCTIONS = 0x0008;
        /// Replace decrypt helper calls with placeholders.
        const DECRYPT_STRINGS = 0x0010;
        /// Restore flattened control flow.
        const RESTORE_CONTROL_FLOW = 0x0020;
    }
}

/// Per-call deobfuscation request.
///
/// Deserialises from camelCase JSON. Missing fields take their defaults:
/// `decryptStrings` and `restoreControlFlow` are on, everything else off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeobfuscateOptions {
    /// The source text to deobfuscate.
    pub code: String,
    /// Rename `_0x...` style identifiers to sequential names.
    pub rename_variables: bool,
    /// Enable aggressive simplification and scaffolding removal.
    pub aggressive: bool,
    /// Attempt bytecode interpreter restoration.
    #[serde(rename = "aggressiveVM")]
    pub aggressive_vm: bool,
    /// Report extracted instruction descriptors.
    pub extract_instructions: bool,
    /// Replace decrypt helper call sites with placeholders.
    pub decrypt_strings: bool,
    /// Linearise flattened control flow.
    pub restore_control_flow: bool,
    /// Optional external cleanup collaborator.
    pub collaborator: CollaboratorChoice,
}

impl Default for DeobfuscateOptions {
    fn default() -> Self {
        Self {
            code: String::new(),
            rename_variables: false,
            aggressive: false,
            aggressive_vm: false,
            extract_instructions: false,
            decrypt_strings: true,
            restore_control_flow: true,
            collaborator: CollaboratorChoice::None,
        }
    }
}

impl DeobfuscateOptions {
    /// Creates default options for `code`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Enables identifier renaming.
    #[must_use]
    pub fn rename_variables(mut self, on: bool) -> Self {
        self.rename_variables = on;
        self
    }

    /// Enables aggressive mode.
    #[must_use]
    pub fn aggressive(mut self, on: bool) -> Self {
        self.aggressive = on;
        self
    }

    /// Enables VM restoration.
    #[must_use]
    pub fn aggressive_vm(mut self, on: bool) -> Self {
        self.aggressive_vm = on;
        self
    }

    /// Enables instruction extraction.
    #[must_use]
    pub fn extract_instructions(mut self, on: bool) -> Self {
        self.extract_instructions = on;
        self
    }

    /// Toggles decrypt helper placeholders.
    #[must_use]
    pub fn decrypt_strings(mut self, on: bool) -> Self {
        self.decrypt_strings = on;
        self
    }

    /// Toggles control-flow restoration.
    #[must_use]
    pub fn restore_control_flow(mut self, on: bool) -> Self {
        self.restore_control_flow = on;
        self
    }

    /// Selects a collaborator.
    #[must_use]
    pub fn collaborator(mut self, choice: CollaboratorChoice) -> Self {
        self.collaborator = choice;
        self
    }

    /// Packs the boolean options into [`OptionFlags`].
    #[must_use]
    pub fn flags(&self) -> OptionFlags {
        let mut flags = OptionFlags::empty();
        flags.set(OptionFlags::RENAME_VARIABLES, self.rename_variables);
        flags.set(OptionFlags::AGGRESSIVE, self.aggressive);
        flags.set(OptionFlags::AGGRESSIVE_VM, self.aggressive_vm);
        flags.set(OptionFlags::EXTRACT_INSTRUCTIONS, self.extract_instructions);
        flags.set(OptionFlags::DECRYPT_STRINGS, self.decrypt_strings);
        flags.set(OptionFlags::RESTORE_CONTROL_FLOW, self.restore_control_flow);
        flags
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_option_defaults() {
        let options: DeobfuscateOptions = serde_json::from_str(r#"{"code":"x"}"#).unwrap();
        assert_eq!(options.code, "x");
        assert!(options.decrypt_strings);
        assert!(options.restore_control_flow);
        assert!(!options.aggressive);
        assert!(!options.aggressive_vm);
        assert_eq!(options.collaborator, CollaboratorChoice::None);
        assert_eq!(
            options.flags(),
            OptionFlags::DECRYPT_STRINGS | OptionFlags::RESTORE_CONTROL_FLOW
        );
    }

    #[test]
    fn test_option_field_names() {
        let options: DeobfuscateOptions = serde_json::from_str(
            r#"{"code":"","aggressiveVM":true,"extractInstructions":true,"collaborator":"anthropic"}"#,
        )
        .unwrap();
        assert!(options.aggressive_vm);
        assert!(options.extract_instructions);
        assert_eq!(options.collaborator, CollaboratorChoice::Anthropic);
    }

    #[test]
    fn test_collaborator_names() {
        assert_eq!(CollaboratorChoice::OpenAi.to_string(), "openai");
        assert_eq!(
            CollaboratorChoice::from_str("anthropic").unwrap(),
            CollaboratorChoice::Anthropic
        );
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.rotation_max_steps, 10_000);
        assert!(config.pattern_vm_ceiling <= config.tree_vm_ceiling);
        assert!(config.tree_vm_ceiling <= config.partial_restoration_ceiling);
        assert_eq!(EngineConfig::fast().max_iterations, 1);
    }
}
