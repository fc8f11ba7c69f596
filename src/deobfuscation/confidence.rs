//! Aggregate confidence scoring.

use crate::deobfuscation::{config::EngineConfig, result::VmDetected};

/// Computes the confidence of a whole run.
///
/// The score starts at 1 and loses a fixed penalty per unresolved restoration
/// part and per failed transformation record. Interpreter findings then cap it:
///
/// | Situation | Ceiling |
/// |-----------|---------|
/// | interpreter found only by text patterns | `pattern_vm_ceiling` (0.3) |
/// | tree-tier interpreter not (fully) restored | `tree_vm_ceiling` (0.5) |
/// | restoration left unresolved parts | `partial_restoration_ceiling` (0.75) |
///
/// The result is always clamped into `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    unresolved_penalty: f64,
    failure_penalty: f64,
    tree_vm_ceiling: f64,
    pattern_vm_ceiling: f64,
    partial_restoration_ceiling: f64,
}

impl ConfidenceScorer {
    /// Takes the penalties and ceilings from `config`.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            unresolved_penalty: config.unresolved_penalty,
            failure_penalty: config.failure_penalty,
            tree_vm_ceiling: config.tree_vm_ceiling,
            pattern_vm_ceiling: config.pattern_vm_ceiling,
            partial_restoration_ceiling: config.partial_restoration_ceiling,
        }
    }

    /// Scores a run.
    ///
    /// # Arguments
    ///
    /// * `parsed` - Whether the input parsed; an unparsed run always scores 0.
    /// * `failed_records` - Failed transformation records in the log.
    /// * `vm` - The interpreter finding, if any.
    #[must_use]
    pub fn score(&self, parsed: bool, failed_records: usize, vm: Option<&VmDetected>) -> f64 {
        if !parsed {
            return 0.0;
        }

        let unresolved = vm
            .and_then(|vm| vm.restoration.as_ref())
            .map_or(0, |r| r.unresolved_parts.len());

        #[allow(clippy::cast_precision_loss)]
        let mut confidence = 1.0
            - self.unresolved_penalty * unresolved as f64
            - self.failure_penalty * failed_records as f64;

        if let Some(vm) = vm {
            if vm.tier == "pattern" {
                confidence = confidence.min(self.pattern_vm_ceiling);
            } else if !vm.deobfuscated {
                confidence = confidence.min(self.tree_vm_ceiling);
            }
            if unresolved > 0 {
                confidence = confidence.min(self.partial_restoration_ceiling);
            }
        }

        if confidence.is_nan() {
            return 0.0;
        }
        confidence.clamp(0.0, 1.0)
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::vm::{Complexity, RestorationResult, UnresolvedPart, VmDetection, VmProfile, CUSTOM_VM};

    fn profile() -> VmProfile {
        VmProfile {
            instruction_count: 4,
            interpreter_location: "1:1".into(),
            complexity: Complexity::Low,
            has_switch: true,
            has_instruction_array: true,
            has_program_counter: true,
            vm_type: CUSTOM_VM.into(),
        }
    }

    fn restored(parts: usize) -> RestorationResult {
        RestorationResult {
            code: String::new(),
            confidence: 0.3,
            warnings: Vec::new(),
            unresolved_parts: (0..parts)
                .map(|i| UnresolvedPart {
                    location: format!("case #{i}"),
                    reason: "r".into(),
                    suggestion: "s".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_unparsed_is_zero() {
        assert_eq!(ConfidenceScorer::default().score(false, 0, None), 0.0);
    }

    #[test]
    fn test_failure_penalty() {
        let scorer = ConfidenceScorer::default();
        assert_eq!(scorer.score(true, 0, None), 1.0);
        assert!((scorer.score(true, 2, None) - 0.9).abs() < 1e-9);
        assert_eq!(scorer.score(true, 100, None), 0.0);
    }

    #[test]
    fn test_vm_ceilings() {
        let scorer = ConfidenceScorer::default();

        let pattern = VmDetected::new(&VmDetection::Pattern(profile()));
        assert_eq!(scorer.score(true, 0, Some(&pattern)), 0.3);

        let tree = VmDetected::new(&VmDetection::Tree(profile()));
        assert_eq!(scorer.score(true, 0, Some(&tree)), 0.5);

        let mut done = VmDetected::new(&VmDetection::Tree(profile()));
        done.deobfuscated = true;
        done.restoration = Some(restored(0));
        assert_eq!(scorer.score(true, 0, Some(&done)), 1.0);

        let mut partial = VmDetected::new(&VmDetection::Tree(profile()));
        partial.restoration = Some(restored(2));
        assert_eq!(scorer.score(true, 0, Some(&partial)), 0.5);
    }

    #[test]
    fn test_unresolved_parts_penalised() {
        let scorer = ConfidenceScorer::default();
        let mut vm = VmDetected::new(&VmDetection::Tree(profile()));
        vm.deobfuscated = true;
        vm.restoration = Some(restored(8));
        assert!((scorer.score(true, 0, Some(&vm)) - 0.6).abs() < 1e-9);
    }
}
