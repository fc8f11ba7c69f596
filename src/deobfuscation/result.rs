//! Deobfuscation result types.
//!
//! [`DeobfuscationResult`] is the whole outcome of one engine run. It
//! serialises with stable camelCase field names; fields are only ever added.

use serde::Serialize;

use crate::{
    deobfuscation::{
        changes::TransformationRecord,
        detection::{DetectionSignature, Technique},
        vm::{InstructionDescriptor, RestorationResult, VmDetection, VmProfile},
    },
    source::NormalizationHints,
};

/// Result of running deobfuscation.
///
/// # Example
///
/// ```rust
/// use jsscope::deobfuscation::{DeobfuscateOptions, DeobfuscationEngine};
///
/// let engine = DeobfuscationEngine::with_defaults();
/// let result = engine.deobfuscate(&DeobfuscateOptions::new("var x = 1 + 2;")).unwrap();
///
/// assert!(result.code.contains('3'));
/// assert!(result.ast_optimized);
/// println!("{}", result.summary());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeobfuscationResult {
    /// The deobfuscated source, or the input unchanged if it did not parse.
    pub code: String,
    /// Audit trail of the run, in order.
    pub transformations: Vec<TransformationRecord>,
    /// Techniques with at least one fired signature, deduplicated, in firing order.
    pub detected_techniques: Vec<Technique>,
    /// Present if and only if an interpreter signature fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_detected: Option<VmDetected>,
    /// `true` if the tree was parsed and the printed output came from it.
    pub ast_optimized: bool,
    /// Aggregate confidence in `[0, 1]`.
    pub confidence: f64,
    /// Detailed analysis data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    /// Non-fatal problems, in order.
    pub warnings: Vec<String>,
}

impl DeobfuscationResult {
    /// The result for input that could not be parsed: pass-through code,
    /// zero confidence and a warning describing the parse failure.
    #[must_use]
    pub fn pass_through(code: String, warning: String) -> Self {
        Self {
            code,
            transformations: Vec::new(),
            detected_techniques: Vec::new(),
            vm_detected: None,
            ast_optimized: false,
            confidence: 0.0,
            analysis: None,
            warnings: vec![warning],
        }
    }

    /// Number of successful transformations.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.transformations.iter().filter(|t| t.succeeded).count()
    }

    /// Number of failed or unresolved transformations.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.transformations.len() - self.applied_count()
    }

    /// Returns `true` if `technique` was detected.
    #[must_use]
    pub fn has_technique(&self, technique: &Technique) -> bool {
        self.detected_techniques.contains(technique)
    }

    /// One-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let techniques = if self.detected_techniques.is_empty() {
            "none".to_string()
        } else {
            self.detected_techniques
                .iter()
                .map(Technique::name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{} applied, {} failed, confidence {:.2}, techniques: {}",
            self.applied_count(),
            self.failed_count(),
            self.confidence,
            techniques
        )
    }
}

/// What was learned about an embedded bytecode interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDetected {
    /// `"tree"` or `"pattern"`.
    pub tier: &'static str,
    /// The detector's profile.
    pub profile: VmProfile,
    /// Instruction descriptors, when requested and the interpreter was located in the tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<InstructionDescriptor>>,
    /// `true` only if restoration ran and left nothing unresolved.
    pub deobfuscated: bool,
    /// Restoration output, when restoration ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restoration: Option<RestorationResult>,
}

impl VmDetected {
    /// Creates an entry for `detection` with nothing restored yet.
    #[must_use]
    pub fn new(detection: &VmDetection) -> Self {
        Self {
            tier: detection.tier(),
            profile: detection.profile().clone(),
            instructions: None,
            deobfuscated: false,
            restoration: None,
        }
    }
}

/// Detailed analysis data attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Every fired signature, in firing order.
    pub signatures: Vec<DetectionSignature>,
    /// Id of the best-scoring vendor, if any reached the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// What normalisation found.
    pub normalization: NormalizationHints,
    /// Sweeps performed by the generic pipeline, both runs combined.
    pub iterations: usize,
    /// Collaborator reply kept as notes when it could not replace the code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaborator_notes: Option<String>,
}

/// What [`detect`](crate::deobfuscation::DeobfuscationEngine::detect) found.
///
/// Carries the fired signatures and interpreter finding of a run without its
/// output code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    /// Whether the input parsed.
    pub parsed: bool,
    /// Techniques with at least one fired signature, in firing order.
    pub detected_techniques: Vec<Technique>,
    /// Every fired signature, in firing order.
    pub signatures: Vec<DetectionSignature>,
    /// Id of the best-scoring vendor, if any reached the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Interpreter finding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_detected: Option<VmDetected>,
}

impl From<&DeobfuscationResult> for DetectionReport {
    fn from(result: &DeobfuscationResult) -> Self {
        Self {
            parsed: result.ast_optimized,
            detected_techniques: result.detected_techniques.clone(),
            signatures: result
                .analysis
                .as_ref()
                .map(|a| a.signatures.clone())
                .unwrap_or_default(),
            vendor: result.analysis.as_ref().and_then(|a| a.vendor.clone()),
            vm_detected: result.vm_detected.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::changes::TransformationKind;

    #[test]
    fn test_pass_through() {
        let result = DeobfuscationResult::pass_through("x(".into(), "parse failed".into());
        assert_eq!(result.confidence, 0.0);
        assert!(!result.ast_optimized);
        assert!(result.transformations.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_serialised_field_names() {
        let mut result = DeobfuscationResult::pass_through("a".into(), "w".into());
        result.transformations.push(TransformationRecord::success(
            TransformationKind::ConstantFolding,
            "folded 1",
        ));
        result.detected_techniques.push(Technique::Vendor("jscrambler".into()));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["astOptimized"], false);
        assert_eq!(json["detectedTechniques"][0], "jscrambler");
        assert_eq!(json["transformations"][0]["kind"], "constant-folding");
        assert!(json.get("vmDetected").is_none());
        assert!(json.get("analysis").is_none());
    }

    #[test]
    fn test_summary_counts() {
        let mut result = DeobfuscationResult::pass_through("a".into(), "w".into());
        result.transformations.push(TransformationRecord::success(TransformationKind::ConstantFolding, "x"));
        result.transformations.push(TransformationRecord::failure(TransformationKind::VmRestoration, "y"));
        assert_eq!(result.applied_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert!(result.summary().starts_with("1 applied, 1 failed"));
    }
}
