//! Detection scoring, evidence and signature types.
//!
//! Detectors accumulate integer evidence in a [`DetectionScore`] and convert it
//! into a [`DetectionSignature`] once they are done. Signatures are additive:
//! one input can carry any number of them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{
    atomic::{AtomicUsize, Ordering as AtomicOrdering},
    Arc,
};

use serde::{Serialize, Serializer};

use crate::deobfuscation::obfuscators::Obfuscator;

/// Obfuscation technique a signature refers to.
///
/// The string form is kebab-case, except for [`Technique::Vendor`], which is
/// reported as the bare vendor id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Technique {
    /// `\xHH` / `\uHHHH` escapes in literals.
    EncodedLiterals,
    /// Zero-width or otherwise invisible characters.
    InvisibleCharacters,
    /// `_0x1a2b`-style declared names.
    HexIdentifiers,
    /// A literal string table accessed by index.
    StringArray,
    /// A string table rotated at runtime before use.
    StringArrayRotation,
    /// Loop-and-switch dispatch replacing structured control flow.
    ControlFlowFlattening,
    /// A bytecode interpreter embedded in the script.
    VmInterpreter,
    /// Debugger traps meant to break interactive analysis.
    SelfDefending,
    /// Character-code string decryption helpers.
    DecryptHelper,
    /// A specific commercial obfuscator identified by id.
    Vendor(String),
}

impl Technique {
    /// Returns the stable name of this technique.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Technique::EncodedLiterals => "encoded-literals",
            Technique::InvisibleCharacters => "invisible-characters",
            Technique::HexIdentifiers => "hex-identifiers",
            Technique::StringArray => "string-array",
            Technique::StringArrayRotation => "string-array-rotation",
            Technique::ControlFlowFlattening => "control-flow-flattening",
            Technique::VmInterpreter => "vm-interpreter",
            Technique::SelfDefending => "self-defending",
            Technique::DecryptHelper => "decrypt-helper",
            Technique::Vendor(id) => id,
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Technique {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A fired detection: what was found, why, and how sure we are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSignature {
    /// The technique this signature claims.
    pub technique: Technique,
    /// Short evidence descriptions that led to the claim.
    pub evidence: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl DetectionSignature {
    /// Creates a signature, clamping `confidence` into `[0, 1]`.
    #[must_use]
    pub fn new(technique: Technique, evidence: Vec<String>, confidence: f64) -> Self {
        Self {
            technique,
            evidence,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Converts an accumulated [`DetectionScore`] into a signature.
    ///
    /// The confidence is `score / 100`, capped at 1.
    #[must_use]
    pub fn from_score(technique: Technique, score: &DetectionScore) -> Self {
        let evidence = score
            .evidence()
            .map(DetectionEvidence::short_description)
            .collect();
        Self::new(technique, evidence, score.score() as f64 / 100.0)
    }
}

/// Confidence score for detection.
///
/// Scores are on a 0-100+ scale:
/// - 0-20: Very low confidence (might be false positive)
/// - 21-50: Low confidence (some indicators present)
/// - 51-75: Medium confidence (multiple indicators)
/// - 76-90: High confidence (strong indicators)
/// - 91-100+: Very high confidence (definitive markers)
pub struct DetectionScore {
    /// Primary score (0-100+, higher = more confident).
    score: AtomicUsize,
    /// Evidence that contributed to this score.
    evidence: boxcar::Vec<DetectionEvidence>,
}

impl DetectionScore {
    /// Creates a new empty detection score with zero confidence.
    ///
    /// # Returns
    ///
    /// A new `DetectionScore` with score 0 and no evidence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            score: AtomicUsize::new(0),
            evidence: boxcar::Vec::new(),
        }
    }

    /// Creates a score with an initial value but no evidence.
    ///
    /// # Arguments
    ///
    /// * `score` - The initial confidence score (0-100+).
    #[must_use]
    pub fn with_score(score: usize) -> Self {
        Self {
            score: AtomicUsize::new(score),
            evidence: boxcar::Vec::new(),
        }
    }

    /// Returns the total confidence score.
    #[must_use]
    pub fn score(&self) -> usize {
        self.score.load(AtomicOrdering::Relaxed)
    }

    /// Returns an iterator over all evidence that contributed to this score.
    pub fn evidence(&self) -> impl Iterator<Item = &DetectionEvidence> {
        (0..self.evidence.count()).filter_map(|i| self.evidence.get(i))
    }

    /// Number of evidence items recorded.
    #[must_use]
    pub fn evidence_count(&self) -> usize {
        self.evidence.count()
    }

    /// Adds evidence and adjusts the score by the evidence's contribution.
    ///
    /// Contradictions lower the score, saturating at zero.
    ///
    /// # Arguments
    ///
    /// * `evidence` - The detection evidence to add.
    pub fn add(&self, evidence: DetectionEvidence) {
        if let DetectionEvidence::Contradiction {
            confidence_reduction,
            ..
        } = &evidence
        {
            let reduction = *confidence_reduction;
            let _ = self
                .score
                .fetch_update(AtomicOrdering::Relaxed, AtomicOrdering::Relaxed, |s| {
                    Some(s.saturating_sub(reduction))
                });
        } else {
            self.score
                .fetch_add(evidence.confidence(), AtomicOrdering::Relaxed);
        }
        self.evidence.push(evidence);
    }

    /// Generates a summary string of all evidence.
    ///
    /// # Returns
    ///
    /// A comma-separated string of short evidence descriptions,
    /// or "no evidence" if no evidence has been recorded.
    #[must_use]
    pub fn evidence_summary(&self) -> String {
        if self.evidence.count() == 0 {
            return "no evidence".to_string();
        }

        self.evidence()
            .map(DetectionEvidence::short_description)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for DetectionScore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DetectionScore {
    fn clone(&self) -> Self {
        let new_score = Self::with_score(self.score());
        for ev in self.evidence() {
            new_score.evidence.push(ev.clone());
        }
        new_score
    }
}

impl fmt::Debug for DetectionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionScore")
            .field("score", &self.score())
            .field("evidence_count", &self.evidence.count())
            .finish()
    }
}

impl PartialEq for DetectionScore {
    fn eq(&self, other: &Self) -> bool {
        self.score() == other.score()
    }
}

impl Eq for DetectionScore {}

impl PartialOrd for DetectionScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DetectionScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score().cmp(&other.score())
    }
}

impl fmt::Display for DetectionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score={} ({})", self.score(), self.evidence_summary())
    }
}

/// Evidence that contributed to a detection.
#[derive(Debug, Clone)]
pub enum DetectionEvidence {
    /// Declared names following a generated naming scheme.
    NamingPattern {
        /// Pattern description (e.g., "_0x[0-9a-f]+").
        pattern: String,
        /// Number of matching names.
        match_count: usize,
        /// Confidence per match (total = confidence * match_count, capped).
        confidence_per_match: usize,
    },

    /// A recognised code shape.
    CodePattern {
        /// Pattern name (e.g., "push-shift-rotation").
        name: String,
        /// `line:column` locations where the pattern was found.
        locations: boxcar::Vec<String>,
        /// Confidence contribution.
        confidence: usize,
    },

    /// A characteristic string literal or identifier.
    CharacteristicString {
        /// The string found.
        value: String,
        /// Where it was found.
        location: String,
        /// Confidence contribution.
        confidence: usize,
    },

    /// Found characteristic program structure.
    StructuralPattern {
        /// Pattern description.
        description: String,
        /// Confidence contribution.
        confidence: usize,
    },

    /// A textual signal matched by a regular expression.
    TextualSignal {
        /// Signal name.
        name: String,
        /// Confidence contribution.
        confidence: usize,
    },

    /// Negative evidence (reduces confidence).
    Contradiction {
        /// What contradicts.
        description: String,
        /// Confidence reduction.
        confidence_reduction: usize,
    },
}

impl DetectionEvidence {
    /// Returns the confidence contribution of this evidence.
    ///
    /// For `NamingPattern`, the confidence is `match_count * confidence_per_match`,
    /// capped at 50 to prevent runaway scoring. `Contradiction` contributes 0; its
    /// reduction is applied by [`DetectionScore::add`].
    #[must_use]
    pub fn confidence(&self) -> usize {
        match self {
            Self::NamingPattern {
                match_count,
                confidence_per_match,
                ..
            } => (*match_count * confidence_per_match).min(50),
            Self::CodePattern { confidence, .. }
            | Self::CharacteristicString { confidence, .. }
            | Self::StructuralPattern { confidence, .. }
            | Self::TextualSignal { confidence, .. } => *confidence,
            Self::Contradiction { .. } => 0,
        }
    }

    /// Generates a short description suitable for summaries.
    ///
    /// # Returns
    ///
    /// A compact string describing this evidence (e.g., "names:_0x*x12", "code:rotationx1").
    #[must_use]
    pub fn short_description(&self) -> String {
        match self {
            Self::NamingPattern {
                pattern,
                match_count,
                ..
            } => format!("names:{pattern}x{match_count}"),
            Self::CodePattern {
                name, locations, ..
            } => {
                format!("code:{}x{}", name, locations.count())
            }
            Self::CharacteristicString { value, .. } => format!("string:{value}"),
            Self::StructuralPattern { description, .. } => {
                format!("structure:{description}")
            }
            Self::TextualSignal { name, .. } => format!("text:{name}"),
            Self::Contradiction { description, .. } => {
                format!("contra:{description}")
            }
        }
    }
}

/// Result of running vendor identification.
#[derive(Clone, Default)]
pub struct DetectionResult {
    /// The primary obfuscator (highest score above threshold).
    primary_obfuscator: Option<Arc<dyn Obfuscator>>,

    /// All candidates above the threshold with their scores, sorted by score descending.
    all_detected: Vec<(String, DetectionScore)>,

    /// The detection threshold that was used.
    threshold: usize,
}

impl DetectionResult {
    /// Creates a new empty detection result with the specified threshold.
    #[must_use]
    pub fn empty(threshold: usize) -> Self {
        Self {
            primary_obfuscator: None,
            all_detected: Vec::new(),
            threshold,
        }
    }

    /// Creates a detection result with all fields.
    ///
    /// # Arguments
    ///
    /// * `primary_obfuscator` - Reference to the primary obfuscator implementation.
    /// * `all_detected` - All detected obfuscators with their scores.
    /// * `threshold` - The detection threshold that was used.
    #[must_use]
    pub fn new(
        primary_obfuscator: Option<Arc<dyn Obfuscator>>,
        all_detected: Vec<(String, DetectionScore)>,
        threshold: usize,
    ) -> Self {
        Self {
            primary_obfuscator,
            all_detected,
            threshold,
        }
    }

    /// Checks if any obfuscator was detected above the threshold.
    #[must_use]
    pub fn detected(&self) -> bool {
        self.primary_obfuscator.is_some()
    }

    /// Returns the primary obfuscator implementation.
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<dyn Obfuscator>> {
        self.primary_obfuscator.as_ref()
    }

    /// Returns the detection threshold that was used.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns all detected obfuscators with their scores, sorted by score descending.
    #[must_use]
    pub fn all(&self) -> &[(String, DetectionScore)] {
        &self.all_detected
    }

    /// Checks if a specific obfuscator was detected.
    #[must_use]
    pub fn has(&self, obfuscator_id: &str) -> bool {
        self.all_detected.iter().any(|(id, _)| id == obfuscator_id)
    }

    /// Converts every detected candidate into a [`Technique::Vendor`] signature.
    #[must_use]
    pub fn signatures(&self) -> Vec<DetectionSignature> {
        self.all_detected
            .iter()
            .map(|(id, score)| DetectionSignature::from_score(Technique::Vendor(id.clone()), score))
            .collect()
    }

    /// Generates a human-readable summary of the detection results.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(obfuscator) = &self.primary_obfuscator {
            let id = obfuscator.id();
            let score = self
                .all_detected
                .iter()
                .find(|(oid, _)| *oid == id)
                .map_or(0, |(_, s)| s.score());
            format!(
                "Detected: {} (score={}), {} total candidates",
                obfuscator.name(),
                score,
                self.all_detected.len()
            )
        } else {
            "No obfuscator detected".to_string()
        }
    }
}

impl fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

impl fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionResult")
            .field("primary", &self.primary_obfuscator.as_ref().map(|o| o.id()))
            .field("all_detected", &self.all_detected)
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_score_basic() {
        let score = DetectionScore::new();
        assert_eq!(score.score(), 0);
        score.add(DetectionEvidence::StructuralPattern {
            description: "string table".to_string(),
            confidence: 30,
        });

        assert_eq!(score.score(), 30);

        score.add(DetectionEvidence::NamingPattern {
            pattern: "_0x*".to_string(),
            match_count: 3,
            confidence_per_match: 10,
        });

        assert_eq!(score.score(), 60); // 30 + min(30, 50)
    }

    #[test]
    fn test_naming_pattern_cap() {
        let score = DetectionScore::new();
        score.add(DetectionEvidence::NamingPattern {
            pattern: "_0x*".to_string(),
            match_count: 100,
            confidence_per_match: 10,
        });

        assert_eq!(score.score(), 50);
    }

    #[test]
    fn test_contradiction_saturates() {
        let score = DetectionScore::with_score(10);
        score.add(DetectionEvidence::Contradiction {
            description: "readable names".to_string(),
            confidence_reduction: 25,
        });
        assert_eq!(score.score(), 0);
        assert_eq!(score.evidence_count(), 1);
    }

    #[test]
    fn test_detection_score_comparison() {
        let score1 = DetectionScore::with_score(50);
        let score2 = DetectionScore::with_score(75);
        let score3 = DetectionScore::with_score(50);

        assert!(score2 > score1);
        assert!(score1 < score2);
        assert_eq!(score1, score3);
    }

    #[test]
    fn test_signature_from_score() {
        let score = DetectionScore::new();
        score.add(DetectionEvidence::TextualSignal {
            name: "parseInt-hex".to_string(),
            confidence: 80,
        });
        score.add(DetectionEvidence::TextualSignal {
            name: "apply-dispatch".to_string(),
            confidence: 80,
        });

        let signature = DetectionSignature::from_score(Technique::VmInterpreter, &score);
        assert_eq!(signature.confidence, 1.0);
        assert_eq!(signature.evidence.len(), 2);
        assert_eq!(signature.technique.to_string(), "vm-interpreter");
    }

    #[test]
    fn test_vendor_technique_name() {
        let technique = Technique::Vendor("jscrambler".to_string());
        assert_eq!(technique.name(), "jscrambler");
        assert_eq!(
            serde_json::to_string(&technique).unwrap(),
            "\"jscrambler\""
        );
    }

    #[test]
    fn test_detection_result() {
        let result = DetectionResult::new(
            None,
            vec![
                (
                    "javascript-obfuscator".to_string(),
                    DetectionScore::with_score(80),
                ),
                ("jscrambler".to_string(), DetectionScore::with_score(30)),
            ],
            50,
        );

        assert!(!result.detected());
        assert!(result.primary().is_none());
        assert!(result.has("javascript-obfuscator"));
        assert!(!result.has("unknown"));
        assert_eq!(result.signatures().len(), 2);
    }

    #[test]
    fn test_evidence_summary() {
        let score = DetectionScore::new();
        score.add(DetectionEvidence::CharacteristicString {
            value: "debugger".to_string(),
            location: "1:1".to_string(),
            confidence: 20,
        });
        let locations = boxcar::Vec::new();
        locations.push("3:5".to_string());
        score.add(DetectionEvidence::CodePattern {
            name: "rotation".to_string(),
            locations,
            confidence: 30,
        });

        let summary = score.evidence_summary();
        assert!(summary.contains("string:debugger"));
        assert!(summary.contains("code:rotationx1"));
    }
}
