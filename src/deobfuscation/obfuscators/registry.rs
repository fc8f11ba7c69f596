//! Registry for managing obfuscator implementations.
//!
//! The [`ObfuscatorRegistry`] holds all available obfuscators and runs their
//! detection logic to identify which product(s) produced a script.

use std::{collections::HashMap, sync::Arc};

use crate::{
    deobfuscation::{
        detection::{DetectionResult, DetectionScore},
        obfuscators::{JavascriptObfuscator, Jscrambler, Obfuscator},
    },
    source::{SourceUnit, SyntaxTree},
};

/// Default detection threshold.
const DEFAULT_THRESHOLD: usize = 50;

/// Registry for managing obfuscator implementations.
///
/// # Example
///
/// ```rust
/// use jsscope::deobfuscation::ObfuscatorRegistry;
///
/// let registry = ObfuscatorRegistry::new();
/// assert!(registry.has("javascript-obfuscator"));
/// assert!(registry.has("jscrambler"));
/// ```
pub struct ObfuscatorRegistry {
    /// Registered obfuscators, keyed by id.
    obfuscators: HashMap<String, Arc<dyn Obfuscator>>,
    /// Detection threshold (default: 50).
    threshold: usize,
}

impl Default for ObfuscatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObfuscatorRegistry {
    /// Creates a registry with all built-in obfuscators registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JavascriptObfuscator::new()));
        registry.register(Arc::new(Jscrambler::new()));
        registry
    }

    /// Creates a registry without any pre-registered obfuscators.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            obfuscators: HashMap::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Sets the detection threshold.
    ///
    /// Obfuscators must score at or above this threshold to be considered detected.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Returns the current detection threshold.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Registers an obfuscator, replacing any existing one with the same id.
    pub fn register(&mut self, obfuscator: Arc<dyn Obfuscator>) {
        self.obfuscators.insert(obfuscator.id(), obfuscator);
    }

    /// Unregisters an obfuscator by id.
    ///
    /// # Returns
    ///
    /// The removed obfuscator if it existed.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn Obfuscator>> {
        self.obfuscators.remove(id)
    }

    /// Retrieves an obfuscator by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Obfuscator>> {
        self.obfuscators.get(id)
    }

    /// Checks if an obfuscator with the given id is registered.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.obfuscators.contains_key(id)
    }

    /// Returns the number of registered obfuscators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.obfuscators.len()
    }

    /// Checks if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.obfuscators.is_empty()
    }

    /// Runs every registered obfuscator's detection.
    ///
    /// Only candidates scoring at or above the threshold are kept. The result
    /// is sorted by score descending, ties broken by id so the order is
    /// deterministic.
    #[must_use]
    pub fn detect(&self, unit: &SourceUnit, tree: Option<&SyntaxTree>) -> DetectionResult {
        let mut results: Vec<(String, DetectionScore)> = self
            .obfuscators
            .iter()
            .map(|(id, obfuscator)| (id.clone(), obfuscator.detect(unit, tree)))
            .filter(|(_, score)| score.score() >= self.threshold)
            .collect();

        results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (id, score) in &results {
            log::debug!("vendor {id}: {score}");
        }

        let primary = results
            .first()
            .and_then(|(id, _)| self.obfuscators.get(id).cloned());
        DetectionResult::new(primary, results, self.threshold)
    }

    /// Returns information about all registered obfuscators, sorted by id.
    #[must_use]
    pub fn obfuscator_info(&self) -> Vec<ObfuscatorInfo> {
        let mut info: Vec<ObfuscatorInfo> = self
            .obfuscators
            .values()
            .map(|o| ObfuscatorInfo {
                id: o.id(),
                name: o.name(),
                description: o.description().to_string(),
                versions: o
                    .supported_versions()
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            })
            .collect();
        info.sort_by(|a, b| a.id.cmp(&b.id));
        info
    }
}

/// Information about a registered obfuscator.
#[derive(Debug, Clone)]
pub struct ObfuscatorInfo {
    /// Obfuscator id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Supported versions.
    pub versions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deobfuscation::detection::DetectionEvidence, source::normalize};

    struct TestObfuscator {
        id: String,
        score: usize,
    }

    impl Obfuscator for TestObfuscator {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn name(&self) -> String {
            format!("Test {}", self.id)
        }

        fn detect(&self, _unit: &SourceUnit, _tree: Option<&SyntaxTree>) -> DetectionScore {
            let score = DetectionScore::new();
            score.add(DetectionEvidence::StructuralPattern {
                description: "fixed".to_string(),
                confidence: self.score,
            });
            score
        }
    }

    fn registry(scores: &[(&str, usize)]) -> ObfuscatorRegistry {
        let mut registry = ObfuscatorRegistry::empty();
        for (id, score) in scores {
            registry.register(Arc::new(TestObfuscator {
                id: (*id).to_string(),
                score: *score,
            }));
        }
        registry
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ObfuscatorRegistry::new();
        assert_eq!(registry.len(), 2);
        let ids: Vec<String> = registry.obfuscator_info().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["javascript-obfuscator", "jscrambler"]);
    }

    #[test]
    fn test_detect_filters_and_sorts() {
        let registry = registry(&[("low", 10), ("high", 90), ("mid", 60)]);
        let result = registry.detect(&normalize("var a;"), None);

        assert!(result.detected());
        assert_eq!(result.primary().map(|o| o.id()), Some("high".to_string()));
        let ids: Vec<&str> = result.all().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert!(!result.has("low"));
    }

    #[test]
    fn test_threshold_and_unregister() {
        let mut registry = registry(&[("a", 40)]);
        assert!(!registry.detect(&normalize(""), None).detected());

        registry.set_threshold(30);
        assert!(registry.detect(&normalize(""), None).detected());

        assert!(registry.unregister("a").is_some());
        assert!(registry.is_empty());
    }
}
