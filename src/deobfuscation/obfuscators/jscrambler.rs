//! Jscrambler identification.
//!
//! Jscrambler output differs from javascript-obfuscator in a few stable ways:
//! string tables live in `_$_`-prefixed variables, flattened code dispatches
//! from a `for` loop that runs until a numeric state reaches its exit value,
//! and strings are decoded by small `fromCharCode`/`charCodeAt` helpers.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    deobfuscation::{
        detection::{DetectionEvidence, DetectionScore},
        obfuscators::Obfuscator,
    },
    source::{SourceUnit, SyntaxTree},
};

struct Patterns {
    table: Option<Regex>,
    state_loop: Option<Regex>,
    from_char_code: Option<Regex>,
    char_code_at: Option<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        table: Regex::new(r"(?:var|let|const)\s+(_\$_[0-9A-Za-z]+)\s*=").ok(),
        state_loop: Regex::new(
            r"for\s*\([^;)]*;\s*[\w$]+\s*!==?\s*-?\d+\s*;\s*\)\s*\{?\s*switch\s*\(",
        )
        .ok(),
        from_char_code: Regex::new(r"String\s*\.\s*fromCharCode").ok(),
        char_code_at: Regex::new(r"\.\s*charCodeAt\s*\(").ok(),
    })
}

/// Jscrambler identification.
pub struct Jscrambler;

impl Default for Jscrambler {
    fn default() -> Self {
        Self::new()
    }
}

impl Jscrambler {
    /// Creates a new Jscrambler detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Obfuscator for Jscrambler {
    fn id(&self) -> String {
        "jscrambler".to_string()
    }

    fn name(&self) -> String {
        "Jscrambler".to_string()
    }

    fn detect(&self, unit: &SourceUnit, _tree: Option<&SyntaxTree>) -> DetectionScore {
        let score = DetectionScore::new();
        let text = unit.normalized.as_str();
        let patterns = patterns();

        if let Some(table) = patterns.table.as_ref().and_then(|r| r.captures(text)) {
            if let Some(name) = table.get(1) {
                score.add(DetectionEvidence::CharacteristicString {
                    value: name.as_str().to_string(),
                    location: format!("offset {}", name.start()),
                    confidence: 40,
                });
            }
        }

        let loops = patterns
            .state_loop
            .as_ref()
            .map_or(0, |r| r.find_iter(text).count());
        if loops > 0 {
            score.add(DetectionEvidence::StructuralPattern {
                description: format!("{loops} numeric-state dispatch loops"),
                confidence: 25,
            });
        }

        let has = |regex: &Option<Regex>| regex.as_ref().is_some_and(|r| r.is_match(text));
        if has(&patterns.from_char_code) && has(&patterns.char_code_at) {
            score.add(DetectionEvidence::StructuralPattern {
                description: "char-code string decoder".to_string(),
                confidence: 15,
            });
        }

        score
    }

    fn description(&self) -> &'static str {
        "Commercial Jscrambler code integrity product"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::normalize;

    #[test]
    fn test_detects_table_and_dispatch() {
        let source = r#"
            var _$_8b2f = (function (s, k) {
                var out = "";
                for (var i = 0; i < s.length; i++) out += String.fromCharCode(s.charCodeAt(i) ^ k);
                return out.split("|");
            })("...", 7);
            function run() {
                for (var state = 3; state !== 0; ) {
                    switch (state) {
                        case 3: a(); state = 1; break;
                        case 1: b(); state = 0; break;
                    }
                }
            }
        "#;
        let score = Jscrambler::new().detect(&normalize(source), None);
        assert_eq!(score.score(), 80);
    }

    #[test]
    fn test_decoder_alone_is_not_enough() {
        let source = "function d(s) { return String.fromCharCode(s.charCodeAt(0) + 1); }";
        let score = Jscrambler::new().detect(&normalize(source), None);
        assert!(score.score() < 50);
    }
}
