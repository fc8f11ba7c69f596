//! javascript-obfuscator (obfuscator.io) identification.
//!
//! The open-source javascript-obfuscator is by far the most common source of
//! obfuscated scripts in the wild. Its default preset leaves a recognisable
//! fingerprint:
//!
//! | Idiom | Evidence |
//! |-------|----------|
//! | `_0x1a2b3c` declared names | naming pattern, 5 per name |
//! | `arr['push'](arr['shift']())` rotation | code pattern, 30 |
//! | `while (!![])` dispatch loops | structure, 15 |
//! | `'3|0|2|1'['split']('|')` dispatch order | characteristic string, 15 |
//! | hexadecimal numeric literals | structure, 10 |

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    deobfuscation::{
        detection::{DetectionEvidence, DetectionScore},
        obfuscators::Obfuscator,
        passes::{declared_names, utils::is_hash_name},
    },
    source::{SourceUnit, SyntaxTree},
};

/// Minimum number of hexadecimal number literals before they count as evidence.
const HEX_LITERAL_MIN: usize = 10;

struct Patterns {
    hash_name: Option<Regex>,
    rotation: Option<Regex>,
    truthy_loop: Option<Regex>,
    split_order: Option<Regex>,
    hex_literal: Option<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        hash_name: Regex::new(r"\b_0x[0-9a-f]{4,}\b").ok(),
        rotation: Regex::new(
            r#"(?:\[\s*['"]push['"]\s*\]|\.push)\s*\(\s*[\w$]+\s*(?:\[\s*['"]shift['"]\s*\]|\.shift)\s*\(\s*\)\s*\)"#,
        )
        .ok(),
        truthy_loop: Regex::new(r"while\s*\(\s*!!\[\]\s*\)").ok(),
        split_order: Regex::new(
            r#"['"]\d+(?:\|\d+)+['"]\s*(?:\[\s*['"]split['"]\s*\]|\.split)\s*\(\s*['"]\|['"]\s*\)"#,
        )
        .ok(),
        hex_literal: Regex::new(r"\b0x[0-9a-fA-F]+\b").ok(),
    })
}

/// javascript-obfuscator identification.
pub struct JavascriptObfuscator;

impl Default for JavascriptObfuscator {
    fn default() -> Self {
        Self::new()
    }
}

impl JavascriptObfuscator {
    /// Creates a new javascript-obfuscator detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn hash_names(unit: &SourceUnit, tree: Option<&SyntaxTree>) -> usize {
        match tree {
            Some(tree) => declared_names(tree.script())
                .iter()
                .filter(|name| is_hash_name(name))
                .count(),
            None => patterns()
                .hash_name
                .as_ref()
                .map_or(0, |r| {
                    let mut names: Vec<&str> = r.find_iter(&unit.normalized).map(|m| m.as_str()).collect();
                    names.sort_unstable();
                    names.dedup();
                    names.len()
                }),
        }
    }
}

impl Obfuscator for JavascriptObfuscator {
    fn id(&self) -> String {
        "javascript-obfuscator".to_string()
    }

    fn name(&self) -> String {
        "javascript-obfuscator".to_string()
    }

    fn detect(&self, unit: &SourceUnit, tree: Option<&SyntaxTree>) -> DetectionScore {
        let score = DetectionScore::new();
        let text = unit.normalized.as_str();
        let patterns = patterns();

        let names = Self::hash_names(unit, tree);
        if names >= 3 {
            score.add(DetectionEvidence::NamingPattern {
                pattern: "_0x[0-9a-f]+".to_string(),
                match_count: names,
                confidence_per_match: 5,
            });
        }

        if let Some(found) = patterns.rotation.as_ref().and_then(|r| r.find(text)) {
            let locations = boxcar::Vec::new();
            locations.push(format!("offset {}", found.start()));
            score.add(DetectionEvidence::CodePattern {
                name: "push-shift-rotation".to_string(),
                locations,
                confidence: 30,
            });
        }

        if patterns.truthy_loop.as_ref().is_some_and(|r| r.is_match(text)) {
            score.add(DetectionEvidence::StructuralPattern {
                description: "while (!![]) dispatch loop".to_string(),
                confidence: 15,
            });
        }

        if let Some(found) = patterns.split_order.as_ref().and_then(|r| r.find(text)) {
            score.add(DetectionEvidence::CharacteristicString {
                value: found.as_str().to_string(),
                location: format!("offset {}", found.start()),
                confidence: 15,
            });
        }

        let hex_literals = patterns
            .hex_literal
            .as_ref()
            .map_or(0, |r| r.find_iter(text).count());
        if hex_literals >= HEX_LITERAL_MIN {
            score.add(DetectionEvidence::StructuralPattern {
                description: format!("{hex_literals} hexadecimal literals"),
                confidence: 10,
            });
        }

        score
    }

    fn supported_versions(&self) -> &[&str] {
        &["2.x", "4.x"]
    }

    fn description(&self) -> &'static str {
        "Open-source javascript-obfuscator, also served as obfuscator.io"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::normalize;

    const SAMPLE: &str = r#"
        var _0x4a1b = ['log', 'Hello', 'World'];
        (function (_0x2d8f05, _0x4b81bb) {
            var _0x4d74cb = function (_0x32719f) {
                while (--_0x32719f) {
                    _0x2d8f05['push'](_0x2d8f05['shift']());
                }
            };
            _0x4d74cb(++_0x4b81bb);
        })(_0x4a1b, 0x1b3);
        var _0x3e1a = function (_0x2d8f05, _0x4b81bb) {
            _0x2d8f05 = _0x2d8f05 - 0x0;
            return _0x4a1b[_0x2d8f05];
        };
        console[_0x3e1a('0x0')](_0x3e1a('0x1'));
    "#;

    fn detect(source: &str) -> DetectionScore {
        let unit = normalize(source);
        let tree = SyntaxTree::parse(&unit.normalized).ok();
        JavascriptObfuscator::new().detect(&unit, tree.as_ref())
    }

    #[test]
    fn test_detects_default_preset() {
        let score = detect(SAMPLE);
        assert!(score.score() >= 50, "{score}");
        assert!(score
            .evidence()
            .any(|e| matches!(e, DetectionEvidence::CodePattern { name, .. } if name == "push-shift-rotation")));
    }

    #[test]
    fn test_text_fallback_counts_distinct_names() {
        let broken = format!("{SAMPLE} @@@");
        let score = detect(&broken);
        assert!(score.score() >= 50, "{score}");
    }

    #[test]
    fn test_plain_code_scores_nothing() {
        let score = detect("function add(a, b) { return a + b; }\nconsole.log(add(1, 2));");
        assert_eq!(score.score(), 0);
        assert_eq!(score.evidence_count(), 0);
    }
}
