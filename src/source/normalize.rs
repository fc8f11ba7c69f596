//! Literal-encoding normalisation applied before parsing.
//!
//! Obfuscators routinely hide readable text behind escape sequences
//! (`"\x61\x62"`, `"a"`) and sprinkle zero-width characters through
//! identifiers and strings. The [`normalize`] function undoes the safe subset of
//! both so the parser and every later pass see plain text.
//!
//! Only escapes whose decoded character can be written literally without changing
//! the meaning of the surrounding token are decoded. Quotes, backslashes, line
//! terminators and control characters stay escaped. An escaped backslash (`\\`)
//! is copied verbatim together with the character that follows it, so sequences
//! like `"\\x41"` are never mistaken for an escape.

use serde::Serialize;

/// Invisible characters removed by [`normalize`].
const INVISIBLE_CHARACTERS: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // zero width no-break space / BOM
    '\u{00AD}', // soft hyphen
    '\u{180E}', // mongolian vowel separator
];

/// Hints describing what [`normalize`] found in the original text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationHints {
    /// At least one `\xHH` escape was present.
    pub hex_escaped: bool,
    /// At least one `\uHHHH` or `\u{H..}` escape was present.
    pub unicode_escaped: bool,
    /// Number of invisible characters that were stripped.
    pub invisible_characters: usize,
    /// Number of escape sequences that were decoded in place.
    pub decoded_escapes: usize,
}

impl NormalizationHints {
    /// Returns `true` if normalisation rewrote the text.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.invisible_characters > 0 || self.decoded_escapes > 0
    }
}

/// Source text together with its normalised form.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// The text exactly as it was supplied.
    pub original: String,
    /// The text after escape decoding and invisible-character stripping.
    pub normalized: String,
    /// What was found while normalising.
    pub hints: NormalizationHints,
}

/// Normalises `text` into a [`SourceUnit`].
///
/// # Arguments
///
/// * `text` - Raw script source.
///
/// # Returns
///
/// The [`SourceUnit`] holding both the original and the normalised text.
///
/// # Examples
///
/// ```rust
/// use jsscope::source::normalize;
///
/// let unit = normalize("var s = \"\\x68\\x69\";\u{200B}");
/// assert_eq!(unit.normalized, "var s = \"hi\";");
/// assert!(unit.hints.hex_escaped);
/// assert_eq!(unit.hints.invisible_characters, 1);
/// ```
#[must_use]
pub fn normalize(text: &str) -> SourceUnit {
    let mut hints = NormalizationHints::default();
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if INVISIBLE_CHARACTERS.contains(&c) {
            hints.invisible_characters += 1;
            i += 1;
            continue;
        }

        if c != '\\' || i + 1 >= chars.len() {
            out.push(c);
            i += 1;
            continue;
        }

        match chars[i + 1] {
            'x' => {
                hints.hex_escaped = true;
                match decode_hex(&chars, i + 2, 2) {
                    Some(decoded) if can_decode(&out, decoded) => {
                        out.push(decoded);
                        hints.decoded_escapes += 1;
                        i += 4;
                    }
                    _ => {
                        out.push_str("\\x");
                        i += 2;
                    }
                }
            }
            'u' => {
                hints.unicode_escaped = true;
                let (decoded, consumed) = if chars.get(i + 2) == Some(&'{') {
                    decode_braced(&chars, i + 3)
                } else {
                    (decode_hex(&chars, i + 2, 4), 6)
                };
                match decoded {
                    Some(decoded) if can_decode(&out, decoded) => {
                        out.push(decoded);
                        hints.decoded_escapes += 1;
                        i += consumed;
                    }
                    _ => {
                        out.push_str("\\u");
                        i += 2;
                    }
                }
            }
            other => {
                // `\\`, `\"`, `\n`, ... are copied as a pair so the second
                // character can never start a new escape.
                out.push('\\');
                out.push(other);
                i += 2;
            }
        }
    }

    SourceUnit {
        original: text.to_string(),
        normalized: out,
        hints,
    }
}

fn decode_hex(chars: &[char], start: usize, width: usize) -> Option<char> {
    let digits: String = chars.get(start..start + width)?.iter().collect();
    if digits.len() != width || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32)
}

/// Decodes `\u{...}` starting after the opening brace. Returns the decoded
/// character and the total length of the escape including `\u{` and `}`.
fn decode_braced(chars: &[char], start: usize) -> (Option<char>, usize) {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_hexdigit() && end - start < 6 {
        end += 1;
    }
    if end == start || chars.get(end) != Some(&'}') {
        return (None, 0);
    }
    let digits: String = chars[start..end].iter().collect();
    let decoded = u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32);
    (decoded, end - start + 4)
}

/// A digit written straight after `\0` would turn it into a legacy octal
/// escape, so it stays encoded there.
fn can_decode(out: &str, decoded: char) -> bool {
    is_safe_literal(decoded) && !(decoded.is_ascii_digit() && ends_with_null_escape(out))
}

/// Returns `true` if `out` ends in a `\0` whose backslash is not itself escaped.
fn ends_with_null_escape(out: &str) -> bool {
    let Some(rest) = out.strip_suffix('0') else {
        return false;
    };
    let backslashes = rest.chars().rev().take_while(|&c| c == '\\').count();
    backslashes % 2 == 1
}

/// A decoded character is safe when writing it literally cannot end or alter
/// the token it sits in. Regular-expression metacharacters are excluded since
/// the escape may sit inside a regex literal.
fn is_safe_literal(c: char) -> bool {
    if INVISIBLE_CHARACTERS.contains(&c) {
        return false;
    }
    c.is_alphanumeric()
        || matches!(
            c,
            ' ' | '_' | ',' | ':' | ';' | '!' | '@' | '#' | '%' | '&' | '=' | '<' | '>' | '~'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_hex_and_unicode() {
        let unit = normalize(r#"var a = "\x48e\u{6C}lo";"#);
        assert_eq!(unit.normalized, r#"var a = "Hello";"#);
        assert!(unit.hints.hex_escaped);
        assert!(unit.hints.unicode_escaped);
        assert_eq!(unit.hints.decoded_escapes, 2);
        assert!(unit.hints.changed());
    }

    #[test]
    fn test_keeps_unsafe_escapes() {
        let unit = normalize(r#"var q = "\x22\x0a\";"#);
        assert_eq!(unit.normalized, r#"var q = "\x22\x0a\";"#);
        assert!(unit.hints.hex_escaped);
        assert_eq!(unit.hints.decoded_escapes, 0);
        assert!(!unit.hints.changed());
    }

    #[test]
    fn test_escaped_backslash_is_not_an_escape() {
        let unit = normalize(r#"var p = "\\x41";"#);
        assert_eq!(unit.normalized, r#"var p = "\\x41";"#);
        assert_eq!(unit.hints.decoded_escapes, 0);
    }

    #[test]
    fn test_digit_after_null_escape_stays_encoded() {
        let unit = normalize(r#"var s = "\0\x31"; var t = "\0\u0032x\x33"; var u = "\\0\x31";"#);
        assert_eq!(
            unit.normalized,
            r#"var s = "\0\x31"; var t = "\0\u0032x3"; var u = "\\01";"#
        );
        assert_eq!(unit.hints.decoded_escapes, 2);
    }

    #[test]
    fn test_strips_invisible_characters() {
        let unit = normalize("va\u{200D}r x\u{FEFF} = 1;");
        assert_eq!(unit.normalized, "var x = 1;");
        assert_eq!(unit.hints.invisible_characters, 2);
    }

    #[test]
    fn test_truncated_escape_is_left_alone() {
        let unit = normalize(r#"var t = "\x4"; var u = "\u{110000}";"#);
        assert_eq!(unit.normalized, r#"var t = "\x4"; var u = "\u{110000}";"#);
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let text = "function add(a, b) { return a + b; }";
        let unit = normalize(text);
        assert_eq!(unit.normalized, text);
        assert_eq!(unit.hints, NormalizationHints::default());
    }
}
