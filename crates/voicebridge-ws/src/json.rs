//! JSON string escaping for hand-assembled request bodies.
//!
//! The remote speech services take flat, fixed-shape JSON objects; the
//! engines assemble them with `format!` and rely on this escape to keep
//! arbitrary text (utterances, voice names, session ids) well-formed.

use std::fmt::Write as _;

/// Escape a string for embedding inside a JSON string literal.
///
/// `"`, `\` and the short-escape control characters get their two-byte
/// escapes; every other character below U+0020 becomes `\u00XX`. Characters
/// at or above U+0020 — multibyte UTF-8 included — pass through unchanged.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                // write! into a String cannot fail
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
