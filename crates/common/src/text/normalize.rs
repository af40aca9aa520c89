// Anchor text normalization: LF line endings, Unicode NFC.
//
// Hash inputs pass through here so that cosmetic differences (CRLF vs LF,
// decomposed vs precomposed accents) never register as content drift.

use unicode_normalization::{is_nfc, is_nfc_quick, IsNormalized, UnicodeNormalization};

/// Convert CRLF and lone CR to LF.
pub fn normalize_line_endings(input: &str) -> String {
    if !input.contains('\r') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Normalize text for hashing.
///
/// Rules:
/// - CRLF and lone CR become LF
/// - Unicode NFC composition is applied afterwards
pub fn normalize_anchor_text(input: &str) -> String {
    let unified = normalize_line_endings(input);
    if is_nfc_quick(unified.chars()) == IsNormalized::Yes {
        return unified;
    }
    unified.nfc().collect()
}

/// Whether `input` already satisfies `normalize_anchor_text`.
pub fn is_anchor_normalized(input: &str) -> bool {
    !input.contains('\r') && is_nfc(input)
}
