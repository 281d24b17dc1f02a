//! Per-field string sanitization primitives.
//!
//! Client text goes through three steps, always in this order:
//!
//! 1. trim surrounding whitespace
//! 2. strip ASCII control characters (`\x00`-`\x1F`, `\x7F`)
//! 3. Unicode NFKC normalization
//!
//! Normalization runs last so a composed form can never reintroduce a byte
//! that step 2 removed.

use unicode_normalization::UnicodeNormalization;

/// Solana base58 alphabet (no `0`, `O`, `I`, `l`).
pub const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Shortest base58 encoding of a 32-byte public key.
pub const PUBKEY_MIN_LENGTH: usize = 32;

/// Longest base58 encoding of a 32-byte public key.
pub const PUBKEY_MAX_LENGTH: usize = 44;

/// Returns `true` for the control characters removed by [`sanitize_text`].
#[inline]
pub fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}')
}

/// Trim, strip control characters, then NFKC-normalize.
pub fn sanitize_text(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !is_stripped_control(*c))
        .nfkc()
        .collect()
}

/// Returns `true` if `c` belongs to the base58 alphabet.
#[inline]
pub fn is_base58_char(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}

/// Validate a Solana public key.
///
/// Returns the trimmed key when it is 32-44 base58 characters, `None`
/// otherwise. The value is not decoded; only the textual shape is checked.
pub fn validate_pubkey(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let len = trimmed.chars().count();

    if !(PUBKEY_MIN_LENGTH..=PUBKEY_MAX_LENGTH).contains(&len) {
        return None;
    }

    if !trimmed.chars().all(is_base58_char) {
        return None;
    }

    Some(trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WRAPPED_SOL: &str = "So11111111111111111111111111111111111111112";

    #[test]
    fn test_wrapped_sol_is_valid() {
        assert_eq!(validate_pubkey(WRAPPED_SOL).as_deref(), Some(WRAPPED_SOL));
    }

    #[test]
    fn test_pubkey_is_trimmed() {
        let padded = format!("  {WRAPPED_SOL}\n");
        assert_eq!(validate_pubkey(&padded).as_deref(), Some(WRAPPED_SOL));
    }

    #[test]
    fn test_pubkey_rejects_ambiguous_glyphs() {
        for bad in ['0', 'O', 'I', 'l'] {
            let mut key = WRAPPED_SOL.to_string();
            key.replace_range(5..6, &bad.to_string());
            assert!(validate_pubkey(&key).is_none(), "{bad} must be rejected");
        }
    }

    #[test]
    fn test_pubkey_length_bounds() {
        assert!(validate_pubkey(&"1".repeat(31)).is_none());
        assert!(validate_pubkey(&"1".repeat(32)).is_some());
        assert!(validate_pubkey(&"1".repeat(44)).is_some());
        assert!(validate_pubkey(&"1".repeat(45)).is_none());
        assert!(validate_pubkey("").is_none());
    }

    #[test]
    fn test_pubkey_rejects_non_ascii() {
        let key = format!("{}é", "1".repeat(40));
        assert!(validate_pubkey(&key).is_none());
    }

    #[test]
    fn test_alphabet_constant_matches_predicate() {
        assert_eq!(BASE58_ALPHABET.len(), 58);
        assert!(BASE58_ALPHABET.chars().all(is_base58_char));
    }

    #[test]
    fn test_sanitize_trims_and_strips_controls() {
        assert_eq!(sanitize_text("  My\u{0}Token\u{7f}\t "), "MyToken");
        assert_eq!(sanitize_text("line\nbreak"), "linebreak");
    }

    #[test]
    fn test_sanitize_applies_nfkc() {
        // Fullwidth letters and the "fi" ligature fold to ASCII.
        assert_eq!(sanitize_text("ＴＯＫＥＮ"), "TOKEN");
        assert_eq!(sanitize_text("\u{FB01}sh"), "fish");
    }

    #[test]
    fn test_sanitize_keeps_plain_ascii() {
        assert_eq!(sanitize_text("Bonk Inu 2.0"), "Bonk Inu 2.0");
    }

    proptest! {
        #[test]
        fn proptest_clean_ascii_round_trips(s in "[A-Za-z0-9][A-Za-z0-9 .,!?-]{0,62}[A-Za-z0-9]") {
            prop_assert_eq!(sanitize_text(&s), s);
        }

        #[test]
        fn proptest_sanitized_has_no_controls(s in "\\PC{0,64}|[\\x00-\\x1f\\x7f a-z]{0,64}") {
            let out = sanitize_text(&s);
            prop_assert!(!out.chars().any(is_stripped_control));
        }

        #[test]
        fn proptest_valid_base58_accepted(s in "[1-9A-HJ-NP-Za-km-z]{32,44}") {
            prop_assert_eq!(validate_pubkey(&s), Some(s.clone()));
        }

        #[test]
        fn proptest_ambiguous_glyph_rejected(
            prefix in "[1-9A-HJ-NP-Za-km-z]{16}",
            bad in "[0OIl]",
            suffix in "[1-9A-HJ-NP-Za-km-z]{16}",
        ) {
            let key = format!("{prefix}{bad}{suffix}");
            prop_assert!(validate_pubkey(&key).is_none());
        }

        #[test]
        fn proptest_out_of_bounds_length_rejected(len in prop_oneof![0usize..32, 45usize..80]) {
            prop_assert!(validate_pubkey(&"2".repeat(len)).is_none());
        }
    }
}
