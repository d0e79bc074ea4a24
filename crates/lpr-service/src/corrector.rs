//! Raw OCR string clean-up
//!
//! Keeps `A-Z0-9` only and applies a single contextual fix: a letter `O`
//! directly after a two-letter region code, followed by a digit, is read as
//! the digit `0`. The wider confusable table is exposed for lookups but never
//! applied on its own.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Characters OCR engines commonly mistake for one another
pub const CONFUSABLE_CHARACTERS: &[(char, char)] = &[
    ('O', '0'),
    ('0', 'O'),
    ('I', '1'),
    ('1', 'I'),
    ('Z', '2'),
    ('2', 'Z'),
    ('S', '5'),
    ('5', 'S'),
    ('B', '8'),
    ('8', 'B'),
    ('G', '6'),
    ('6', 'G'),
    ('D', '0'),
    ('Q', '0'),
];

static REGION_CODE_ZERO: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([A-Z]{2})O([1-9])").ok());

/// Look up the usual stand-in for a confusable character
pub fn confusable_for(ch: char) -> Option<char> {
    let upper = ch.to_ascii_uppercase();
    CONFUSABLE_CHARACTERS
        .iter()
        .find(|(from, _)| *from == upper)
        .map(|(_, to)| *to)
}

/// Uppercase and drop everything outside `A-Z0-9`
pub fn filter_alphabet(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Rewrite `O` to `0` where it follows a two-letter code and precedes a digit
pub fn fix_region_code_zero(filtered: &str) -> Cow<'_, str> {
    match REGION_CODE_ZERO.as_ref() {
        Some(pattern) => pattern.replace_all(filtered, "${1}0${2}"),
        None => Cow::Borrowed(filtered),
    }
}

/// Full correction of one raw OCR string. May return an empty string.
pub fn correct(raw: &str) -> String {
    let filtered = filter_alphabet(raw);
    fix_region_code_zero(&filtered).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_o_after_region_code() {
        assert_eq!(correct("MHO1AB1234"), "MH01AB1234");
    }

    #[test]
    fn test_leaves_correct_strings_alone() {
        assert_eq!(correct("XY99ZZ0001"), "XY99ZZ0001");
        assert_eq!(correct("MH01AB1234"), "MH01AB1234");
        // O followed by a letter is not a digit run.
        assert_eq!(correct("MHOAB1234"), "MHOAB1234");
        // O followed by zero is not rewritten.
        assert_eq!(correct("MHO0AB1234"), "MHO0AB1234");
    }

    #[test]
    fn test_filters_alphabet() {
        assert_eq!(correct("mh 12-ab.1234"), "MH12AB1234");
        assert_eq!(correct("ÄÖÜ ?!"), "");
        assert_eq!(correct(""), "");
    }

    #[test]
    fn test_filter_runs_before_rewrite() {
        assert_eq!(correct("mh o1 ab 1234"), "MH01AB1234");
    }

    #[test]
    fn test_confusable_lookup_is_not_applied() {
        assert_eq!(confusable_for('O'), Some('0'));
        assert_eq!(confusable_for('i'), Some('1'));
        assert_eq!(confusable_for('X'), None);
        assert_eq!(correct("SB1234"), "SB1234");
    }
}
