//! Candidate character sets
//!
//! The default set is every printable ASCII glyph plus a handful of Latin-1
//! symbols whose shapes add useful density steps. Any other set can be used as
//! long as each character fits in one byte of the output grid.

use crate::error::{Error, Result};

/// Printable ASCII range, `!` through `~`
pub const ASCII_PRINTABLE: std::ops::RangeInclusive<u8> = 0x21..=0x7e;

/// Latin-1 punctuation and symbols included in the default set
pub const LATIN1_SYMBOLS: [char; 21] = [
    '¡', '¢', '£', '¤', '¥', '¦', '§', // 0xA1..=0xA7
    '©', '«', '¬', // 0xA9, 0xAB, 0xAC
    '®', '¯', '°', '±', // 0xAE..=0xB1
    '´', 'µ', '·', '»', '¿', // 0xB4, 0xB5, 0xB7, 0xBB, 0xBF
    '×', '÷', // 0xD7, 0xF7
];

/// The full supported character superset, in default table order
pub fn default_characters() -> String {
    ASCII_PRINTABLE
        .map(char::from)
        .chain(LATIN1_SYMBOLS)
        .collect()
}

/// Byte code emitted into the output grid for `ch`, if it fits in one byte
pub fn char_code(ch: char) -> Option<u8> {
    u8::try_from(u32::from(ch)).ok()
}

/// Checks that a character set can be fingerprinted and emitted
pub fn validate(characters: &str) -> Result<()> {
    if characters.is_empty() {
        return Err(Error::InvalidConfig(
            "character set must contain at least one character".to_string(),
        ));
    }
    for ch in characters.chars() {
        if char_code(ch).is_none() {
            return Err(Error::InvalidConfig(format!(
                "character {:?} (U+{:04X}) is outside the single-byte range",
                ch,
                u32::from(ch)
            )));
        }
        if ch.is_control() {
            return Err(Error::InvalidConfig(format!(
                "control character U+{:04X} cannot be used as a glyph",
                u32::from(ch)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_characters_cover_printable_ascii() {
        let chars = default_characters();
        assert!(chars.starts_with("!\"#$%&"));
        assert!(chars.contains('_'));
        assert!(chars.contains('~'));
        assert!(!chars.contains(' '));
        assert_eq!(chars.chars().count(), 94 + LATIN1_SYMBOLS.len());
    }

    #[test]
    fn test_default_characters_fit_in_a_byte() {
        assert!(validate(&default_characters()).is_ok());
        for ch in default_characters().chars() {
            assert!(char_code(ch).is_some());
        }
    }

    #[test]
    fn test_latin1_code() {
        assert_eq!(char_code('÷'), Some(0xf7));
        assert_eq!(char_code('A'), Some(0x41));
        assert_eq!(char_code('€'), None);
    }

    #[test]
    fn test_validate_rejects_empty_and_wide() {
        assert!(validate("").is_err());
        assert!(validate("ab€").is_err());
        assert!(validate("a\nb").is_err());
        assert!(validate(" .:-=+*#%@").is_ok());
    }
}
