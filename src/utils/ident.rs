//! Identifier cleanup, validation and display formatting.

use regex::Regex;
use std::sync::OnceLock;

use crate::model::IdentifierKind;

fn non_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\D").expect("static regex"))
}

/// Strip everything that is not a digit.
pub fn clean_identifier(raw: &str) -> String {
    non_digits().replace_all(raw, "").into_owned()
}

/// Whether the cleaned identifier has the exact digit count for its kind.
pub fn is_valid(identifier: &str, kind: IdentifierKind) -> bool {
    let digits = clean_identifier(identifier);
    !digits.is_empty() && digits.len() == kind.expected_len()
}

/// Detect the kind from the digit count, if it matches either.
pub fn detect_kind(identifier: &str) -> Option<IdentifierKind> {
    match clean_identifier(identifier).len() {
        11 => Some(IdentifierKind::Cpf),
        14 => Some(IdentifierKind::Cnpj),
        _ => None,
    }
}

/// Format 11 digits as XXX.XXX.XXX-XX; anything else passes through.
pub fn format_cpf(digits: &str) -> String {
    if digits.len() != 11 {
        return digits.to_string();
    }
    format!(
        "{}.{}.{}-{}",
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..11]
    )
}

/// Format 14 digits as XX.XXX.XXX/XXXX-XX; anything else passes through.
pub fn format_cnpj(digits: &str) -> String {
    if digits.len() != 14 {
        return digits.to_string();
    }
    format!(
        "{}.{}.{}/{}-{}",
        &digits[0..2],
        &digits[2..5],
        &digits[5..8],
        &digits[8..12],
        &digits[12..14]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_punctuation_and_spaces() {
        assert_eq!(clean_identifier("111.444.777-35"), "11144477735");
        assert_eq!(clean_identifier(" 12.345.678/0001-95 "), "12345678000195");
        assert_eq!(clean_identifier("abc"), "");
    }

    #[test]
    fn validates_by_kind_length() {
        assert!(is_valid("11144477735", IdentifierKind::Cpf));
        assert!(is_valid("111.444.777-35", IdentifierKind::Cpf));
        assert!(!is_valid("11144477735", IdentifierKind::Cnpj));
        assert!(!is_valid("123", IdentifierKind::Cpf));
        assert!(!is_valid("", IdentifierKind::Cpf));
    }

    #[test]
    fn detects_kind_from_length() {
        assert_eq!(detect_kind("11144477735"), Some(IdentifierKind::Cpf));
        assert_eq!(detect_kind("12345678000195"), Some(IdentifierKind::Cnpj));
        assert_eq!(detect_kind("12345"), None);
    }

    #[test]
    fn formats_for_display() {
        assert_eq!(format_cpf("11144477735"), "111.444.777-35");
        assert_eq!(format_cnpj("12345678000195"), "12.345.678/0001-95");
        assert_eq!(format_cpf("123"), "123");
    }
}
