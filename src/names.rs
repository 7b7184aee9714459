//! XML name validation and utilities
//!
//! This module provides validation for NCNames and QNames, and the
//! splitting of `prefix:local` values such as `xsi:type` attributes.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static NCNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z_a-z\u{C0}-\u{D6}\u{D8}-\u{F6}\u{F8}-\u{2FF}\u{370}-\u{37D}\u{37F}-\u{1FFF}][A-Z_a-z\u{C0}-\u{D6}\u{D8}-\u{F6}\u{F8}-\u{2FF}\u{370}-\u{37D}\u{37F}-\u{1FFF}\-\.0-9\u{B7}\u{300}-\u{36F}]*$")
        .expect("NCName pattern is valid")
});

/// Check if a character may start an NCName
pub fn is_ncname_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Check if a character may appear in an NCName after the first position
pub fn is_ncname_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '\u{B7}'
}

/// Check if a string is a valid NCName (non-colonized name)
pub fn is_valid_ncname(name: &str) -> bool {
    !name.is_empty() && NCNAME.is_match(name)
}

/// Check if a string is a valid QName (qualified name)
pub fn is_valid_qname(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // QName can be "prefix:localName" or just "localName"
    if let Some((prefix, local)) = name.split_once(':') {
        is_valid_ncname(prefix) && is_valid_ncname(local)
    } else {
        is_valid_ncname(name)
    }
}

/// Validate a QName and return an error if invalid
pub fn validate_qname(name: &str) -> Result<()> {
    if is_valid_qname(name) {
        Ok(())
    } else {
        Err(Error::Name(format!("Invalid QName: '{}'", name)))
    }
}

/// Split a QName into prefix and local name
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    if let Some((prefix, local)) = qname.split_once(':') {
        (Some(prefix), local)
    } else {
        (None, qname)
    }
}

/// Join a prefix and local name back into `prefix:local`
pub fn join_qname(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}:{}", p, local),
        _ => local.to_string(),
    }
}

/// Parse an `xsi:type` value into `(prefix, localname)`
///
/// Surrounding whitespace is ignored, as the attribute is a QName-typed value.
pub fn parse_type_name(value: &str) -> Result<(Option<&str>, &str)> {
    let value = value.trim();
    validate_qname(value)?;
    Ok(split_qname(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ncname() {
        assert!(is_valid_ncname("Indicator"));
        assert!(is_valid_ncname("Kill_Chain-Phase.v2"));
        assert!(is_valid_ncname("_private"));

        assert!(!is_valid_ncname(""));
        assert!(!is_valid_ncname("stix:Indicator"));
        assert!(!is_valid_ncname("1Indicator"));
    }

    #[test]
    fn test_is_valid_qname() {
        assert!(is_valid_qname("Indicator"));
        assert!(is_valid_qname("stixVocabs:PackageIntentVocab-1.0"));

        assert!(!is_valid_qname(""));
        assert!(!is_valid_qname(":Indicator"));
        assert!(!is_valid_qname("stix:"));
    }

    #[test]
    fn test_split_and_join_qname() {
        assert_eq!(split_qname("Indicator"), (None, "Indicator"));
        assert_eq!(split_qname("stix:Indicator"), (Some("stix"), "Indicator"));
        assert_eq!(join_qname(Some("stix"), "Indicator"), "stix:Indicator");
        assert_eq!(join_qname(None, "Indicator"), "Indicator");
    }

    #[test]
    fn test_parse_type_name() {
        let (prefix, local) = parse_type_name(" stixVocabs:IndicatorTypeVocab-1.0 ").unwrap();
        assert_eq!(prefix, Some("stixVocabs"));
        assert_eq!(local, "IndicatorTypeVocab-1.0");
        assert!(parse_type_name("not a qname").is_err());
    }
}
