//! Plate-format grammars
//!
//! An ordered list of anchored regular expressions describing accepted plate
//! layouts. The list is configuration; the defaults describe one
//! jurisdiction's two- or three-letter / three- or four-digit plates.

use regex::Regex;

use crate::config::DEFAULT_PLATE_FORMATS;
use crate::error::Result;

/// Matches normalized text against the accepted plate layouts
#[derive(Debug, Clone)]
pub struct FormatValidator {
    patterns: Vec<Regex>,
}

impl FormatValidator {
    /// Compile patterns, keeping their order as precedence
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Pattern sources in precedence order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.as_str())
    }

    /// Index of the first pattern the whole text matches
    pub fn matching_format(&self, text: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.is_match(text))
    }

    /// Whether the whole text matches at least one layout
    pub fn is_valid_format(&self, text: &str) -> bool {
        self.matching_format(text).is_some()
    }

    /// First whitespace-separated token (upper-cased) matching any layout
    pub fn first_valid_token(&self, text: &str) -> Option<String> {
        text.to_uppercase()
            .split_whitespace()
            .find(|token| self.is_valid_format(token))
            .map(str::to_string)
    }
}

impl Default for FormatValidator {
    fn default() -> Self {
        let patterns = DEFAULT_PLATE_FORMATS
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| unreachable!("built-in plate format {p}: {e}")))
            .collect();

        Self { patterns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;

    #[test]
    fn test_default_formats_accept_plates() {
        let validator = FormatValidator::default();

        assert!(validator.is_valid_format("AB1234C"));
        assert!(validator.is_valid_format("AB 1234 C"));
        assert!(validator.is_valid_format("GR 4521"));
        assert!(validator.is_valid_format("GWR123AB"));
        assert!(validator.is_valid_format("AS123"));
    }

    #[test]
    fn test_default_formats_reject_noise() {
        let validator = FormatValidator::default();

        assert!(!validator.is_valid_format("A1"));
        assert!(!validator.is_valid_format(""));
        assert!(!validator.is_valid_format("ABCD 1234"));
        assert!(!validator.is_valid_format("AB 12345"));
        assert!(!validator.is_valid_format("AB  1234"));
        assert!(!validator.is_valid_format("ab1234c"));
        assert!(!validator.is_valid_format("AB 1234 C EXTRA"));
    }

    #[test]
    fn test_matching_format_precedence() {
        let validator = FormatValidator::default();

        // The optional-space pattern is listed first and wins over the stricter ones
        assert_eq!(validator.matching_format("AB1234C"), Some(0));
        assert_eq!(validator.matching_format("AB 1234 C"), Some(0));
        assert_eq!(validator.matching_format("AB1234"), Some(3));
        assert_eq!(validator.matching_format("AB 1234"), Some(4));
        assert_eq!(validator.matching_format("A1"), None);
    }

    #[test]
    fn test_first_valid_token() {
        let validator = FormatValidator::default();

        assert_eq!(
            validator.first_valid_token("GHANA gr1234a 2024"),
            Some("GR1234A".to_string())
        );
        assert_eq!(
            validator.first_valid_token("AS123 GR4521"),
            Some("AS123".to_string())
        );
        assert_eq!(validator.first_valid_token("AB 1234 C"), None);
        assert_eq!(validator.first_valid_token(""), None);
    }

    #[test]
    fn test_custom_formats() {
        let validator = FormatValidator::new(&[r"^\d{3}[A-Z]{3}$"]).unwrap();

        assert_eq!(validator.pattern_count(), 1);
        assert!(validator.is_valid_format("123ABC"));
        assert!(!validator.is_valid_format("AB1234C"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = FormatValidator::new(&["^[A-Z"]);
        assert!(matches!(result, Err(VisionError::InvalidPattern(_))));
    }

    #[test]
    fn test_patterns_keep_order() {
        let validator = FormatValidator::default();
        let sources: Vec<&str> = validator.patterns().collect();
        assert_eq!(sources, DEFAULT_PLATE_FORMATS.to_vec());
    }
}
