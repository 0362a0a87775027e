//! Plate text handling
//!
//! Normalization of raw OCR output, plate-format validation and candidate
//! scoring.

pub mod format;
pub mod normalize;

pub use format::FormatValidator;
pub use normalize::normalize;

use serde::Serialize;

/// Normalized plate text with its derived confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub text: String,
    pub confidence: f32,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let confidence = confidence_for(&text);
        Self { text, confidence }
    }
}

/// Length heuristic: `min(len / 10, 1.0)`
///
/// Only meaningful for ranking candidates within one recognition.
pub fn confidence_for(text: &str) -> f32 {
    (text.chars().count() as f32 / 10.0).min(1.0)
}

/// Turn raw OCR text into a scored candidate if it reads as a plate
///
/// With `match_tokens`, text that fails as a whole may still yield its first
/// valid whitespace-separated token.
pub fn evaluate(raw: &str, validator: &FormatValidator, match_tokens: bool) -> Option<Candidate> {
    let cleaned = normalize(raw);
    if cleaned.is_empty() {
        return None;
    }

    if validator.is_valid_format(&cleaned) {
        return Some(Candidate::new(cleaned));
    }

    if match_tokens {
        return validator.first_valid_token(&cleaned).map(Candidate::new);
    }

    None
}

/// Keeps the best candidate seen so far; ties keep the earlier one
#[derive(Debug, Default)]
pub struct BestCandidate {
    best: Option<Candidate>,
}

impl BestCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate; returns true if it replaced the current best
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        let better = match &self.best {
            Some(current) => candidate.confidence > current.confidence,
            None => candidate.confidence > 0.0,
        };
        if better {
            self.best = Some(candidate);
        }
        better
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_none()
    }

    pub fn get(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    pub fn into_inner(self) -> Option<Candidate> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_values() {
        assert_eq!(confidence_for(""), 0.0);
        assert!((confidence_for("AB1234") - 0.6).abs() < 1e-6);
        assert!((confidence_for("AB 1234 C") - 0.9).abs() < 1e-6);
        assert_eq!(confidence_for("ABC 1234 DE"), 1.0);
        assert_eq!(confidence_for("ABCDEFGHIJKLMNOP"), 1.0);
    }

    #[test]
    fn test_confidence_is_monotonic_up_to_ten() {
        let validator = FormatValidator::default();
        let plates = ["AB123", "AB1234", "AB1234C", "AB 1234C", "AB 1234 C", "ABC 1234 D"];

        for pair in plates.windows(2) {
            assert!(validator.is_valid_format(pair[0]) && validator.is_valid_format(pair[1]));
            assert!(pair[0].len() < pair[1].len());
            assert!(confidence_for(pair[0]) < confidence_for(pair[1]), "{:?}", pair);
        }
        assert_eq!(confidence_for("ABC 1234 D"), 1.0);
        assert_eq!(confidence_for("ABC 1234 DE"), 1.0);
    }

    #[test]
    fn test_evaluate_normalizes_before_validating() {
        let validator = FormatValidator::default();

        let candidate = evaluate(" ab-1234 c ", &validator, false).unwrap();
        assert_eq!(candidate.text, "AB1234 C");
        assert!((candidate.confidence - 0.8).abs() < 1e-6);

        assert!(evaluate("hello world", &validator, false).is_none());
        assert!(evaluate("!!!", &validator, false).is_none());
    }

    #[test]
    fn test_evaluate_token_fallback() {
        let validator = FormatValidator::default();

        assert!(evaluate("GHANA GR1234A", &validator, false).is_none());
        let candidate = evaluate("GHANA GR1234A", &validator, true).unwrap();
        assert_eq!(candidate.text, "GR1234A");
    }

    #[test]
    fn test_best_candidate_strictly_greater() {
        let mut best = BestCandidate::new();
        assert!(best.is_empty());

        assert!(best.offer(Candidate::new("AB1234")));
        assert!(!best.offer(Candidate::new("CD5678")), "tie keeps the first");
        assert!(best.offer(Candidate::new("AB1234C")));
        assert!(!best.offer(Candidate::new("AB123")));

        assert_eq!(best.into_inner().unwrap().text, "AB1234C");
    }

    #[test]
    fn test_best_candidate_ignores_zero_confidence() {
        let mut best = BestCandidate::new();
        assert!(!best.offer(Candidate::new("")));
        assert!(best.get().is_none());
    }
}
