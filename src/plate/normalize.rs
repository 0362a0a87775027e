//! OCR text cleanup

/// Upper-case, keep only `A-Z`, `0-9` and whitespace, collapse whitespace runs
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    let kept: String = text
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("ab 1234 c"), "AB 1234 C");
        assert_eq!(normalize("  GR-4521-20 "), "GR452120");
        assert_eq!(normalize("AS\t 123\n\n45"), "AS 123 45");
    }

    #[test]
    fn test_normalize_drops_punctuation_and_symbols() {
        assert_eq!(normalize("A.B|1234:c!"), "AB1234C");
        assert_eq!(normalize("€ ¥ ©"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_non_ascii_letters() {
        // Accented letters upper-case to non-ASCII and are dropped
        assert_eq!(normalize("éab12"), "AB12");
        // Unicode whitespace still separates tokens
        assert_eq!(normalize("AB\u{00A0}1234"), "AB 1234");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "ab 1234 c",
            "  GR-4521-20 ",
            "straße 12",
            "A.B|1234:c!",
            "\u{2003}x\u{00A0}\u{00A0}y\t",
            "ÀÉÎ 99 ǆ",
            "",
            "   ",
        ];

        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_normalize_expands_sharp_s() {
        assert_eq!(normalize("straße"), "STRASSE");
    }
}
