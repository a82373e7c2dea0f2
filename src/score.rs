//! Grading-output score extraction.
//!
//! Grading scripts are not consistent about how they report results, so the
//! parser is an ordered list of strategies tried in sequence; the first one
//! that recognizes the output wins. Unrecognized output yields `None` and the
//! caller raises a finding instead of silently passing.

use regex::Regex;

type Strategy = fn(&str) -> Option<u8>;

/// Fractions first: `PASS` inside an `X/Y` report must not shadow the score.
const STRATEGIES: &[Strategy] = &[parse_fraction, parse_pass_fail_token];

/// Extract a 0-100 score from raw grading output.
pub fn parse_score(raw: &str) -> Option<u8> {
    STRATEGIES.iter().find_map(|strategy| strategy(raw))
}

/// `X/Y` normalized to `round(100*X/Y)`. A zero denominator is not a match.
fn parse_fraction(raw: &str) -> Option<u8> {
    let pattern = Regex::new(r"(\d+)\s*/\s*(\d+)").expect("fraction pattern");
    let caps = pattern.captures(raw)?;
    let numerator: f64 = caps[1].parse().ok()?;
    let denominator: f64 = caps[2].parse().ok()?;
    if denominator == 0.0 {
        return None;
    }
    let score = (100.0 * numerator / denominator).round().clamp(0.0, 100.0);
    Some(score as u8)
}

/// Bare `PASS`/`FAIL` token mapped to 100/0.
fn parse_pass_fail_token(raw: &str) -> Option<u8> {
    let pattern = Regex::new(r"(?i)\b(pass(?:ed)?|fail(?:ed)?)\b").expect("pass/fail pattern");
    let token = pattern.captures(raw)?.get(1)?.as_str().to_ascii_lowercase();
    if token.starts_with("pass") {
        Some(100)
    } else {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_strings_normalize_to_percentages() {
        assert_eq!(parse_score("7/10"), Some(70));
        assert_eq!(parse_score("100/100"), Some(100));
        assert_eq!(parse_score("Score: 40/100"), Some(40));
        assert_eq!(parse_score("passed 2/3 checks"), Some(67));
    }

    #[test]
    fn bare_tokens_map_to_full_or_zero() {
        assert_eq!(parse_score("PASS"), Some(100));
        assert_eq!(parse_score("FAIL"), Some(0));
        assert_eq!(parse_score("Overall result: PASSED"), Some(100));
        assert_eq!(parse_score("grading FAILED, see log"), Some(0));
    }

    #[test]
    fn fraction_wins_over_token_when_both_appear() {
        assert_eq!(parse_score("PASS (3/4 checks)"), Some(75));
    }

    #[test]
    fn unrecognized_output_is_none() {
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("grading completed"), None);
        assert_eq!(parse_score("score 5 out of 10"), None);
    }

    #[test]
    fn zero_denominator_is_not_a_match() {
        assert_eq!(parse_score("0/0"), None);
        // Falls through to the token strategy when one is present.
        assert_eq!(parse_score("0/0 PASS"), Some(100));
    }
}
