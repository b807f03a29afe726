//! Local token estimation.
//!
//! Used only when the upstream count-tokens endpoint cannot answer. The
//! estimate divides the serialized length of `system`, `messages` and `tools`
//! by a characters-per-token ratio. It ignores per-message role overhead and
//! tokenizer effects, so it undercounts real usage.

use serde::Deserialize;
use serde_json::value::RawValue;

/// Default characters-per-token ratio.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

#[derive(Deserialize)]
struct CountedFields<'a> {
    #[serde(borrow, default)]
    system: Option<&'a RawValue>,
    #[serde(borrow, default)]
    messages: Option<&'a RawValue>,
    #[serde(borrow, default)]
    tools: Option<&'a RawValue>,
}

/// Approximate token counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenEstimator {
    /// Create an estimator; non-positive or non-finite ratios fall back to the default
    #[must_use]
    pub fn new(chars_per_token: f64) -> Self {
        if chars_per_token.is_finite() && chars_per_token > 0.0 {
            Self { chars_per_token }
        } else {
            Self::default()
        }
    }

    /// Configured ratio
    #[must_use]
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimate the input tokens of a count-tokens request body
    #[must_use]
    pub fn estimate(&self, body: &[u8]) -> u64 {
        self.estimate_chars(counted_chars(body))
    }

    /// Estimate tokens for a character count, never returning 0 for non-empty input
    #[must_use]
    pub fn estimate_chars(&self, chars: usize) -> u64 {
        if chars == 0 {
            return 0;
        }
        let tokens = (chars as f64 / self.chars_per_token).floor() as u64;
        tokens.max(1)
    }
}

/// Serialized length of the counted fields, or the whole body if it does not parse.
pub fn counted_chars(body: &[u8]) -> usize {
    match serde_json::from_slice::<CountedFields<'_>>(body) {
        Ok(fields) => [fields.system, fields.messages, fields.tools]
            .into_iter()
            .flatten()
            .map(|raw| raw.get().len())
            .sum(),
        Err(_) => body.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_relevant_fields() {
        let body = br#"{"model":"claude-opus-4-5","messages":[{"role":"user","content":"hi"}],"system":"be brief"}"#;
        let expected = r#"[{"role":"user","content":"hi"}]"#.len() + r#""be brief""#.len();
        assert_eq!(counted_chars(body), expected);
        assert_eq!(
            TokenEstimator::default().estimate(body),
            (expected / 4) as u64
        );
    }

    #[test]
    fn test_unparseable_body_uses_whole_length() {
        let body = b"definitely not json at all";
        assert_eq!(counted_chars(body), body.len());
        assert_eq!(TokenEstimator::new(2.0).estimate(body), (body.len() / 2) as u64);
    }

    #[test]
    fn test_floor_of_one_for_short_input() {
        let estimator = TokenEstimator::new(4.0);
        assert_eq!(estimator.estimate_chars(1), 1);
        assert_eq!(estimator.estimate_chars(3), 1);
        assert_eq!(estimator.estimate(br#"{"messages":[]}"#), 1);
    }

    #[test]
    fn test_empty_input_is_zero() {
        let estimator = TokenEstimator::default();
        assert_eq!(estimator.estimate_chars(0), 0);
        assert_eq!(estimator.estimate(br#"{"model":"x"}"#), 0);
    }

    #[test]
    fn test_rounds_down() {
        let estimator = TokenEstimator::new(4.0);
        assert_eq!(estimator.estimate_chars(7), 1);
        assert_eq!(estimator.estimate_chars(8), 2);
        assert_eq!(estimator.estimate_chars(11), 2);
    }

    #[test]
    fn test_invalid_ratio_falls_back_to_default() {
        assert_eq!(TokenEstimator::new(0.0), TokenEstimator::default());
        assert_eq!(TokenEstimator::new(-3.0), TokenEstimator::default());
        assert_eq!(TokenEstimator::new(f64::NAN).chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
        assert!((TokenEstimator::new(2.5).chars_per_token() - 2.5).abs() < f64::EPSILON);
    }
}
