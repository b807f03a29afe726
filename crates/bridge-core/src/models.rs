//! Client-facing to backend model name translation.

use std::collections::HashMap;

/// Backend identifier for Opus-class requests.
pub const OPUS_THINKING: &str = "gemini-claude-opus-4-5-thinking";
/// Backend identifier for Sonnet-class requests.
pub const SONNET_THINKING: &str = "gemini-claude-sonnet-4-5-thinking";
/// Backend identifier for Haiku-class requests.
pub const FLASH: &str = "gemini-3-flash";

const EXACT: [(&str, &str); 3] = [
    ("claude-opus-4-5-20251101", OPUS_THINKING),
    ("claude-sonnet-4-5-20250929", SONNET_THINKING),
    ("claude-haiku-4-5-20251001", FLASH),
];

// Checked in order, first match wins.
const PREFIXES: [(&str, &str); 5] = [
    ("claude-opus", OPUS_THINKING),
    ("claude-sonnet", SONNET_THINKING),
    ("claude-haiku", FLASH),
    ("gpt-4", SONNET_THINKING),
    ("gpt-3", FLASH),
];

/// Maps client model identifiers onto backend identifiers.
///
/// Lookup order is exact match, then the prefix table in priority order, then
/// identity. Translation never fails.
#[derive(Debug, Clone)]
pub struct ModelTranslator {
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
}

impl Default for ModelTranslator {
    fn default() -> Self {
        Self {
            exact: EXACT
                .iter()
                .map(|(from, to)| ((*from).to_owned(), (*to).to_owned()))
                .collect(),
            prefixes: PREFIXES
                .iter()
                .map(|(from, to)| ((*from).to_owned(), (*to).to_owned()))
                .collect(),
        }
    }
}

impl ModelTranslator {
    /// Create a translator with the built-in tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact-match alias, replacing any built-in entry for `from`
    #[must_use]
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.exact.insert(from.into(), to.into());
        self
    }

    /// Add several exact-match aliases
    #[must_use]
    pub fn with_aliases<I, K, V>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        aliases
            .into_iter()
            .fold(self, |translator, (from, to)| translator.with_alias(from, to))
    }

    /// Translate a model name
    pub fn map_model<'a>(&'a self, name: &'a str) -> &'a str {
        if let Some(mapped) = self.exact.get(name) {
            return mapped;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map_or(name, |(_, mapped)| mapped.as_str())
    }

    /// Number of exact-match entries
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.exact.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let models = ModelTranslator::new();
        assert_eq!(models.map_model("claude-opus-4-5-20251101"), OPUS_THINKING);
        assert_eq!(models.map_model("claude-sonnet-4-5-20250929"), SONNET_THINKING);
        assert_eq!(models.map_model("claude-haiku-4-5-20251001"), FLASH);
    }

    #[test]
    fn test_prefix_match() {
        let models = ModelTranslator::new();
        assert_eq!(models.map_model("claude-sonnet-unknown-version"), SONNET_THINKING);
        assert_eq!(models.map_model("claude-opus-4-1"), OPUS_THINKING);
        assert_eq!(models.map_model("claude-haiku-3"), FLASH);
        assert_eq!(models.map_model("gpt-4o-mini"), SONNET_THINKING);
        assert_eq!(models.map_model("gpt-3.5-turbo"), FLASH);
    }

    #[test]
    fn test_identity_fallback() {
        let models = ModelTranslator::new();
        assert_eq!(models.map_model("mystery-model"), "mystery-model");
        assert_eq!(models.map_model(""), "");
        assert_eq!(models.map_model(FLASH), FLASH);
    }

    #[test]
    fn test_aliases_take_precedence() {
        let models = ModelTranslator::new()
            .with_aliases([("claude-opus-4-5-20251101", "custom-opus"), ("mystery", "gemini-3-pro")]);
        assert_eq!(models.map_model("claude-opus-4-5-20251101"), "custom-opus");
        assert_eq!(models.map_model("mystery"), "gemini-3-pro");
        assert_eq!(models.map_model("claude-opus-other"), OPUS_THINKING);
        assert_eq!(models.alias_count(), 4);
    }
}
