//! Keyword filter - pure predicate over message text.
//!
//! Matching is raw case-insensitive substring containment, not word
//! tokenization, so keyword "art" matches "start". That is the behaviour
//! operators rely on; do not tighten it to word boundaries.

/// An ordered set of lowercase keywords. Empty means "match everything".
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    /// Build a keyword set from raw user input.
    ///
    /// Entries are trimmed and lowercased; blank entries are dropped, so a
    /// blank answer at the CLI prompt produces the forward-all set.
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = raw
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Parse a comma-separated keyword list, e.g. "sale, Discount".
    pub fn parse(input: &str) -> Self {
        Self::new(input.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// True iff the message should be forwarded.
    ///
    /// - empty set: always true
    /// - no text: false (when the set is non-empty)
    /// - otherwise: the lowercased text contains at least one keyword
    pub fn matches(&self, text: Option<&str>) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let Some(text) = text else {
            return false;
        };
        let lowered = text.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k))
    }
}
