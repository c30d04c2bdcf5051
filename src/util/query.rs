use std::collections::BTreeSet;

/// Prefix that removes a word from the highlighted terms.
pub const EXCLUSION_MARKER: char = '-';

/// The lowercase terms of a user query, negated words dropped. Ordered so
/// that highlighting passes run in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: BTreeSet<String>,
}

impl Query {
    pub fn parse(raw: &str) -> Self {
        let terms = raw
            .split_whitespace()
            .filter(|word| !word.starts_with(EXCLUSION_MARKER))
            .map(str::to_lowercase)
            .collect();
        Self { terms }
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
