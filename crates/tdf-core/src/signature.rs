//! Query normalisation and signatures
//!
//! Two queries that differ only in case, punctuation or whitespace share a
//! signature, which is what makes them "near-identical" for the CACHED tier.

use std::fmt;

/// Tokens too common to say anything about a query
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "be", "can", "could", "do", "does", "for", "from", "have", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "please", "should", "that", "the",
    "this", "to", "we", "what", "when", "why", "with", "would", "you", "your",
];

/// Keywords kept per outcome sample
pub(crate) const SAMPLE_KEYWORDS: usize = 16;

/// Lowercase, strip punctuation, collapse whitespace
#[must_use]
pub fn normalize(query: &str) -> String {
    query
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Salient tokens of a query, in order of first appearance
///
/// Stopwords and tokens shorter than three characters are dropped.
#[must_use]
pub fn keywords(query: &str, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in normalize(query).split(' ') {
        if out.len() >= limit {
            break;
        }
        if token.chars().count() < 3 || STOPWORDS.contains(&token) {
            continue;
        }
        if !out.iter().any(|t| t == token) {
            out.push(token.to_string());
        }
    }
    out
}

/// Content hash of a normalised query
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySignature([u8; 32]);

impl QuerySignature {
    /// Signature of a query
    #[must_use]
    pub fn of(query: &str) -> Self {
        Self(*blake3::hash(normalize(query).as_bytes()).as_bytes())
    }

    /// Raw digest
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for logs
    #[must_use]
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuerySignature({})", self.short())
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_collapses_noise() {
        assert_eq!(normalize("  Fix the BUG!!  in   main.rs "), "fix the bug in main rs");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn near_identical_queries_share_signature() {
        assert_eq!(
            QuerySignature::of("Why does my test fail?"),
            QuerySignature::of("why does my test   fail")
        );
        assert_ne!(
            QuerySignature::of("why does my test fail"),
            QuerySignature::of("why does my build fail")
        );
    }

    #[test]
    fn non_ascii_case_is_folded() {
        assert_eq!(normalize("ÉCOLE Straße"), "école straße");
        assert_eq!(QuerySignature::of("ÉCOLE"), QuerySignature::of("école"));
        assert_eq!(keywords("ÜBER Café", 4), vec!["über", "café"]);
    }

    #[test]
    fn keywords_skip_stopwords_and_duplicates() {
        assert_eq!(
            keywords("Please debug the failing test, the test is flaky", 8),
            vec!["debug", "failing", "test", "flaky"]
        );
        assert_eq!(keywords("debug test commit", 2), vec!["debug", "test"]);
    }

    #[test]
    fn signature_display_is_hex() {
        let sig = QuerySignature::of("hello");
        assert_eq!(sig.to_string().len(), 64);
        assert_eq!(sig.short().len(), 12);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(query in ".{0,64}") {
            let once = normalize(&query);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn prop_signature_ignores_ascii_case(query in "[a-zA-Z ]{0,40}") {
            prop_assert_eq!(
                QuerySignature::of(&query),
                QuerySignature::of(&query.to_ascii_uppercase())
            );
        }
    }
}
