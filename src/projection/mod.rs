//! Derived index documents per entity family
//!
//! Projections are write-only views of record-store entities, carrying only
//! the fields queries sort and filter on. Nothing here is authoritative:
//! hydration always re-reads the record store.

pub mod comment;
pub mod idea;

pub use comment::{CommentProjection, CommentQuery};
pub use idea::{IdeaProjection, IdeaQuery};

/// Tokenize free text for the search-token field: lowercase alphanumeric
/// words of three or more characters, deduplicated.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .split_whitespace()
        .filter(|word| word.len() >= 3)
        .map(|word| {
            word.to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect()
        })
        .filter(|word: &String| !word.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_normalizes() {
        let tokens = tokenize("Solar ROOFS on every roof! On");
        assert_eq!(tokens, vec!["every", "roof", "roofs", "solar"]);
    }

    #[test]
    fn test_tokenize_drops_short_words() {
        assert!(tokenize("a of to").is_empty());
    }
}
