use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    // Only ASCII word characters; every other char, including non-ASCII, separates terms.
    static ref TERM_RE: Regex = Regex::new(r"[A-Za-z0-9_]{2,}").expect("valid regex");
    static ref SPACE_RE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Minimum length of an indexed term.
pub const MIN_TERM_LEN: usize = 2;

/// Split text into lowercase ASCII alphanumeric/underscore runs of at least two chars.
///
/// The returned iterator is lazy; calling `tokenize` again on the same text
/// restarts the sequence.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    TERM_RE.find_iter(text).map(|m| m.as_str().to_ascii_lowercase())
}

/// Distinct terms of `text` in first-occurrence order.
pub fn unique_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text).filter(|t| seen.insert(t.clone())).collect()
}

/// Normalize a free-form suggestion phrase for the autocomplete trie.
///
/// ASCII letters are lowercased, non-ASCII chars are dropped and whitespace
/// runs collapse to a single space. Punctuation is kept so that
/// `"c++ tutorial"` stays distinct from `"c tutorial"`.
pub fn normalize_phrase(text: &str) -> String {
    let ascii: String = text
        .chars()
        .filter(char::is_ascii)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SPACE_RE.replace_all(ascii.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t: Vec<String> = tokenize("Hello, World! snake_case x 42").collect();
        assert_eq!(t, vec!["hello", "world", "snake_case", "42"]);
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(tokenize("").count(), 0);
        assert_eq!(tokenize("a b c ! ?").count(), 0);
    }

    #[test]
    fn non_ascii_separates_terms() {
        let t: Vec<String> = tokenize("café naïve").collect();
        assert_eq!(t, vec!["caf", "na", "ve"]);
    }

    #[test]
    fn restartable() {
        let text = "Rust rust RUST";
        assert_eq!(tokenize(text).count(), 3);
        assert_eq!(tokenize(text).count(), 3);
        assert_eq!(unique_terms(text), vec!["rust"]);
    }

    #[test]
    fn phrase_normalization() {
        assert_eq!(normalize_phrase("  Search \t  Engine "), "search engine");
        assert_eq!(normalize_phrase("日本"), "");
    }
}
