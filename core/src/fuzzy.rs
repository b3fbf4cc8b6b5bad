//! Edit-distance matching.
//!
//! All comparisons are case-insensitive: inputs are lowercased before the
//! distance is taken. Distances count chars, not bytes.

use serde::{Deserialize, Serialize};

/// A candidate that passed [`find_matches`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub value: String,
    pub distance: usize,
}

/// Classic Levenshtein distance with unit insert/delete/substitute costs.
///
/// Two rolling rows, sized by the shorter input.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let (long, short): (Vec<char>, Vec<char>) = {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.len() >= b.len() { (a, b) } else { (b, a) }
    };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];
    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

/// Does `target` match `query` within `threshold` edits?
///
/// Equal strings always match. Queries shorter than three chars match by
/// containment, since a one- or two-letter query is within two edits of
/// almost anything.
pub fn is_match(query: &str, target: &str, threshold: usize) -> bool {
    let q = query.to_lowercase();
    let t = target.to_lowercase();
    if q == t {
        return true;
    }
    if q.chars().count() < 3 {
        return t.contains(&q);
    }
    levenshtein(&q, &t) <= threshold
}

/// Similarity in `[0, 1]`; containment scores 1.0.
pub fn score(query: &str, target: &str) -> f64 {
    let q = query.to_lowercase();
    let t = target.to_lowercase();
    let max_len = q.chars().count().max(t.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    if t.contains(&q) {
        return 1.0;
    }
    1.0 - levenshtein(&q, &t) as f64 / max_len as f64
}

/// Candidates within `threshold` edits of `query`, closest first.
///
/// Equal distances keep the candidates' input order.
pub fn find_matches<I, S>(query: &str, candidates: I, threshold: usize) -> Vec<FuzzyMatch>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let q = query.to_lowercase();
    let mut matches: Vec<FuzzyMatch> = candidates
        .into_iter()
        .filter_map(|c| {
            let value = c.as_ref();
            let distance = levenshtein(&q, &value.to_lowercase());
            (distance <= threshold).then(|| FuzzyMatch { value: value.to_string(), distance })
        })
        .collect();
    // sort_by_key is stable
    matches.sort_by_key(|m| m.distance);
    matches
}
