//! Prefix tree over normalized suggestion phrases.
//!
//! Children live in a `BTreeMap`, so traversal visits them in ascending char
//! order and collection results are reproducible.

use crate::error::{Error, Result};
use crate::index::Timestamp;
use crate::tokenizer::normalize_phrase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data stored on a terminal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrieEntry {
    /// Normalized suggestion text; never empty.
    pub text: String,
    pub score: f32,
    pub frequency: u32,
    pub last_used: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    terminal: Option<TrieEntry>,
}

impl TrieNode {
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn entry(&self) -> Option<&TrieEntry> {
        self.terminal.as_ref()
    }
}

/// One suggestion returned by a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub score: f32,
    pub frequency: u32,
    pub is_trending: bool,
    pub last_used: Timestamp,
}

impl Suggestion {
    fn from_entry(entry: &TrieEntry, trending: &dyn TrendingSignal) -> Self {
        Self {
            text: entry.text.clone(),
            score: entry.score,
            frequency: entry.frequency,
            is_trending: trending.is_trending(&entry.text),
            last_used: entry.last_used,
        }
    }
}

/// Decides whether a suggestion is currently trending.
pub trait TrendingSignal: Send + Sync {
    fn is_trending(&self, suggestion: &str) -> bool;

    /// Note that a user picked `suggestion`. Signals without telemetry ignore it.
    fn record(&self, _suggestion: &str) {}
}

/// Default signal when no usage telemetry is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTrending;

impl TrendingSignal for NeverTrending {
    fn is_trending(&self, _suggestion: &str) -> bool {
        false
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Trie {
    root: TrieNode,
    len: usize,
    capacity: Option<usize>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trie that refuses new suggestions past `capacity` distinct entries.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self { capacity: Some(capacity), ..Self::default() }
    }

    pub(crate) fn set_capacity_limit(&mut self, capacity: usize) {
        self.capacity = Some(capacity);
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of distinct suggestions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or refresh a suggestion, returning its normalized text.
    ///
    /// The stored score is replaced by `score`, the frequency grows by one and
    /// `last_used` is set to `now`.
    pub fn insert(&mut self, suggestion: &str, score: f32, now: Timestamp) -> Result<String> {
        let text = normalize_phrase(suggestion);
        if text.is_empty() {
            return Err(Error::EmptySuggestion);
        }
        if let Some(limit) = self.capacity {
            if self.len >= limit && self.get(&text).is_none() {
                return Err(Error::CapacityExceeded { what: "suggestion", limit });
            }
        }

        let mut node = &mut self.root;
        for c in text.chars() {
            node = node.children.entry(c).or_default();
        }
        if let Some(entry) = node.terminal.as_mut() {
            entry.score = score;
            entry.frequency = entry.frequency.saturating_add(1);
            entry.last_used = now;
        } else {
            node.terminal = Some(TrieEntry { text: text.clone(), score, frequency: 1, last_used: now });
            self.len += 1;
        }
        Ok(text)
    }

    /// Exact lookup of a (normalized) suggestion.
    pub fn get(&self, suggestion: &str) -> Option<&TrieEntry> {
        self.node(&normalize_phrase(suggestion))?.entry()
    }

    fn node(&self, normalized: &str) -> Option<&TrieNode> {
        let mut node = &self.root;
        for c in normalized.chars() {
            node = node.children.get(&c)?;
        }
        Some(node)
    }

    /// Up to `limit` suggestions under `prefix`, depth-first in char order.
    pub fn collect_prefix(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        self.collect_prefix_with(prefix, limit, &NeverTrending)
    }

    pub fn collect_prefix_with(&self, prefix: &str, limit: usize, trending: &dyn TrendingSignal) -> Vec<Suggestion> {
        let mut out = Vec::new();
        if limit == 0 {
            return out;
        }
        if let Some(node) = self.node(&normalize_phrase(prefix)) {
            collect(node, limit, trending, &mut out);
        }
        out
    }

    /// Every terminal entry, depth-first in char order.
    pub fn entries(&self) -> Vec<&TrieEntry> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some(entry) = &node.terminal {
                out.push(entry);
            }
            // reversed so the smallest char is popped first
            stack.extend(node.children.values().rev());
        }
        out
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
        self.len = 0;
    }
}

fn collect(node: &TrieNode, limit: usize, trending: &dyn TrendingSignal, out: &mut Vec<Suggestion>) {
    if out.len() >= limit {
        return;
    }
    if let Some(entry) = &node.terminal {
        out.push(Suggestion::from_entry(entry, trending));
    }
    for child in node.children.values() {
        if out.len() >= limit {
            break;
        }
        collect(child, limit, trending, out);
    }
}
