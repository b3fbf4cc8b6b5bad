//! Suggestion policy on top of the [`Trie`].

use crate::config::{AutocompleteConfig, SuggestAlgorithm, FUZZY_SUGGEST_MAX_DISTANCE, FUZZY_SUGGEST_PENALTY};
use crate::error::Result;
use crate::fuzzy::levenshtein;
use crate::index::Timestamp;
use crate::tokenizer::normalize_phrase;
use crate::trie::{NeverTrending, Suggestion, TrendingSignal, Trie};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Where a suggestion came from; decides its default score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    PopularQueries,
    QueryHistory,
    DocumentTitles,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteStats {
    pub total_suggestions: usize,
    pub average_score: f32,
}

pub struct AutocompleteService {
    trie: Trie,
    config: AutocompleteConfig,
    trending: Arc<dyn TrendingSignal>,
}

impl std::fmt::Debug for AutocompleteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutocompleteService")
            .field("suggestions", &self.trie.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AutocompleteService {
    pub fn new(config: AutocompleteConfig) -> Result<Self> {
        Self::from_trie(Trie::new(), config)
    }

    /// Wrap an existing (e.g. freshly loaded) trie.
    pub fn from_trie(trie: Trie, config: AutocompleteConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { trie, config, trending: Arc::new(NeverTrending) })
    }

    pub fn with_trending(mut self, signal: Arc<dyn TrendingSignal>) -> Self {
        self.trending = signal;
        self
    }

    pub fn config(&self) -> &AutocompleteConfig {
        &self.config
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub(crate) fn trie_mut(&mut self) -> &mut Trie {
        &mut self.trie
    }

    /// Default score for a source when the caller gives none, capped at 1.0.
    pub fn source_score(&self, source: SuggestionSource) -> f32 {
        let base = match source {
            SuggestionSource::PopularQueries => 0.8 * self.config.popularity_weight,
            SuggestionSource::QueryHistory => 0.7 * self.config.history_weight,
            SuggestionSource::DocumentTitles => 0.6,
            SuggestionSource::Other => 0.5,
        };
        base.min(1.0)
    }

    /// Add or refresh a suggestion. A positive `score` wins over the source default.
    pub fn insert(&mut self, suggestion: &str, score: f32, source: SuggestionSource) -> Result<String> {
        self.insert_at(suggestion, score, source, crate::now())
    }

    pub fn insert_at(&mut self, suggestion: &str, score: f32, source: SuggestionSource, now: Timestamp) -> Result<String> {
        let score = if score > 0.0 { score.min(1.0) } else { self.source_score(source) };
        self.trie.insert(suggestion, score, now)
    }

    pub fn collect_prefix(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        self.trie.collect_prefix_with(prefix, limit, self.trending.as_ref())
    }

    /// Entries within two edits of `query`, best first.
    pub fn fuzzy_suggest(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        let query = normalize_phrase(query);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut out: Vec<Suggestion> = self
            .trie
            .entries()
            .into_iter()
            .take(self.config.max_fuzzy_candidates)
            .filter_map(|entry| {
                let distance = levenshtein(&query, &entry.text);
                (distance <= FUZZY_SUGGEST_MAX_DISTANCE).then(|| Suggestion {
                    text: entry.text.clone(),
                    score: 1.0 - distance as f32 * FUZZY_SUGGEST_PENALTY,
                    frequency: entry.frequency,
                    is_trending: self.trending.is_trending(&entry.text),
                    last_used: entry.last_used,
                })
            })
            .collect();
        sort_by_score(&mut out);
        out.truncate(limit);
        out
    }

    /// Suggestions for `query` with the configured algorithm.
    pub fn autocomplete(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        self.suggest(query, self.config.algorithm, limit)
    }

    /// Suggestions for `query`, highest score first; ties keep collection order.
    pub fn suggest(&self, query: &str, algorithm: SuggestAlgorithm, limit: usize) -> Vec<Suggestion> {
        let query = normalize_phrase(query);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut out = match algorithm {
            SuggestAlgorithm::Prefix => self.collect_prefix(&query, limit),
            SuggestAlgorithm::Fuzzy => self.fuzzy_suggest(&query, limit),
            SuggestAlgorithm::Hybrid => {
                let mut out = self.collect_prefix(&query, limit.div_ceil(2));
                let seen: HashSet<String> = out.iter().map(|s| s.text.clone()).collect();
                let room = limit - out.len();
                out.extend(
                    self.fuzzy_suggest(&query, limit + seen.len())
                        .into_iter()
                        .filter(|s| !seen.contains(&s.text))
                        .take(room),
                );
                out
            }
        };
        out.retain(|s| s.score >= self.config.min_score_threshold);
        sort_by_score(&mut out);
        out.truncate(limit);
        out
    }

    /// Feed a user selection to the trending signal; unknown suggestions are ignored.
    pub fn record_selection(&self, suggestion: &str) {
        let text = normalize_phrase(suggestion);
        if self.trie.get(&text).is_some() {
            self.trending.record(&text);
        }
    }

    pub fn stats(&self) -> AutocompleteStats {
        let entries = self.trie.entries();
        let average_score = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|e| e.score).sum::<f32>() / entries.len() as f32
        };
        AutocompleteStats { total_suggestions: entries.len(), average_score }
    }

    pub fn clear(&mut self) {
        self.trie.clear();
    }
}

// Stable: equal scores keep their relative order.
fn sort_by_score(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Trending signal backed by recorded selections.
///
/// A suggestion trends when it was selected more than `threshold` times
/// within the last `window_secs` seconds.
#[derive(Debug)]
pub struct UsageWindow {
    window_secs: i64,
    threshold: usize,
    usage: Mutex<HashMap<String, VecDeque<Timestamp>>>,
}

impl UsageWindow {
    pub fn new(window_secs: i64, threshold: usize) -> Self {
        Self { window_secs, threshold, usage: Mutex::new(HashMap::new()) }
    }

    pub fn from_config(config: &AutocompleteConfig) -> Self {
        Self::new(config.trending_window_secs, config.trending_threshold)
    }

    pub fn record_at(&self, suggestion: &str, at: Timestamp) {
        let horizon = at.saturating_sub(self.window_secs);
        let mut usage = self.usage.lock();
        usage.entry(suggestion.to_string()).or_default().push_back(at);
        usage.retain(|_, hits| {
            while hits.front().is_some_and(|t| *t < horizon) {
                hits.pop_front();
            }
            !hits.is_empty()
        });
    }

    pub fn is_trending_at(&self, suggestion: &str, now: Timestamp) -> bool {
        let horizon = now.saturating_sub(self.window_secs);
        self.usage
            .lock()
            .get(suggestion)
            .map_or(false, |hits| hits.iter().filter(|t| **t >= horizon).count() > self.threshold)
    }

    /// Suggestions with at least one selection still inside the window.
    pub fn tracked(&self) -> usize {
        self.usage.lock().len()
    }
}

impl TrendingSignal for UsageWindow {
    fn is_trending(&self, suggestion: &str) -> bool {
        self.is_trending_at(suggestion, crate::now())
    }

    fn record(&self, suggestion: &str) {
        self.record_at(suggestion, crate::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AutocompleteService {
        let mut svc = AutocompleteService::new(AutocompleteConfig::default()).unwrap();
        for (text, score) in [
            ("search engine", 0.8),
            ("search algorithms", 0.7),
            ("search optimization", 0.6),
            ("search ranking", 0.9),
            ("machine learning", 0.8),
            ("data structures", 0.7),
        ] {
            svc.insert_at(text, score, SuggestionSource::PopularQueries, 100).unwrap();
        }
        svc
    }

    #[test]
    fn source_defaults() {
        let mut svc = AutocompleteService::new(AutocompleteConfig::default()).unwrap();
        assert_eq!(svc.source_score(SuggestionSource::PopularQueries), 0.8);
        // 0.7 * 1.2 = 0.84
        assert!((svc.source_score(SuggestionSource::QueryHistory) - 0.84).abs() < 1e-6);
        assert_eq!(svc.source_score(SuggestionSource::DocumentTitles), 0.6);
        assert_eq!(svc.source_score(SuggestionSource::Other), 0.5);
        svc.insert_at("rust", 0.0, SuggestionSource::DocumentTitles, 0).unwrap();
        assert_eq!(svc.trie().get("rust").unwrap().score, 0.6);
        svc.insert_at("rust", 3.0, SuggestionSource::DocumentTitles, 0).unwrap();
        assert_eq!(svc.trie().get("rust").unwrap().score, 1.0);
    }

    #[test]
    fn source_default_is_capped() {
        let cfg = AutocompleteConfig { popularity_weight: 2.0, ..AutocompleteConfig::default() };
        let svc = AutocompleteService::new(cfg).unwrap();
        assert_eq!(svc.source_score(SuggestionSource::PopularQueries), 1.0);
    }

    #[test]
    fn prefix_sorted_by_score() {
        let svc = service();
        let texts: Vec<String> =
            svc.suggest("search", SuggestAlgorithm::Prefix, 10).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["search ranking", "search engine", "search algorithms", "search optimization"]);
    }

    #[test]
    fn equal_scores_keep_collection_order() {
        let mut svc = AutocompleteService::new(AutocompleteConfig::default()).unwrap();
        for text in ["xdelta", "xalpha", "xcharlie", "xbravo"] {
            svc.insert_at(text, 0.5, SuggestionSource::Other, 0).unwrap();
        }
        let texts: Vec<String> = svc.suggest("x", SuggestAlgorithm::Prefix, 10).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["xalpha", "xbravo", "xcharlie", "xdelta"]);
    }

    #[test]
    fn fuzzy_scores_by_distance() {
        let mut svc = AutocompleteService::new(AutocompleteConfig::default()).unwrap();
        svc.insert_at("search", 0.9, SuggestionSource::Other, 0).unwrap();
        svc.insert_at("engine", 0.9, SuggestionSource::Other, 0).unwrap();
        let out = svc.fuzzy_suggest("serch", 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "search");
        assert!((out[0].score - 0.8).abs() < 1e-6);
        assert!(svc.fuzzy_suggest("xxxxxxx", 10).is_empty());
    }

    #[test]
    fn hybrid_fills_with_fuzzy() {
        let mut svc = AutocompleteService::new(AutocompleteConfig::default()).unwrap();
        svc.insert_at("rust", 0.5, SuggestionSource::Other, 0).unwrap();
        svc.insert_at("rusty", 0.4, SuggestionSource::Other, 0).unwrap();
        svc.insert_at("dust", 0.9, SuggestionSource::Other, 0).unwrap();
        svc.insert_at("bust", 0.9, SuggestionSource::Other, 0).unwrap();
        let out = svc.suggest("rust", SuggestAlgorithm::Hybrid, 4);
        let texts: Vec<&str> = out.iter().map(|s| s.text.as_str()).collect();
        // prefix half: rust, rusty; fuzzy fill: bust and dust at 0.8, rust/rusty deduplicated
        assert_eq!(texts, vec!["bust", "dust", "rust", "rusty"]);
        assert!((out[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn malformed_queries_are_empty() {
        let svc = service();
        assert!(svc.suggest("", SuggestAlgorithm::Hybrid, 5).is_empty());
        assert!(svc.suggest("   ", SuggestAlgorithm::Hybrid, 5).is_empty());
        assert!(svc.suggest("search", SuggestAlgorithm::Hybrid, 0).is_empty());
    }

    #[test]
    fn min_score_threshold_filters() {
        let cfg = AutocompleteConfig { min_score_threshold: 0.75, ..AutocompleteConfig::default() };
        let mut svc = AutocompleteService::new(cfg).unwrap();
        svc.insert_at("search engine", 0.8, SuggestionSource::Other, 0).unwrap();
        svc.insert_at("search algorithms", 0.7, SuggestionSource::Other, 0).unwrap();
        let out = svc.suggest("sea", SuggestAlgorithm::Prefix, 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "search engine");
    }

    #[test]
    fn usage_window_trending() {
        let window = UsageWindow::new(60, 2);
        for t in [100, 110, 120] {
            window.record_at("rust", t);
        }
        assert!(window.is_trending_at("rust", 130));
        assert!(!window.is_trending_at("rust", 175));
        assert!(!window.is_trending_at("go", 130));
    }

    #[test]
    fn usage_window_forgets_stale_keys() {
        let window = UsageWindow::new(60, 0);
        window.record_at("rust", 100);
        window.record_at("go", 110);
        assert_eq!(window.tracked(), 2);
        window.record_at("zig", 500);
        assert_eq!(window.tracked(), 1);
        assert!(!window.is_trending_at("rust", 500));
    }

    #[test]
    fn usage_window_extreme_timestamps() {
        let window = UsageWindow::new(3_600, 0);
        window.record_at("old", i64::MIN);
        assert!(window.is_trending_at("old", i64::MIN));
        assert!(!window.is_trending_at("old", i64::MAX));
    }

    #[test]
    fn selections_of_unknown_suggestions_ignored() {
        let window = Arc::new(UsageWindow::new(3_600, 0));
        let svc = service().with_trending(window.clone());
        svc.record_selection("never inserted");
        svc.record_selection("   ");
        assert_eq!(window.tracked(), 0);
        svc.record_selection("Search Engine");
        assert_eq!(window.tracked(), 1);
    }

    #[test]
    fn trending_flag_flows_through() {
        let window = Arc::new(UsageWindow::new(3_600, 0));
        let svc = service().with_trending(window.clone());
        svc.record_selection("Search Engine");
        let out = svc.suggest("search e", SuggestAlgorithm::Prefix, 5);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_trending);
    }

    #[test]
    fn stats_average() {
        let svc = service();
        let stats = svc.stats();
        assert_eq!(stats.total_suggestions, 6);
        assert!((stats.average_score - 0.75).abs() < 1e-5);
    }
}
