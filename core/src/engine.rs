//! The search engine facade: an [`InvertedIndex`] and an
//! [`AutocompleteService`] behind reader/writer locks, plus the ranking
//! pipeline that turns a [`SearchRequest`] into a page of [`SearchHit`]s.
//!
//! Locks are always taken index first, then suggestions.

use crate::autocomplete::{AutocompleteService, SuggestionSource, UsageWindow};
use crate::config::{EngineConfig, SuggestAlgorithm};
use crate::error::{Error, Result};
use crate::fuzzy::find_matches;
use crate::index::{DocSlot, Document, InvertedIndex, NewDocument, Timestamp};
use crate::ranking::{
    match_type, rank_results, FeatureScores, MatchType, RankedDocument, RankingBreakdown, RankingEngine, UserContext,
};
use crate::snippet::snippet;
use crate::tokenizer::{tokenize, unique_terms};
use crate::trie::{Suggestion, Trie};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where query terms must occur for a document to qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    All,
    Filename,
    Content,
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "filename" => Ok(Self::Filename),
            "content" => Ok(Self::Content),
            other => Err(format!("unknown scope {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    /// Expand query terms missing from the vocabulary to close vocabulary terms.
    pub fuzzy: bool,
    pub scope: SearchScope,
    /// Accepted `doc_type`s, compared case-insensitively. Empty admits all.
    pub file_types: Vec<String>,
    /// Inclusive lower bound on `uploaded_at`.
    pub uploaded_after: Option<Timestamp>,
    /// Inclusive upper bound on `uploaded_at`.
    pub uploaded_before: Option<Timestamp>,
    /// Attach the boost breakdown to every hit.
    pub explain: bool,
    pub context: Option<UserContext>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            offset: 0,
            fuzzy: false,
            scope: SearchScope::All,
            file_types: Vec::new(),
            uploaded_after: None,
            uploaded_before: None,
            explain: false,
            context: None,
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    fn admits(&self, doc: &Document, terms: &HashSet<&str>) -> bool {
        if !self.file_types.is_empty() && !self.file_types.iter().any(|t| t.eq_ignore_ascii_case(&doc.doc_type)) {
            return false;
        }
        if self.uploaded_after.is_some_and(|t| doc.uploaded_at < t)
            || self.uploaded_before.is_some_and(|t| doc.uploaded_at > t)
        {
            return false;
        }
        let hit = |text: &str| tokenize(text).any(|t| terms.contains(t.as_str()));
        match self.scope {
            SearchScope::All => true,
            SearchScope::Filename => hit(&doc.filename),
            SearchScope::Content => hit(&doc.content),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub filename: String,
    pub doc_type: String,
    pub uploaded_at: Timestamp,
    pub score: f64,
    pub match_type: MatchType,
    pub snippet: Option<String>,
    pub features: FeatureScores,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<RankingBreakdown>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    /// Ranked documents before paging.
    pub total_hits: usize,
    /// Vocabulary terms the query was fuzzily expanded to.
    pub expansions: Vec<String>,
    pub hits: Vec<SearchHit>,
    /// Why the query could not be stored as a history suggestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learn_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub documents: u32,
    pub terms: usize,
    pub suggestions: usize,
    pub average_suggestion_score: f32,
    pub average_document_length: f64,
    pub queries_served: u64,
}

pub struct SearchEngine {
    config: EngineConfig,
    index: RwLock<InvertedIndex>,
    suggestions: RwLock<AutocompleteService>,
    ranking: RankingEngine,
    queries_served: AtomicU64,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// An empty engine. Fails if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::from_parts(config, InvertedIndex::new(), Trie::new())
    }

    /// Wrap a loaded index and trie; the config's limits replace any stored ones.
    pub fn from_parts(config: EngineConfig, mut index: InvertedIndex, mut trie: Trie) -> Result<Self> {
        config.validate()?;
        index.set_limits(config.limits.clone());
        trie.set_capacity_limit(config.limits.max_suggestions);
        let trending = Arc::new(UsageWindow::from_config(&config.autocomplete));
        let suggestions = AutocompleteService::from_trie(trie, config.autocomplete.clone())?.with_trending(trending);
        let ranking = RankingEngine::new(config.ranking.clone())?;
        Ok(Self {
            config,
            index: RwLock::new(index),
            suggestions: RwLock::new(suggestions),
            ranking,
            queries_served: AtomicU64::new(0),
        })
    }

    /// Swap the ranking engine, e.g. for one with a different authority signal.
    pub fn with_ranking(mut self, ranking: RankingEngine) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn read_index(&self) -> RwLockReadGuard<'_, InvertedIndex> {
        self.index.read()
    }

    pub(crate) fn read_suggestions(&self) -> RwLockReadGuard<'_, AutocompleteService> {
        self.suggestions.read()
    }

    /// Index a document and, when enabled, register its filename terms as
    /// title suggestions. If the suggestions would not fit, nothing changes.
    pub fn add_document(&self, doc: NewDocument) -> Result<String> {
        let titles = if self.config.autocomplete.index_titles { title_terms(&doc.filename) } else { Vec::new() };
        let mut index = self.index.write();
        if titles.is_empty() {
            return index.add_document(doc);
        }
        let mut suggestions = self.suggestions.write();
        let trie = suggestions.trie();
        if let Some(limit) = trie.capacity() {
            let fresh = titles.iter().filter(|t| trie.get(t).is_none()).count();
            if trie.len() + fresh > limit {
                return Err(Error::CapacityExceeded { what: "suggestion", limit });
            }
        }
        let id = index.add_document(doc)?;
        let now = crate::now();
        for term in &titles {
            suggestions.insert_at(term, 0.0, SuggestionSource::DocumentTitles, now)?;
        }
        Ok(id)
    }

    /// Remove a document. Its title suggestions stay.
    pub fn remove_document(&self, id: &str) -> Option<Document> {
        self.index.write().remove_document(id)
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.index.read().document(id).cloned()
    }

    pub fn record_click(&self, id: &str) -> bool {
        self.index.write().record_click(id)
    }

    pub fn record_impression(&self, id: &str) -> bool {
        self.index.write().record_impression(id)
    }

    /// Suggestions with the configured algorithm; `limit` is capped by `max_suggestions`.
    pub fn autocomplete(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        self.suggestions.read().autocomplete(query, limit.min(self.config.autocomplete.max_suggestions))
    }

    pub fn suggest_with(&self, query: &str, algorithm: SuggestAlgorithm, limit: usize) -> Vec<Suggestion> {
        self.suggestions.read().suggest(query, algorithm, limit.min(self.config.autocomplete.max_suggestions))
    }

    pub fn add_suggestion(&self, text: &str, score: f32, source: SuggestionSource) -> Result<String> {
        self.suggestions.write().insert(text, score, source)
    }

    /// Count a picked suggestion towards its trending window.
    pub fn record_selection(&self, text: &str) {
        self.suggestions.read().record_selection(text);
    }

    pub fn clear_suggestions(&self) {
        self.suggestions.write().clear();
    }

    /// Plain IDF-sum retrieval over the index. Malformed queries give an empty map.
    pub fn search(&self, query: &str) -> std::collections::HashMap<String, f64> {
        if query.len() > self.config.max_query_len {
            return Default::default();
        }
        self.index.read().search(query)
    }

    /// The `limit` best documents matching any query term under the multi-signal model.
    pub fn search_and_rank(&self, query: &str, limit: usize, context: Option<&UserContext>) -> Vec<RankedDocument> {
        self.search_and_rank_at(query, limit, context, crate::now())
    }

    pub fn search_and_rank_at(
        &self,
        query: &str,
        limit: usize,
        context: Option<&UserContext>,
        now: Timestamp,
    ) -> Vec<RankedDocument> {
        if query.len() > self.config.max_query_len || limit == 0 {
            return Vec::new();
        }
        let terms = unique_terms(query);
        let index = self.index.read();
        let mut candidates = index.search_terms(&terms);
        cap_candidates(&mut candidates, self.config.max_candidates);
        let docs: Vec<&Document> = candidates.iter().filter_map(|(slot, _)| index.document_at(*slot)).collect();
        let mut ranked = self.ranking.rank_search_results(&index, query, &docs, context, now);
        ranked.truncate(limit);
        ranked
    }

    /// Run a full search request.
    pub fn execute(&self, req: &SearchRequest) -> SearchResults {
        self.execute_at(req, crate::now())
    }

    pub fn execute_at(&self, req: &SearchRequest, now: Timestamp) -> SearchResults {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        let mut results = SearchResults { query: req.query.clone(), ..SearchResults::default() };
        if req.query.len() > self.config.max_query_len {
            tracing::debug!(len = req.query.len(), "query too long");
            return results;
        }
        if req.limit == 0 {
            return results;
        }
        let terms = unique_terms(&req.query);
        if terms.is_empty() {
            return results;
        }

        {
            let index = self.index.read();
            let expansions = if req.fuzzy { self.expand_terms(&index, &terms) } else { Vec::new() };
            let mut all_terms = terms.clone();
            all_terms.extend(expansions.iter().cloned());
            let term_set: HashSet<&str> = all_terms.iter().map(String::as_str).collect();

            let exact: HashSet<DocSlot> = index.search_terms(&terms).into_iter().map(|(slot, _)| slot).collect();
            let mut candidates = index.search_terms(&all_terms);
            candidates.retain(|(slot, _)| index.document_at(*slot).is_some_and(|d| req.admits(d, &term_set)));
            cap_candidates(&mut candidates, self.config.max_candidates);

            let docs: Vec<&Document> = candidates.iter().filter_map(|(slot, _)| index.document_at(*slot)).collect();
            let fuzzy_only: HashSet<String> = candidates
                .iter()
                .filter(|(slot, _)| !exact.contains(slot))
                .filter_map(|(slot, _)| index.document_at(*slot))
                .map(|d| d.id.clone())
                .collect();

            let ranked = self.ranking.rank_search_results(&index, &all_terms.join(" "), &docs, req.context.as_ref(), now);
            results.total_hits = ranked.len();
            results.hits = ranked
                .into_iter()
                .skip(req.offset)
                .take(req.limit)
                .filter_map(|r| {
                    let doc = index.document(&r.document_id)?;
                    let breakdown = req.explain.then(|| {
                        rank_results(&[doc], &req.query, &[r.score], &fuzzy_only, &self.config.boost, now)
                            .pop()
                            .map(|s| s.breakdown)
                    });
                    Some(SearchHit {
                        document_id: r.document_id,
                        filename: doc.filename.clone(),
                        doc_type: doc.doc_type.clone(),
                        uploaded_at: doc.uploaded_at,
                        score: r.score,
                        match_type: match_type(doc, &req.query, fuzzy_only.contains(&doc.id)),
                        snippet: snippet(&doc.content, &all_terms),
                        features: r.features,
                        breakdown: breakdown.flatten(),
                    })
                })
                .collect();
            results.expansions = expansions;
        }

        if self.config.autocomplete.learn_queries && results.total_hits > 0 {
            match self.suggestions.write().insert(&req.query, 0.0, SuggestionSource::QueryHistory) {
                Ok(_) | Err(Error::EmptySuggestion) => {}
                Err(err) => {
                    tracing::warn!(%err, query = %req.query, "query not learned");
                    results.learn_error = Some(err.to_string());
                }
            }
        }
        results
    }

    // Vocabulary terms within the fuzzy threshold of query terms the index lacks.
    fn expand_terms(&self, index: &InvertedIndex, terms: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for term in terms.iter().filter(|t| index.document_frequency(t) == 0) {
            for m in find_matches(term, index.vocabulary(), self.config.ranking.fuzzy_threshold) {
                if &m.value != term && !terms.contains(&m.value) && !out.contains(&m.value) {
                    out.push(m.value);
                }
            }
        }
        out
    }

    pub fn stats(&self) -> EngineStats {
        let index = self.index.read();
        let suggestions = self.suggestions.read().stats();
        EngineStats {
            documents: index.total_documents(),
            terms: index.term_count(),
            suggestions: suggestions.total_suggestions,
            average_suggestion_score: suggestions.average_score,
            average_document_length: index.average_document_length(),
            queries_served: self.queries_served.load(Ordering::Relaxed),
        }
    }
}

// Filename terms without the extension.
fn title_terms(filename: &str) -> Vec<String> {
    let stem = Path::new(filename).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    unique_terms(&stem)
}

// Keep the `limit` best candidates by accumulated IDF, back in slot order.
fn cap_candidates(candidates: &mut Vec<(DocSlot, f64)>, limit: usize) {
    if candidates.len() <= limit {
        return;
    }
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(limit);
    candidates.sort_by_key(|(slot, _)| *slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = 1_700_000_000;

    fn engine() -> SearchEngine {
        let engine = SearchEngine::new(EngineConfig::default()).unwrap();
        for (id, name, body, ty) in [
            ("1", "rust-guide.md", "rust ownership and borrowing explained", "markdown"),
            ("2", "notes.txt", "python and rust notes", "text"),
            ("3", "recipes.txt", "bread flour water salt", "text"),
            ("4", "color-theory.pdf", "hue saturation value", "pdf"),
        ] {
            engine.add_document(NewDocument::new(name, body).with_id(id).doc_type(ty).uploaded_at(NOW)).unwrap();
        }
        engine
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.hits.iter().map(|h| h.document_id.as_str()).collect()
    }

    #[test]
    fn title_terms_become_suggestions() {
        let engine = engine();
        let texts: Vec<String> = engine.autocomplete("gui", 5).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["guide"]);
        // extensions are not titles
        assert!(engine.suggest_with("md", SuggestAlgorithm::Prefix, 5).is_empty());
    }

    #[test]
    fn execute_ranks_and_pages() {
        let engine = engine();
        let all = engine.execute_at(&SearchRequest::new("rust"), NOW);
        assert_eq!(all.total_hits, 2);
        assert_eq!(ids(&all), vec!["1", "2"]);
        assert_eq!(all.hits[0].match_type, MatchType::Exact);
        assert!(all.hits[0].snippet.as_deref().unwrap().contains("<em>rust</em>"));

        let page = engine.execute_at(&SearchRequest::new("rust").offset(1).limit(1), NOW);
        assert_eq!(page.total_hits, 2);
        assert_eq!(ids(&page), vec!["2"]);
    }

    #[test]
    fn scope_and_type_filters() {
        let engine = engine();
        let by_name = engine.execute_at(&SearchRequest::new("rust").scope(SearchScope::Filename), NOW);
        assert_eq!(ids(&by_name), vec!["1"]);

        let mut req = SearchRequest::new("txt notes rust");
        req.file_types = vec!["TEXT".into()];
        let typed = engine.execute_at(&req, NOW);
        assert!(typed.hits.iter().all(|h| h.doc_type == "text"));
        assert_eq!(typed.total_hits, 2);

        let mut req = SearchRequest::new("rust");
        req.uploaded_after = Some(NOW + 1);
        assert_eq!(engine.execute_at(&req, NOW).total_hits, 0);
    }

    #[test]
    fn fuzzy_expansion() {
        let engine = engine();
        assert_eq!(engine.execute_at(&SearchRequest::new("colour"), NOW).total_hits, 0);
        let res = engine.execute_at(&SearchRequest::new("colour").fuzzy(true), NOW);
        assert_eq!(res.expansions, vec!["color"]);
        assert_eq!(ids(&res), vec!["4"]);
        assert_eq!(res.hits[0].match_type, MatchType::Fuzzy);
    }

    #[test]
    fn explain_attaches_breakdown() {
        let engine = engine();
        let res = engine.execute_at(&SearchRequest::new("rust").explain(true), NOW);
        let b = res.hits[0].breakdown.as_ref().unwrap();
        assert_eq!(b.base_score, res.hits[0].score);
        assert!(engine.execute_at(&SearchRequest::new("rust"), NOW).hits[0].breakdown.is_none());
    }

    #[test]
    fn malformed_queries_are_empty() {
        let engine = engine();
        assert!(engine.execute_at(&SearchRequest::new(""), NOW).hits.is_empty());
        assert!(engine.execute_at(&SearchRequest::new("?! ."), NOW).hits.is_empty());
        let long = "rust ".repeat(1_000);
        assert!(engine.execute_at(&SearchRequest::new(long.clone()), NOW).hits.is_empty());
        assert!(engine.search(&long).is_empty());
        let none = engine.execute_at(&SearchRequest::new("rust").limit(0), NOW);
        assert!(none.hits.is_empty());
        assert_eq!(none.total_hits, 0);
        assert_eq!(engine.stats().queries_served, 4);
    }

    #[test]
    fn learn_queries_records_history() {
        let mut config = EngineConfig::default();
        config.autocomplete.learn_queries = true;
        config.autocomplete.index_titles = false;
        let engine = SearchEngine::new(config).unwrap();
        engine.add_document(NewDocument::new("a.txt", "distributed systems")).unwrap();
        engine.execute_at(&SearchRequest::new("Distributed  Systems"), NOW);
        engine.execute_at(&SearchRequest::new("nothing here"), NOW);
        let texts: Vec<String> = engine.autocomplete("dis", 5).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["distributed systems"]);
        assert_eq!(engine.stats().suggestions, 1);
    }

    #[test]
    fn title_overflow_rejects_whole_document() {
        let mut config = EngineConfig::default();
        config.limits.max_suggestions = 1;
        let engine = SearchEngine::new(config).unwrap();
        engine.add_document(NewDocument::new("alpha.txt", "first").with_id("a")).unwrap();

        let err = engine.add_document(NewDocument::new("beta-gamma.txt", "second").with_id("b")).unwrap_err();
        assert_eq!(err, Error::CapacityExceeded { what: "suggestion", limit: 1 });
        assert!(engine.document("b").is_none());
        assert_eq!(engine.execute_at(&SearchRequest::new("second"), NOW).total_hits, 0);
        assert_eq!(engine.stats().suggestions, 1);

        // titles already present need no room
        engine.add_document(NewDocument::new("alpha.md", "third").with_id("c")).unwrap();
        assert_eq!(engine.stats().documents, 2);
    }

    #[test]
    fn full_history_is_reported() {
        let mut config = EngineConfig::default();
        config.autocomplete.learn_queries = true;
        config.autocomplete.index_titles = false;
        config.limits.max_suggestions = 1;
        let engine = SearchEngine::new(config).unwrap();
        engine.add_document(NewDocument::new("a.txt", "distributed systems")).unwrap();

        assert_eq!(engine.execute_at(&SearchRequest::new("distributed"), NOW).learn_error, None);
        let full = engine.execute_at(&SearchRequest::new("systems"), NOW);
        assert_eq!(full.total_hits, 1);
        assert!(full.learn_error.is_some_and(|e| e.contains("capacity")));
        assert_eq!(engine.execute_at(&SearchRequest::new("Distributed"), NOW).learn_error, None);
    }

    #[test]
    fn extreme_upload_times_rank() {
        let engine = SearchEngine::new(EngineConfig::default()).unwrap();
        engine.add_document(NewDocument::new("old.txt", "ancient rust").with_id("old").uploaded_at(i64::MIN)).unwrap();
        engine.add_document(NewDocument::new("new.txt", "future rust").with_id("new").uploaded_at(i64::MAX)).unwrap();
        let results = engine.execute_at(&SearchRequest::new("rust").explain(true), NOW);
        assert_eq!(results.total_hits, 2);
        for hit in &results.hits {
            assert!((0.0..=1.0).contains(&hit.score));
            assert!(hit.breakdown.is_some());
        }
        assert_eq!(engine.search_and_rank_at("rust", 10, None, NOW).len(), 2);
    }

    #[test]
    fn remove_and_click() {
        let engine = engine();
        assert!(engine.record_click("2"));
        assert_eq!(engine.document("2").unwrap().click_count, 1);
        assert_eq!(engine.remove_document("2").unwrap().id, "2");
        assert!(engine.document("2").is_none());
        assert!(!engine.record_click("2"));
        assert_eq!(ids(&engine.execute_at(&SearchRequest::new("python"), NOW)), Vec::<&str>::new());
    }

    #[test]
    fn candidate_cap() {
        let mut config = EngineConfig::default();
        config.max_candidates = 1;
        let engine = SearchEngine::new(config).unwrap();
        engine.add_document(NewDocument::new("a", "common").with_id("a")).unwrap();
        engine.add_document(NewDocument::new("b", "common rare").with_id("b")).unwrap();
        engine.add_document(NewDocument::new("c", "other").with_id("c")).unwrap();
        let ranked = engine.search_and_rank_at("common rare", 10, None, NOW);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].document_id, "b");
        assert!(engine.search_and_rank_at("common rare", 0, None, NOW).is_empty());
    }
}
