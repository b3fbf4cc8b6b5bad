//! Multi-signal ranking.
//!
//! [`RankingEngine::rank_search_results`] scores a batch of candidate
//! documents on independent features and folds them into one relevance value
//! through a [`ScoreModel`]. [`rank_results`] is the boost-based variant that
//! keeps a [`RankingBreakdown`] per result for explainability.
//!
//! The filename is treated as the document title and the content as its
//! description.

use crate::config::{BoostOptions, RankingOptions, OVERLAP_WEIGHT, TITLE_MATCH_BONUS};
use crate::error::Result;
use crate::fuzzy::is_match;
use crate::index::{Document, InvertedIndex, Timestamp};
use crate::snippet::snippet;
use crate::tokenizer::{tokenize, unique_terms};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const DAY: i64 = 86_400;

/// Per-document feature values, kept with each result for debugging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureScores {
    pub tfidf: f64,
    pub bm25: f64,
    pub authority: f64,
    pub freshness: f64,
    pub popularity: f64,
    /// Lexical overlap, the stand-in for semantic similarity.
    pub overlap: f64,
    /// `None` when no user context was supplied.
    pub personalization: Option<f64>,
    pub title_matches: u32,
    pub fuzzy_title_matches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub document_id: String,
    pub score: f64,
    pub features: FeatureScores,
}

/// Who is asking; consumed by [`PersonalizationSignal`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub preferred_types: Vec<String>,
    #[serde(default)]
    pub recent_queries: Vec<String>,
}

/// Link-graph style importance of a document, in `[0, 1]`.
pub trait AuthoritySignal: Send + Sync {
    fn authority(&self, doc: &Document) -> f64;
}

/// Placeholder authority: four fixed tiers picked by `id mod 100`.
///
/// Numeric ids are used directly; other ids go through FNV-1a so that the
/// tier is still stable across runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdTierAuthority;

impl AuthoritySignal for IdTierAuthority {
    fn authority(&self, doc: &Document) -> f64 {
        let bucket = doc.id.parse::<u64>().unwrap_or_else(|_| fnv1a(doc.id.as_bytes())) % 100;
        match bucket {
            0..=9 => 0.9,
            10..=29 => 0.7,
            30..=69 => 0.5,
            _ => 0.3,
        }
    }
}

/// Authority supplied at ingestion in [`Document::authority_score`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredAuthority;

impl AuthoritySignal for StoredAuthority {
    fn authority(&self, doc: &Document) -> f64 {
        doc.authority_score.clamp(0.0, 1.0)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3))
}

/// Per-user boost in `[0, 1]`.
pub trait PersonalizationSignal: Send + Sync {
    fn personalize(&self, doc: &Document, context: &UserContext) -> f64;
}

/// No boost until real usage data exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersonalization;

impl PersonalizationSignal for NoPersonalization {
    fn personalize(&self, _doc: &Document, _context: &UserContext) -> f64 {
        0.0
    }
}

/// Folds features into one score. The hook for a learned ranker.
pub trait ScoreModel: Send + Sync {
    fn combine(&self, features: &FeatureScores, options: &RankingOptions) -> f64;
}

/// The baseline weighted sum, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSum;

impl ScoreModel for WeightedSum {
    fn combine(&self, f: &FeatureScores, options: &RankingOptions) -> f64 {
        let w = &options.weights;
        let mut score = f.tfidf * w.relevance * 0.6
            + f.bm25 * w.relevance * 0.4
            + f.authority * w.authority
            + f.freshness * w.freshness
            + f.popularity * w.popularity
            + f.overlap * OVERLAP_WEIGHT
            + TITLE_MATCH_BONUS * f64::from(f.title_matches)
            + options.fuzzy_boost * f64::from(f.fuzzy_title_matches);
        if let Some(p) = f.personalization {
            score += p * w.personalization;
        }
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Step decay by age: a day, a week, a month, older.
pub fn freshness(uploaded_at: Timestamp, now: Timestamp) -> f64 {
    let age = now.saturating_sub(uploaded_at);
    if age < DAY {
        1.0
    } else if age < 7 * DAY {
        0.8
    } else if age < 30 * DAY {
        0.6
    } else {
        0.3
    }
}

/// Click-through rate discounted by bounces, in `[0, 1]`.
pub fn popularity(doc: &Document) -> f64 {
    if doc.impressions == 0 {
        return 0.0;
    }
    let ctr = (doc.click_count as f64 / doc.impressions as f64).clamp(0.0, 1.0);
    (ctr * (1.0 - doc.bounce_rate.clamp(0.0, 1.0))).clamp(0.0, 1.0)
}

fn term_counts(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for t in tokenize(text) {
        *counts.entry(t).or_insert(0) += 1;
    }
    counts
}

pub struct RankingEngine {
    options: RankingOptions,
    authority: Arc<dyn AuthoritySignal>,
    personalization: Arc<dyn PersonalizationSignal>,
    model: Arc<dyn ScoreModel>,
}

impl std::fmt::Debug for RankingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingEngine").field("options", &self.options).finish_non_exhaustive()
    }
}

impl RankingEngine {
    /// Build an engine with the default signals. Rejects invalid options.
    pub fn new(options: RankingOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            authority: Arc::new(IdTierAuthority),
            personalization: Arc::new(NoPersonalization),
            model: Arc::new(WeightedSum),
        })
    }

    pub fn with_authority(mut self, signal: Arc<dyn AuthoritySignal>) -> Self {
        self.authority = signal;
        self
    }

    pub fn with_personalization(mut self, signal: Arc<dyn PersonalizationSignal>) -> Self {
        self.personalization = signal;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ScoreModel>) -> Self {
        self.model = model;
        self
    }

    pub fn options(&self) -> &RankingOptions {
        &self.options
    }

    /// Feature values of one document for the given query terms.
    pub fn features(
        &self,
        index: &InvertedIndex,
        terms: &[String],
        doc: &Document,
        context: Option<&UserContext>,
        now: Timestamp,
    ) -> FeatureScores {
        let title_tf = term_counts(&doc.filename);
        let desc_tf = term_counts(&doc.content);
        let doc_len = f64::from(title_tf.values().chain(desc_tf.values()).sum::<u32>());
        let avg_len = index.average_document_length();
        let n = f64::from(index.total_documents());
        let (k1, b) = (self.options.bm25_k1, self.options.bm25_b);
        let filename_lower = doc.filename.to_lowercase();
        let content_lower = doc.content.to_lowercase();

        let mut f = FeatureScores {
            authority: self.authority.authority(doc),
            freshness: freshness(doc.uploaded_at, now),
            popularity: popularity(doc),
            personalization: context.map(|ctx| self.personalization.personalize(doc, ctx)),
            ..FeatureScores::default()
        };
        if terms.is_empty() {
            return f;
        }

        let mut tfidf_sum = 0.0;
        let mut overlap_hits = 0usize;
        for term in terms {
            let ttf = title_tf.get(term).copied().unwrap_or(0);
            let dtf = desc_tf.get(term).copied().unwrap_or(0);
            let idf = index.idf(term);
            tfidf_sum += f64::from(ttf * 2 + dtf) * idf;

            let tf = f64::from(ttf + dtf);
            if tf > 0.0 {
                let df = index.document_frequency(term) as f64;
                let bm25_idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let len_ratio = if avg_len > 0.0 { doc_len / avg_len } else { 1.0 };
                f.bm25 += bm25_idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_ratio));
            }

            if filename_lower.contains(term.as_str()) || content_lower.contains(term.as_str()) {
                overlap_hits += 1;
            }
            if ttf > 0 {
                f.title_matches += 1;
            } else if self.options.fuzzy_boost > 0.0
                && title_tf.keys().any(|t| is_match(term, t, self.options.fuzzy_threshold))
            {
                f.fuzzy_title_matches += 1;
            }
        }
        f.tfidf = tfidf_sum / terms.len() as f64;
        f.overlap = overlap_hits as f64 / terms.len() as f64;
        f
    }

    /// Score and order `candidates` for `query`.
    ///
    /// Scores are in `[0, 1]`; those under `min_relevance_threshold` become 0
    /// but stay in the list. Equal scores keep the candidates' input order.
    pub fn rank_search_results(
        &self,
        index: &InvertedIndex,
        query: &str,
        candidates: &[&Document],
        context: Option<&UserContext>,
        now: Timestamp,
    ) -> Vec<RankedDocument> {
        let terms = unique_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut ranked: Vec<RankedDocument> = candidates
            .iter()
            .map(|doc| {
                let features = self.features(index, &terms, doc, context, now);
                let mut score = self.model.combine(&features, &self.options);
                if score < self.options.min_relevance_threshold {
                    score = 0.0;
                }
                RankedDocument { document_id: doc.id.clone(), score, features }
            })
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// BM25 base scores run through [`rank_results`].
    pub fn rank_results_bm25(
        &self,
        index: &InvertedIndex,
        docs: &[&Document],
        query: &str,
        fuzzy_matched: &HashSet<String>,
        boost: &BoostOptions,
        now: Timestamp,
    ) -> Vec<ScoredResult> {
        let terms = unique_terms(query);
        let base: Vec<f64> = docs.iter().map(|d| self.features(index, &terms, d, None, now).bm25).collect();
        let mut results = rank_results(docs, query, &base, fuzzy_matched, boost, now);
        for r in &mut results {
            r.breakdown.algorithm = RankingAlgorithm::Bm25;
        }
        results
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingAlgorithm {
    TfIdf,
    Bm25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
    Fuzzy,
}

/// How a boost-ranked score was put together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingBreakdown {
    pub base_score: f64,
    pub recency_bonus: f64,
    pub file_size_bonus: f64,
    pub filename_boost: f64,
    pub exact_match_boost: f64,
    pub algorithm: RankingAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub document_id: String,
    pub filename: String,
    pub doc_type: String,
    pub relevance_score: f64,
    pub matched_in_filename: bool,
    pub matched_in_content: bool,
    pub match_type: MatchType,
    pub uploaded_at: Timestamp,
    pub snippet: Option<String>,
    pub breakdown: RankingBreakdown,
}

/// Continuous recency in `(0, 1]`, a month's time constant.
pub fn recency_score(uploaded_at: Timestamp, now: Timestamp) -> f64 {
    let age_days = now.saturating_sub(uploaded_at).max(0) as f64 / DAY as f64;
    (-age_days / 30.0).exp()
}

/// Smaller files score higher; linear between 100 bytes and 100 kB.
pub fn file_size_score(size: u64) -> f64 {
    const MIN: f64 = 100.0;
    const MAX: f64 = 100_000.0;
    let s = (size as f64).clamp(MIN, MAX);
    1.0 - (s - MIN) / (MAX - MIN)
}

// Whole-query containment in (filename, content).
fn phrase_hits(doc: &Document, query_lower: &str) -> (bool, bool) {
    if query_lower.is_empty() {
        return (false, false);
    }
    (doc.filename.to_lowercase().contains(query_lower), doc.content.to_lowercase().contains(query_lower))
}

fn classify(exact: bool, fuzzy: bool) -> MatchType {
    if exact {
        MatchType::Exact
    } else if fuzzy {
        MatchType::Fuzzy
    } else {
        MatchType::Partial
    }
}

/// Exact when the whole query occurs in the filename or content, fuzzy when the
/// document was only reached through a fuzzy expansion, partial otherwise.
pub fn match_type(doc: &Document, query: &str, fuzzy_only: bool) -> MatchType {
    let (f, c) = phrase_hits(doc, &query.trim().to_lowercase());
    classify(f || c, fuzzy_only)
}

/// Boost `base_scores` by filename/exact matches and add recency and size bonuses.
///
/// `base_scores[i]` belongs to `docs[i]`; missing entries count as 0. Ids in
/// `fuzzy_matched` are reported as fuzzy matches unless they match exactly.
/// Results are ordered by score, ties in input order.
pub fn rank_results(
    docs: &[&Document],
    query: &str,
    base_scores: &[f64],
    fuzzy_matched: &HashSet<String>,
    options: &BoostOptions,
    now: Timestamp,
) -> Vec<ScoredResult> {
    let query_lower = query.trim().to_lowercase();
    let terms = unique_terms(query);
    let mut results: Vec<ScoredResult> = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let base_score = base_scores.get(i).copied().unwrap_or(0.0);
            let (in_filename, in_content) = phrase_hits(doc, &query_lower);
            let filename_boost = if in_filename { options.filename_boost } else { 1.0 };
            let exact_match_boost = if in_filename || in_content { options.exact_match_boost } else { 1.0 };
            let recency_bonus = recency_score(doc.uploaded_at, now) * options.recency_weight;
            let file_size_bonus = file_size_score(doc.size) * options.file_size_weight;
            let match_type = classify(in_filename || in_content, fuzzy_matched.contains(&doc.id));
            ScoredResult {
                document_id: doc.id.clone(),
                filename: doc.filename.clone(),
                doc_type: doc.doc_type.clone(),
                relevance_score: base_score * filename_boost * exact_match_boost + recency_bonus + file_size_bonus,
                matched_in_filename: in_filename,
                matched_in_content: in_content,
                match_type,
                uploaded_at: doc.uploaded_at,
                snippet: snippet(&doc.content, &terms),
                breakdown: RankingBreakdown {
                    base_score,
                    recency_bonus,
                    file_size_bonus,
                    filename_boost,
                    exact_match_boost,
                    algorithm: RankingAlgorithm::TfIdf,
                },
            }
        })
        .collect();
    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    results
}
