//! Engine configuration.
//!
//! Every section is `serde`-deserializable with per-field defaults, so a JSON
//! file only needs to name the values it overrides. Values are checked by
//! [`EngineConfig::validate`]; an engine is never built from an invalid config.

use crate::error::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// BM25 term frequency saturation.
pub const BM25_K1: f64 = 1.2;

/// BM25 document length normalization.
pub const BM25_B: f64 = 0.75;

/// Maximum edit distance for fuzzy autocomplete candidates.
pub const FUZZY_SUGGEST_MAX_DISTANCE: usize = 2;

/// Score lost per edit for fuzzy autocomplete candidates.
pub const FUZZY_SUGGEST_PENALTY: f32 = 0.2;

/// Weight of the lexical-overlap signal in the combined score.
pub const OVERLAP_WEIGHT: f64 = 0.1;

/// Bonus per query term found in the filename.
pub const TITLE_MATCH_BONUS: f64 = 0.1;

/// Default cap on indexed documents.
pub const DEFAULT_MAX_DOCUMENTS: usize = 1_000_000;

/// Default cap on distinct terms.
pub const DEFAULT_MAX_TERMS: usize = 5_000_000;

/// Default cap on distinct autocomplete suggestions.
pub const DEFAULT_MAX_SUGGESTIONS: usize = 1_000_000;

/// Queries longer than this (in bytes) are treated as malformed.
pub const DEFAULT_MAX_QUERY_LEN: usize = 1_024;

/// Candidates considered by ranking for a single query.
pub const DEFAULT_MAX_CANDIDATES: usize = 10_000;

/// Relative weights of the ranking signals. Each must be `>= 0`; they need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub relevance: f64,
    pub authority: f64,
    pub freshness: f64,
    pub popularity: f64,
    pub personalization: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self { relevance: 0.4, authority: 0.2, freshness: 0.15, popularity: 0.15, personalization: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingOptions {
    pub weights: RankingWeights,
    /// Combined scores below this are forced to zero.
    pub min_relevance_threshold: f64,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    /// Bonus per query term that only fuzzily matches a filename term. Zero disables.
    pub fuzzy_boost: f64,
    /// Edit distance for the fuzzy filename bonus.
    pub fuzzy_threshold: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            min_relevance_threshold: 0.1,
            bm25_k1: BM25_K1,
            bm25_b: BM25_B,
            fuzzy_boost: 0.05,
            fuzzy_threshold: 1,
        }
    }
}

impl RankingOptions {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        non_negative("weights.relevance", w.relevance)?;
        non_negative("weights.authority", w.authority)?;
        non_negative("weights.freshness", w.freshness)?;
        non_negative("weights.popularity", w.popularity)?;
        non_negative("weights.personalization", w.personalization)?;
        unit_interval("min_relevance_threshold", self.min_relevance_threshold)?;
        non_negative("bm25_k1", self.bm25_k1)?;
        unit_interval("bm25_b", self.bm25_b)?;
        non_negative("fuzzy_boost", self.fuzzy_boost)?;
        Ok(())
    }
}

/// Multipliers for the boost-and-breakdown ranking variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostOptions {
    pub filename_boost: f64,
    pub exact_match_boost: f64,
    pub recency_weight: f64,
    pub file_size_weight: f64,
}

impl Default for BoostOptions {
    fn default() -> Self {
        Self { filename_boost: 2.0, exact_match_boost: 1.5, recency_weight: 0.1, file_size_weight: 0.05 }
    }
}

impl BoostOptions {
    pub fn validate(&self) -> Result<()> {
        non_negative("boost.filename_boost", self.filename_boost)?;
        non_negative("boost.exact_match_boost", self.exact_match_boost)?;
        non_negative("boost.recency_weight", self.recency_weight)?;
        non_negative("boost.file_size_weight", self.file_size_weight)?;
        Ok(())
    }
}

/// How [`crate::autocomplete::AutocompleteService::suggest`] combines sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestAlgorithm {
    Prefix,
    Fuzzy,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SuggestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prefix" => Ok(Self::Prefix),
            "fuzzy" => Ok(Self::Fuzzy),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown algorithm {other:?} (expected prefix, fuzzy or hybrid)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocompleteConfig {
    pub algorithm: SuggestAlgorithm,
    /// Suggestions scoring below this are dropped.
    pub min_score_threshold: f32,
    pub max_suggestions: usize,
    pub popularity_weight: f32,
    pub history_weight: f32,
    /// Trie entries scanned by fuzzy suggestion.
    pub max_fuzzy_candidates: usize,
    /// Window for the trending flag, in seconds.
    pub trending_window_secs: i64,
    /// Selections inside the window needed to count as trending.
    pub trending_threshold: usize,
    /// Register filename terms of indexed documents as suggestions.
    pub index_titles: bool,
    /// Register queries that returned results as history suggestions.
    pub learn_queries: bool,
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            algorithm: SuggestAlgorithm::Hybrid,
            min_score_threshold: 0.0,
            max_suggestions: 10,
            popularity_weight: 1.0,
            history_weight: 1.2,
            max_fuzzy_candidates: 10_000,
            trending_window_secs: 3_600,
            trending_threshold: 5,
            index_titles: true,
            learn_queries: false,
        }
    }
}

impl AutocompleteConfig {
    pub fn validate(&self) -> Result<()> {
        unit_interval("autocomplete.min_score_threshold", f64::from(self.min_score_threshold))?;
        non_negative("autocomplete.popularity_weight", f64::from(self.popularity_weight))?;
        non_negative("autocomplete.history_weight", f64::from(self.history_weight))?;
        if self.max_suggestions == 0 {
            return Err(Error::invalid("autocomplete.max_suggestions", "must be positive"));
        }
        if self.trending_window_secs <= 0 {
            return Err(Error::invalid("autocomplete.trending_window_secs", "must be positive"));
        }
        Ok(())
    }
}

/// Capacity limits. Exceeding one is an error, never a silent truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexLimits {
    pub max_documents: usize,
    pub max_terms: usize,
    pub max_suggestions: usize,
}

impl Default for IndexLimits {
    fn default() -> Self {
        Self {
            max_documents: DEFAULT_MAX_DOCUMENTS,
            max_terms: DEFAULT_MAX_TERMS,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ranking: RankingOptions,
    pub boost: BoostOptions,
    pub autocomplete: AutocompleteConfig,
    pub limits: IndexLimits,
    pub max_query_len: usize,
    pub max_candidates: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ranking: RankingOptions::default(),
            boost: BoostOptions::default(),
            autocomplete: AutocompleteConfig::default(),
            limits: IndexLimits::default(),
            max_query_len: DEFAULT_MAX_QUERY_LEN,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.ranking.validate()?;
        self.boost.validate()?;
        self.autocomplete.validate()?;
        if self.max_query_len == 0 {
            return Err(Error::invalid("max_query_len", "must be positive"));
        }
        if self.max_candidates == 0 {
            return Err(Error::invalid("max_candidates", "must be positive"));
        }
        Ok(())
    }

    /// Read and validate a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(field, format!("must be a finite value >= 0, got {value}")))
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid(field, format!("must be within [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.ranking.weights.authority = -0.1;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { field: "weights.authority", .. }));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.ranking.min_relevance_threshold = 1.5;
        assert!(cfg.validate().is_err());
        let mut cfg = EngineConfig::default();
        cfg.autocomplete.min_score_threshold = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"ranking":{"weights":{"authority":0.5}},"max_candidates":50}"#).unwrap();
        assert_eq!(cfg.ranking.weights.authority, 0.5);
        assert_eq!(cfg.ranking.weights.relevance, RankingWeights::default().relevance);
        assert_eq!(cfg.max_candidates, 50);
        assert_eq!(cfg.autocomplete.algorithm, SuggestAlgorithm::Hybrid);
    }

    #[test]
    fn algorithm_from_str() {
        assert_eq!("Prefix".parse::<SuggestAlgorithm>().unwrap(), SuggestAlgorithm::Prefix);
        assert!("ml".parse::<SuggestAlgorithm>().is_err());
    }
}
