//! Sift: an in-memory document search engine.
//!
//! Documents are tokenized into an [`InvertedIndex`], queried through
//! IDF-weighted retrieval and ordered by a multi-signal [`RankingEngine`].
//! An [`AutocompleteService`] built on a prefix [`trie::Trie`] offers prefix,
//! fuzzy and hybrid suggestions. [`SearchEngine`] ties the pieces together
//! behind reader/writer locks and [`persist`] snapshots it to disk.

pub mod autocomplete;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod index;
pub mod persist;
pub mod ranking;
pub mod snippet;
pub mod tokenizer;
pub mod trie;

pub use autocomplete::{AutocompleteService, SuggestionSource, UsageWindow};
pub use config::{EngineConfig, SuggestAlgorithm};
pub use engine::{EngineStats, SearchEngine, SearchHit, SearchRequest, SearchResults, SearchScope};
pub use error::{Error, Result};
pub use index::{Document, InvertedIndex, NewDocument, Timestamp};
pub use ranking::{RankedDocument, RankingEngine, UserContext};
pub use trie::Suggestion;

/// Current time as unix seconds.
pub fn now() -> Timestamp {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
