//! Inverted index with a lazily filled IDF cache.
//!
//! Terms are interned to [`TermId`]s that are never reused, even when a term's
//! posting list empties after a removal. Documents are stored in insertion
//! slots ([`DocSlot`]); posting lists refer to slots, and every public
//! accessor speaks in external document ids.

use crate::config::IndexLimits;
use crate::error::{Error, Result};
use crate::tokenizer::tokenize;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TermId = u32;
pub type DocSlot = u32;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Removed slots tolerated before live documents are renumbered.
const COMPACT_AFTER: usize = 64;

/// An indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub size: u64,
    pub doc_type: String,
    pub uploaded_at: Timestamp,
    pub click_count: u64,
    pub impressions: u64,
    /// Fraction of visits that left immediately, in `[0, 1]`.
    pub bounce_rate: f64,
    /// Externally computed importance, in `[0, 1]`.
    pub authority_score: f64,
}

/// Ingestion payload; the index assigns an id when none is given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<String>,
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub uploaded_at: Timestamp,
    #[serde(default)]
    pub authority_score: f64,
}

impl NewDocument {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self { size: content.len() as u64, filename: filename.into(), content, ..Default::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn uploaded_at(mut self, ts: Timestamp) -> Self {
        self.uploaded_at = ts;
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    doc: Document,
    term_freqs: HashMap<TermId, u32>,
    length: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    dictionary: HashMap<String, TermId>,
    terms: Vec<String>,
    /// Indexed by `TermId`; slots in insertion order, each at most once.
    postings: Vec<Vec<DocSlot>>,
    /// Indexed by `DocSlot`; `None` once removed.
    docs: Vec<Option<DocEntry>>,
    slots: HashMap<String, DocSlot>,
    num_docs: u32,
    total_length: u64,
    next_id: u64,
    limits: IndexLimits,
    #[serde(skip)]
    idf_cache: RwLock<HashMap<TermId, f64>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: IndexLimits) -> Self {
        Self { limits, ..Self::default() }
    }

    pub fn limits(&self) -> &IndexLimits {
        &self.limits
    }

    pub(crate) fn set_limits(&mut self, limits: IndexLimits) {
        self.limits = limits;
    }

    /// Index a document and return its id.
    ///
    /// Fails without touching the index if the id is taken or a capacity
    /// limit would be crossed.
    pub fn add_document(&mut self, new: NewDocument) -> Result<String> {
        if self.num_docs as usize >= self.limits.max_documents {
            return Err(Error::CapacityExceeded { what: "document", limit: self.limits.max_documents });
        }
        let id = match new.id {
            Some(id) => id,
            None => self.fresh_id(),
        };
        if self.slots.contains_key(&id) {
            return Err(Error::DuplicateDocument(id));
        }

        let mut raw_tf: HashMap<String, u32> = HashMap::new();
        let mut length = 0u32;
        for term in tokenize(&new.content).chain(tokenize(&new.filename)) {
            *raw_tf.entry(term).or_insert(0) += 1;
            length += 1;
        }
        let unseen = raw_tf.keys().filter(|t| !self.dictionary.contains_key(*t)).count();
        if self.terms.len() + unseen > self.limits.max_terms {
            return Err(Error::CapacityExceeded { what: "term", limit: self.limits.max_terms });
        }

        let slot = DocSlot::try_from(self.docs.len())
            .map_err(|_| Error::CapacityExceeded { what: "document slot", limit: DocSlot::MAX as usize })?;
        let mut term_freqs = HashMap::with_capacity(raw_tf.len());
        for (term, tf) in raw_tf {
            let tid = self.intern(term);
            let plist = &mut self.postings[tid as usize];
            if plist.last() != Some(&slot) {
                plist.push(slot);
            }
            term_freqs.insert(tid, tf);
        }

        let doc = Document {
            id: id.clone(),
            filename: new.filename,
            content: new.content,
            size: new.size,
            doc_type: new.doc_type,
            uploaded_at: new.uploaded_at,
            click_count: 0,
            impressions: 0,
            bounce_rate: 0.0,
            authority_score: new.authority_score.clamp(0.0, 1.0),
        };
        self.docs.push(Some(DocEntry { doc, term_freqs, length }));
        self.slots.insert(id.clone(), slot);
        self.num_docs += 1;
        self.total_length += u64::from(length);
        self.invalidate_idf();
        tracing::debug!(doc_id = %id, length, terms = self.terms.len(), "indexed document");
        Ok(id)
    }

    /// Remove a document; returns it if it was indexed.
    ///
    /// Terms whose posting lists become empty stay in the term table.
    pub fn remove_document(&mut self, id: &str) -> Option<Document> {
        let slot = self.slots.remove(id)?;
        let entry = self.docs.get_mut(slot as usize)?.take()?;
        for tid in entry.term_freqs.keys() {
            self.postings[*tid as usize].retain(|s| *s != slot);
        }
        self.num_docs -= 1;
        self.total_length -= u64::from(entry.length);
        self.invalidate_idf();
        tracing::debug!(doc_id = %id, "removed document");
        if self.docs.len() - self.num_docs as usize > COMPACT_AFTER.max(self.num_docs as usize) {
            self.compact();
        }
        Some(entry.doc)
    }

    // Renumber live slots densely; relative order is kept so postings stay sorted.
    fn compact(&mut self) {
        let mut remap: Vec<Option<DocSlot>> = Vec::with_capacity(self.docs.len());
        let mut live = Vec::with_capacity(self.num_docs as usize);
        for entry in self.docs.drain(..) {
            match entry {
                Some(e) => {
                    remap.push(Some(live.len() as DocSlot));
                    live.push(Some(e));
                }
                None => remap.push(None),
            }
        }
        for plist in &mut self.postings {
            *plist = plist.iter().filter_map(|s| remap[*s as usize]).collect();
        }
        for slot in self.slots.values_mut() {
            if let Some(new) = remap[*slot as usize] {
                *slot = new;
            }
        }
        tracing::debug!(from = remap.len(), to = live.len(), "compacted document slots");
        self.docs = live;
    }

    /// Inverse document frequency, `ln(N / df)`; 0 for unknown or orphaned terms.
    pub fn idf(&self, term: &str) -> f64 {
        match self.dictionary.get(term) {
            Some(&tid) => self.idf_for(tid),
            None => 0.0,
        }
    }

    fn idf_for(&self, tid: TermId) -> f64 {
        if let Some(idf) = self.idf_cache.read().get(&tid) {
            return *idf;
        }
        let df = self.postings[tid as usize].len();
        let idf = if df > 0 { (f64::from(self.num_docs) / df as f64).ln() } else { 0.0 };
        self.idf_cache.write().insert(tid, idf);
        idf
    }

    fn invalidate_idf(&mut self) {
        self.idf_cache.get_mut().clear();
    }

    /// Accumulated IDF per matching document: every distinct query term adds
    /// its IDF to each document in its posting list.
    pub fn search(&self, query: &str) -> HashMap<String, f64> {
        self.search_terms(&crate::tokenizer::unique_terms(query))
            .into_iter()
            .filter_map(|(slot, score)| Some((self.document_at(slot)?.id.clone(), score)))
            .collect()
    }

    /// Same as [`search`](Self::search) over pre-tokenized terms, keyed by
    /// slot and ordered by insertion.
    pub(crate) fn search_terms(&self, terms: &[String]) -> Vec<(DocSlot, f64)> {
        let mut scores: HashMap<DocSlot, f64> = HashMap::new();
        for term in terms {
            if let Some(&tid) = self.dictionary.get(term) {
                let idf = self.idf_for(tid);
                for slot in &self.postings[tid as usize] {
                    *scores.entry(*slot).or_insert(0.0) += idf;
                }
            }
        }
        let mut out: Vec<(DocSlot, f64)> = scores.into_iter().collect();
        out.sort_by_key(|(slot, _)| *slot);
        out
    }

    pub(crate) fn document_at(&self, slot: DocSlot) -> Option<&Document> {
        self.docs.get(slot as usize)?.as_ref().map(|e| &e.doc)
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        let slot = *self.slots.get(id)?;
        self.document_at(slot)
    }

    /// Live documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> + '_ {
        self.docs.iter().flatten().map(|e| &e.doc)
    }

    /// Count a click on a document. Returns false for unknown ids.
    pub fn record_click(&mut self, id: &str) -> bool {
        self.doc_mut(id).map(|d| d.click_count += 1).is_some()
    }

    /// Count an impression of a document in a result list.
    pub fn record_impression(&mut self, id: &str) -> bool {
        self.doc_mut(id).map(|d| d.impressions += 1).is_some()
    }

    /// Update the bounce rate reported by a collaborator; clamped to `[0, 1]`.
    pub fn set_bounce_rate(&mut self, id: &str, rate: f64) -> bool {
        self.doc_mut(id).map(|d| d.bounce_rate = rate.clamp(0.0, 1.0)).is_some()
    }

    fn doc_mut(&mut self, id: &str) -> Option<&mut Document> {
        let slot = *self.slots.get(id)?;
        self.docs.get_mut(slot as usize)?.as_mut().map(|e| &mut e.doc)
    }

    pub fn total_documents(&self) -> u32 {
        self.num_docs
    }

    /// Size of the term table, including terms with empty posting lists.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.dictionary.contains_key(term)
    }

    /// Terms with at least one live posting, in interning order.
    pub fn vocabulary(&self) -> impl Iterator<Item = &str> + '_ {
        self.terms
            .iter()
            .zip(&self.postings)
            .filter(|(_, p)| !p.is_empty())
            .map(|(t, _)| t.as_str())
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.dictionary.get(term).copied()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.dictionary.get(term).map_or(0, |&tid| self.postings[tid as usize].len())
    }

    /// Ids of the documents containing `term`, in insertion order.
    pub fn postings(&self, term: &str) -> Vec<&str> {
        let Some(&tid) = self.dictionary.get(term) else { return Vec::new() };
        self.postings[tid as usize]
            .iter()
            .filter_map(|s| self.document_at(*s))
            .map(|d| d.id.as_str())
            .collect()
    }

    pub fn average_document_length(&self) -> f64 {
        if self.num_docs == 0 {
            return 0.0;
        }
        self.total_length as f64 / f64::from(self.num_docs)
    }

    /// Token count of filename and content together; 0 for unknown ids.
    pub fn document_length(&self, id: &str) -> u32 {
        self.entry(id).map_or(0, |e| e.length)
    }

    pub fn term_frequency(&self, id: &str, term: &str) -> u32 {
        let (Some(entry), Some(tid)) = (self.entry(id), self.dictionary.get(term)) else { return 0 };
        entry.term_freqs.get(tid).copied().unwrap_or(0)
    }

    fn entry(&self, id: &str) -> Option<&DocEntry> {
        let slot = *self.slots.get(id)?;
        self.docs.get(slot as usize)?.as_ref()
    }

    fn intern(&mut self, term: String) -> TermId {
        if let Some(&tid) = self.dictionary.get(&term) {
            return tid;
        }
        let tid = self.terms.len() as TermId;
        self.terms.push(term.clone());
        self.postings.push(Vec::new());
        self.dictionary.insert(term, tid);
        tid
    }

    fn fresh_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = self.next_id.to_string();
            if !self.slots.contains_key(&id) {
                return id;
            }
        }
    }

    /// Drop every document and term.
    pub fn clear(&mut self) {
        let limits = self.limits.clone();
        *self = Self::with_limits(limits);
    }
}
