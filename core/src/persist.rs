//! On-disk snapshots of a [`SearchEngine`].
//!
//! A snapshot directory holds:
//! - `index.bin`: the bincode-encoded [`InvertedIndex`]
//! - `suggestions.bin`: the bincode-encoded [`Trie`]
//! - `config.json`: the [`EngineConfig`] the engine ran with
//! - `meta.json`: a human-readable [`MetaFile`]

use crate::config::EngineConfig;
use crate::engine::SearchEngine;
use crate::index::InvertedIndex;
use crate::trie::Trie;
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Bumped whenever the binary layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: usize,
    pub num_suggestions: usize,
    /// RFC 3339, UTC.
    pub created_at: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join("index.bin") }
    pub fn suggestions(&self) -> PathBuf { self.root.join("suggestions.bin") }
    pub fn config(&self) -> PathBuf { self.root.join("config.json") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }

    /// True when the directory looks like a snapshot.
    pub fn exists(&self) -> bool {
        self.meta().is_file() && self.index().is_file()
    }
}

fn write_bin<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(f);
    bincode::serialize_into(&mut w, value).with_context(|| format!("encoding {}", path.display()))?;
    w.flush()?;
    Ok(())
}

fn read_bin<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(f)).with_context(|| format!("decoding {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let json = serde_json::to_string_pretty(value)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_json(&paths.meta(), meta)
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let path = paths.meta();
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let meta: MetaFile = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(meta)
}

/// Write the engine's index, suggestions, config and meta under `paths`.
///
/// Both locks are held for the duration, so the files describe one consistent state.
pub fn save_snapshot(engine: &SearchEngine, paths: &IndexPaths) -> Result<MetaFile> {
    create_dir_all(&paths.root).with_context(|| format!("creating {}", paths.root.display()))?;
    let index = engine.read_index();
    let suggestions = engine.read_suggestions();
    write_bin(&paths.index(), &*index)?;
    write_bin(&paths.suggestions(), suggestions.trie())?;
    write_json(&paths.config(), engine.config())?;

    let meta = MetaFile {
        num_docs: index.total_documents(),
        num_terms: index.term_count(),
        num_suggestions: suggestions.trie().len(),
        created_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
        version: SNAPSHOT_VERSION,
    };
    save_meta(paths, &meta)?;
    tracing::info!(root = %paths.root.display(), docs = meta.num_docs, terms = meta.num_terms, "snapshot saved");
    Ok(meta)
}

/// Load a snapshot. `config` overrides the stored `config.json` when given.
pub fn load_snapshot(paths: &IndexPaths, config: Option<EngineConfig>) -> Result<SearchEngine> {
    let meta = load_meta(paths)?;
    if meta.version != SNAPSHOT_VERSION {
        bail!("snapshot version {} is not supported (expected {})", meta.version, SNAPSHOT_VERSION);
    }
    let config = match config {
        Some(c) => c,
        None => EngineConfig::from_json_file(paths.config())?,
    };
    let index: InvertedIndex = read_bin(&paths.index())?;
    let trie: Trie = if paths.suggestions().is_file() { read_bin(&paths.suggestions())? } else { Trie::new() };
    if index.total_documents() != meta.num_docs {
        bail!("index holds {} documents but meta.json says {}", index.total_documents(), meta.num_docs);
    }
    let engine = SearchEngine::from_parts(config, index, trie)?;
    tracing::info!(root = %paths.root.display(), docs = meta.num_docs, created_at = %meta.created_at, "snapshot loaded");
    Ok(engine)
}
