use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sift_core::persist::{load_snapshot, save_snapshot, IndexPaths};
use sift_core::{EngineConfig, NewDocument, SearchEngine, SearchRequest, SearchScope, SuggestAlgorithm};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One input record. `title`/`body` are accepted for `filename`/`content`.
#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "title")]
    filename: String,
    #[serde(alias = "body")]
    content: String,
    #[serde(default, rename = "type")]
    doc_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    /// RFC 3339 upload time; defaults to now.
    #[serde(default, alias = "timestamp")]
    uploaded_at: Option<String>,
    #[serde(default)]
    authority: Option<f64>,
}

impl InputDoc {
    fn into_new_document(self, now: i64) -> NewDocument {
        let uploaded_at = self
            .uploaded_at
            .as_deref()
            .and_then(|s| match OffsetDateTime::parse(s, &Rfc3339) {
                Ok(t) => Some(t.unix_timestamp()),
                Err(err) => {
                    tracing::warn!(value = s, %err, "unparseable timestamp, using now");
                    None
                }
            })
            .unwrap_or(now);
        let doc_type = self.doc_type.unwrap_or_else(|| extension_type(&self.filename));
        let mut doc = NewDocument::new(self.filename, self.content).uploaded_at(uploaded_at).doc_type(doc_type);
        if let Some(size) = self.size {
            doc.size = size;
        }
        if let Some(id) = self.id {
            doc = doc.with_id(id);
        }
        doc.authority_score = self.authority.unwrap_or(0.0);
        doc
    }
}

fn extension_type(filename: &str) -> String {
    Path::new(filename).extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase()
}

#[derive(Parser)]
#[command(name = "sift-indexer")]
#[command(about = "Build and query sift index snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a snapshot from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output snapshot directory
        #[arg(long)]
        output: String,
        /// Engine config JSON; defaults apply when omitted
        #[arg(long)]
        config: Option<String>,
    },
    /// Run a ranked query against a snapshot
    Search {
        #[arg(long, default_value = "./index")]
        index: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = false)]
        fuzzy: bool,
        /// all, filename or content
        #[arg(long, default_value = "all")]
        scope: SearchScope,
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Print autocomplete suggestions for a prefix
    Suggest {
        #[arg(long, default_value = "./index")]
        index: String,
        prefix: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// prefix, fuzzy or hybrid; the snapshot's configured algorithm when omitted
        #[arg(long)]
        algorithm: Option<SuggestAlgorithm>,
    },
    /// Print snapshot statistics
    Stats {
        #[arg(long, default_value = "./index")]
        index: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, config } => build_index(&input, &output, config.as_deref()),
        Commands::Search { index, query, limit, fuzzy, scope, explain } => {
            let engine = load_snapshot(&IndexPaths::new(&index), None)?;
            let req = SearchRequest::new(query).limit(limit).fuzzy(fuzzy).scope(scope).explain(explain);
            println!("{}", serde_json::to_string_pretty(&engine.execute(&req))?);
            Ok(())
        }
        Commands::Suggest { index, prefix, limit, algorithm } => {
            let engine = load_snapshot(&IndexPaths::new(&index), None)?;
            let suggestions = match algorithm {
                Some(a) => engine.suggest_with(&prefix, a, limit),
                None => engine.autocomplete(&prefix, limit),
            };
            for s in suggestions {
                println!("{:.3}\t{}", s.score, s.text);
            }
            Ok(())
        }
        Commands::Stats { index } => {
            let engine = load_snapshot(&IndexPaths::new(&index), None)?;
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
            Ok(())
        }
    }
}

fn build_index(input: &str, output: &str, config: Option<&str>) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = SearchEngine::new(config)?;
    let now = sift_core::now();

    let mut indexed = 0usize;
    let mut skipped = 0usize;
    for file in input_files(Path::new(input)) {
        for doc in read_docs(&file)? {
            match engine.add_document(doc.into_new_document(now)) {
                Ok(_) => indexed += 1,
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(file = %file.display(), %err, "document skipped");
                }
            }
        }
    }
    tracing::info!(indexed, skipped, "ingested documents");

    let meta = save_snapshot(&engine, &IndexPaths::new(output))?;
    tracing::info!(output, num_docs = meta.num_docs, num_terms = meta.num_terms, "index build complete");
    Ok(())
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn read_docs(file: &Path) -> Result<Vec<InputDoc>> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut docs = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: InputDoc = serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), n + 1))?;
            docs.push(doc);
        }
        return Ok(docs);
    }
    let json: serde_json::Value =
        serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
    Ok(match json {
        serde_json::Value::Array(arr) => {
            arr.into_iter().map(serde_json::from_value::<InputDoc>).collect::<std::result::Result<Vec<_>, _>>()?
        }
        obj @ serde_json::Value::Object(_) => vec![serde_json::from_value(obj)?],
        _ => Vec::new(),
    })
}
