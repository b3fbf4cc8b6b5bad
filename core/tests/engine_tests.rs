use sift_core::persist::{load_snapshot, save_snapshot, IndexPaths};
use sift_core::tokenizer::unique_terms;
use sift_core::{EngineConfig, InvertedIndex, NewDocument, SearchEngine, SearchRequest, SuggestAlgorithm, SuggestionSource};
use std::sync::Arc;
use std::thread;

const NOW: i64 = 1_700_000_000;

fn corpus() -> Vec<NewDocument> {
    vec![
        NewDocument::new("search-engines.md", "inverted index and ranking of search results").with_id("1"),
        NewDocument::new("trie-notes.txt", "prefix trees power autocomplete suggestions").with_id("2"),
        NewDocument::new("bm25.pdf", "probabilistic ranking with term saturation").with_id("3"),
        NewDocument::new("cooking.txt", "slow roasted vegetables").with_id("4"),
    ]
    .into_iter()
    .map(|d| d.uploaded_at(NOW - 3_600))
    .collect()
}

fn engine() -> SearchEngine {
    let engine = SearchEngine::new(EngineConfig::default()).unwrap();
    for doc in corpus() {
        engine.add_document(doc).unwrap();
    }
    engine
}

fn df_and_idf(index: &InvertedIndex, terms: &[String]) -> Vec<(usize, f64)> {
    terms.iter().map(|t| (index.document_frequency(t), index.idf(t))).collect()
}

#[test]
fn reindexing_under_new_id_adds_one_posting_per_term() {
    let mut index = InvertedIndex::new();
    for doc in corpus() {
        index.add_document(doc).unwrap();
    }
    for doc in corpus() {
        let terms = unique_terms(&format!("{} {}", doc.content, doc.filename));
        let before = df_and_idf(&index, &terms);
        let copy = format!("copy-{}", doc.id.as_deref().unwrap_or_default());
        index.add_document(NewDocument { id: Some(copy.clone()), ..doc }).unwrap();

        for (term, (df, idf)) in terms.iter().zip(&before) {
            assert_eq!(index.document_frequency(term), df + 1, "{term}");
            assert!(index.idf(term) <= *idf + 1e-12, "{term}");
        }
        index.remove_document(&copy).unwrap();
        for (term, (df, idf)) in terms.iter().zip(&before) {
            assert_eq!(index.document_frequency(term), *df, "{term}");
            assert!((index.idf(term) - idf).abs() < 1e-12, "{term}");
        }
    }
}

#[test]
fn identical_builds_agree() {
    let a = engine();
    let b = engine();
    let req = SearchRequest::new("ranking search");
    assert_eq!(a.execute_at(&req, NOW).hits, b.execute_at(&req, NOW).hits);
    assert_eq!(a.search("ranking"), b.search("ranking"));
}

#[test]
fn removal_restores_previous_results() {
    let engine = engine();
    let before = engine.execute_at(&SearchRequest::new("ranking"), NOW);
    engine.add_document(NewDocument::new("extra.txt", "ranking ranking").with_id("9").uploaded_at(NOW)).unwrap();
    assert_ne!(engine.execute_at(&SearchRequest::new("ranking"), NOW).total_hits, before.total_hits);
    engine.remove_document("9").unwrap();
    let after = engine.execute_at(&SearchRequest::new("ranking"), NOW);
    assert_eq!(before.hits, after.hits);
}

#[test]
fn duplicate_ids_are_rejected() {
    let engine = engine();
    let err = engine.add_document(NewDocument::new("x", "y").with_id("1")).unwrap_err();
    assert_eq!(err, sift_core::Error::DuplicateDocument("1".into()));
    assert_eq!(engine.stats().documents, 4);
}

#[test]
fn snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let engine = engine();
    engine.add_suggestion("search engine tutorial", 0.9, SuggestionSource::PopularQueries).unwrap();
    engine.record_click("3");
    let meta = save_snapshot(&engine, &paths).unwrap();
    assert_eq!(meta.num_docs, 4);
    assert!(paths.exists());

    let loaded = load_snapshot(&paths, None).unwrap();
    let req = SearchRequest::new("ranking");
    assert_eq!(engine.execute_at(&req, NOW).hits, loaded.execute_at(&req, NOW).hits);
    assert_eq!(loaded.document("3").unwrap().click_count, 1);
    assert_eq!(
        engine.suggest_with("search", SuggestAlgorithm::Prefix, 5),
        loaded.suggest_with("search", SuggestAlgorithm::Prefix, 5)
    );
    assert_eq!(loaded.stats().terms, engine.stats().terms);
}

#[test]
fn concurrent_readers_and_writer() {
    let engine = Arc::new(engine());
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..50 {
                let doc = NewDocument::new(format!("gen-{i}.txt"), "generated ranking text").with_id(format!("g{i}"));
                engine.add_document(doc).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    let res = engine.execute(&SearchRequest::new("ranking"));
                    assert!(res.total_hits >= 2);
                    engine.autocomplete("gen", 5);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(engine.stats().documents, 54);
}
