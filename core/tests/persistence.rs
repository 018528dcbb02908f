use std::fs;
use std::num::NonZeroUsize;
use tempfile::tempdir;
use zapindex::persist::{flush, open};
use zapindex::{
    IndexError, IndexHandle, IndexSettings, IndexStore, IndexingPipeline, InputDoc, InvertedIndex,
    PipelineOptions, TokenizerSettings,
};

fn corpus() -> Vec<InputDoc> {
    vec![
        InputDoc::new("Bug fix", "Fixed a bug in the parser", "https://github.com/acme/app/issues/1"),
        InputDoc::new("Feature", "Add new bug tracking feature", "https://github.com/acme/app/pull/2"),
        InputDoc::new("Parser crash on empty input", "The parser panics when input is empty", "https://github.com/acme/app/issues/3"),
        InputDoc::new("Docs: tracking guide", "Explain how bug tracking works", "https://github.com/acme/app/pull/4"),
        InputDoc::new("Refactor lexer", "Split lexer from parser, no behaviour change", "https://github.com/acme/app/pull/5"),
    ]
}

const QUERIES: &[&str] = &["bug", "parser", "bug fix", "tracking feature", "+parser -crash", "lexer", "nothing_here", ""];

#[test]
fn missing_path_opens_empty_index() {
    let dir = tempdir().unwrap();
    let idx = open(dir.path().join("absent.idx")).unwrap();
    assert_eq!(idx.total_documents(), 0);
}

#[test]
fn reload_gives_identical_results() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("issues.idx");
    let mut idx = InvertedIndex::new();
    for doc in corpus() {
        idx.add_document(doc).unwrap();
    }
    idx.remove_document(3).unwrap();
    flush(&idx, &path).unwrap();

    let reloaded = open(&path).unwrap();
    for q in QUERIES {
        for k in [1, 3, 10] {
            assert_eq!(zapindex::search(&idx, q, k).unwrap(), zapindex::search(&reloaded, q, k).unwrap(), "query {q:?}");
        }
    }
    assert_eq!(reloaded.stats(), idx.stats());
    assert_eq!(reloaded.get_posting_list("bug"), idx.get_posting_list("bug"));
}

#[test]
fn settings_survive_reload() {
    let dir = tempdir().unwrap();
    let store = IndexStore::new(dir.path().join("stemmed.idx"));
    let settings = IndexSettings {
        tokenizer: TokenizerSettings { stopwords: true, stem: true },
        title_boost: 3.0,
        ..IndexSettings::default()
    };
    let handle = IndexHandle::open(&store, settings.clone()).unwrap();
    handle.add_document(InputDoc::new("Running tests", "runner output", "loc")).unwrap();
    handle.flush(&store).unwrap();

    // Requested defaults are ignored in favour of the persisted settings.
    let reloaded = IndexHandle::open(&store, IndexSettings::default()).unwrap();
    reloaded.read(|idx| assert_eq!(idx.settings(), &settings));
    assert_eq!(reloaded.search("runs", 5).unwrap().len(), 1);
}

#[test]
fn truncated_or_garbage_file_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("issues.idx");
    let mut idx = InvertedIndex::new();
    for doc in corpus() {
        idx.add_document(doc).unwrap();
    }
    flush(&idx, &path).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(open(&path), Err(IndexError::CorruptIndex { .. })));

    fs::write(&path, b"definitely not an index").unwrap();
    assert!(matches!(open(&path), Err(IndexError::CorruptIndex { .. })));

    fs::write(&path, b"").unwrap();
    assert!(matches!(open(&path), Err(IndexError::CorruptIndex { .. })));
}

#[test]
fn unwritable_destination_is_io_failure_and_keeps_old_file() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"a plain file").unwrap();

    let idx = InvertedIndex::new();
    let err = flush(&idx, blocker.join("issues.idx")).unwrap_err();
    assert!(matches!(err, IndexError::Io { .. }));

    // A directory sitting at the destination cannot be replaced by a file.
    let good = dir.path().join("good.idx");
    let mut idx = InvertedIndex::new();
    idx.add_document(InputDoc::new("kept", "body", "loc")).unwrap();
    flush(&idx, &good).unwrap();
    let as_dir = dir.path().join("dir.idx");
    fs::create_dir(&as_dir).unwrap();
    assert!(matches!(flush(&idx, &as_dir), Err(IndexError::Io { .. })));
    assert_eq!(open(&good).unwrap().total_documents(), 1);
}

#[test]
fn pipeline_flushes_periodically_and_at_end() {
    let dir = tempdir().unwrap();
    let store = IndexStore::new(dir.path().join("nested").join("issues.idx"));
    let handle = IndexHandle::open(&store, IndexSettings::default()).unwrap();
    let options = PipelineOptions { flush_every: NonZeroUsize::new(2), flush_at_end: true };
    let report = IndexingPipeline::new(&handle).with_store(&store).with_options(options).ingest(corpus()).unwrap();
    assert_eq!(report.indexed.len(), 5);
    // After docs 2 and 4, then the trailing fifth.
    assert_eq!(report.flushes, 3);

    let reloaded = IndexHandle::open(&store, IndexSettings::default()).unwrap();
    assert_eq!(reloaded.search("bug", 10).unwrap(), handle.search("bug", 10).unwrap());
}

#[test]
fn compaction_preserves_results_across_reload() {
    let dir = tempdir().unwrap();
    let store = IndexStore::new(dir.path().join("issues.idx"));
    let handle = IndexHandle::default();
    IndexingPipeline::new(&handle).ingest(corpus()).unwrap();
    handle.remove_document(0).unwrap();
    handle.remove_document(2).unwrap();
    let before: Vec<_> = QUERIES.iter().map(|q| handle.search(q, 10).unwrap()).collect();

    assert!(handle.compact() > 0);
    handle.flush(&store).unwrap();
    let reloaded = IndexHandle::open(&store, IndexSettings::default()).unwrap();
    let after: Vec<_> = QUERIES.iter().map(|q| reloaded.search(q, 10).unwrap()).collect();
    assert_eq!(before, after);
    assert_eq!(reloaded.stats().deleted_documents, 0);
    assert_eq!(reloaded.add_document(InputDoc::new("new", "doc", "loc")).unwrap(), 5);
}
