use apiview_ingest::{
    export_guidelines, DirectorySource, IngestError, IngestSettings, Ingestor, Result as IngestResult,
    SyncOptions, UpstreamSource,
};
use apiview_prompt::{PromptRunner, RunnerSettings, ScriptedLlm};
use apiview_protocol::{CallError, Example, Guideline, Language};
use apiview_search::{local_indices, HashEmbedder, HybridFusion, SearchIndex, SearchIndexer};
use apiview_store::{
    ContainerName, DocumentStore, MemoryBackend, Precondition, RawDocument, StoreBackend,
    LAST_SYNCED_COMMIT_SETTING,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PYTHON_DESIGN: &str = r#"# Python Design

## Naming {#python-naming}

{% include requirement/MUST id="python-naming-methods" %} use snake_case for method names.

Bad:

```python
def GetThing(self): ...
```

{% include requirement/SHOULD id="python-naming-modules" %} keep module names short.
"#;

const GENERAL_INTRO: &str = "# Introduction\n\n## DO follow the language idioms {#general-idioms}\n\nConsistency first.\n";

const JAVA_DESIGN: &str = "# Java\n\n## MUST use builders {#java-builders}\n\nFor every client.\n";

/// Memory backend that counts every mutation.
#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    writes: AtomicUsize,
}

#[async_trait]
impl StoreBackend for CountingBackend {
    async fn read(&self, container: ContainerName, id: &str) -> apiview_store::Result<Option<RawDocument>> {
        self.inner.read(container, id).await
    }

    async fn list(&self, container: ContainerName) -> apiview_store::Result<Vec<RawDocument>> {
        self.inner.list(container).await
    }

    async fn write(
        &self,
        container: ContainerName,
        doc: RawDocument,
        precondition: Precondition,
    ) -> apiview_store::Result<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(container, doc, precondition).await
    }

    async fn remove(
        &self,
        container: ContainerName,
        id: &str,
        etag: Option<u64>,
    ) -> apiview_store::Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(container, id, etag).await
    }
}

struct Harness {
    corpus: TempDir,
    backend: Arc<CountingBackend>,
    store: DocumentStore,
    indexer: Arc<SearchIndexer>,
}

impl Harness {
    async fn new() -> Self {
        let corpus = TempDir::new().unwrap();
        let backend = Arc::new(CountingBackend::default());
        let store = DocumentStore::new(backend.clone());
        let indexer = Arc::new(SearchIndexer::new(
            store.clone(),
            local_indices(HybridFusion::default()),
            Arc::new(HashEmbedder::new(64)),
        ));
        let harness = Self {
            corpus,
            backend,
            store,
            indexer,
        };
        harness.write("docs/python/design.md", PYTHON_DESIGN).await;
        harness.write("docs/general/introduction.md", GENERAL_INTRO).await;
        harness.write("docs/java/design.md", JAVA_DESIGN).await;
        harness.write("README.md", "## DO not ingest me\n\nroot readme\n").await;
        harness
    }

    async fn write(&self, rel: &str, content: &str) {
        let path = self.corpus.path().join(rel);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, content).await.unwrap();
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.store.clone(),
            Arc::new(DirectorySource::new(self.corpus.path())),
            IngestSettings::default(),
        )
        .unwrap()
        .with_indexer(self.indexer.clone())
    }

    fn writes(&self) -> usize {
        self.backend.writes.load(Ordering::SeqCst)
    }

    async fn sync(&self, options: SyncOptions) -> apiview_ingest::SyncReport {
        self.ingestor()
            .sync(&options, &CancellationToken::new())
            .await
            .unwrap()
    }
}

const NAMING_ID: &str = "python_design=html=python-naming-methods";

#[tokio::test]
async fn first_sync_creates_records_and_reindexes() {
    let h = Harness::new().await;
    let report = h.sync(SyncOptions::default()).await;

    assert_eq!(report.errors, Vec::<String>::new());
    assert_eq!(
        report.files,
        vec![
            "docs/general/introduction.md".to_string(),
            "docs/java/design.md".to_string(),
            "docs/python/design.md".to_string(),
        ]
    );
    assert!(report.created.contains(&NAMING_ID.to_string()));
    assert!(report.created.contains(&format!("{NAMING_ID}-example-1")));
    assert!(report.pointer_advanced);
    assert!(report.reindexed);

    let stored: Guideline = h.store.get(NAMING_ID).await.unwrap().unwrap();
    assert_eq!(stored.language, "python");
    assert_eq!(stored.category, "Naming");
    assert_eq!(stored.source_path.as_deref(), Some("docs/python/design.md"));
    assert_eq!(stored.last_synced_commit, report.head);
    assert_eq!(stored.examples, vec![format!("{NAMING_ID}-example-1")]);

    let example: Example = h.store.get(&format!("{NAMING_ID}-example-1")).await.unwrap().unwrap();
    assert!(example.bad_code.is_some());

    assert_eq!(
        h.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await.unwrap(),
        Some(report.head.clone())
    );
    assert_eq!(h.indexer.indices().guidelines.len().await.unwrap(), 4);
    assert_eq!(h.indexer.indices().examples.len().await.unwrap(), 1);
}

#[tokio::test]
async fn second_sync_of_unchanged_corpus_performs_zero_writes() {
    let h = Harness::new().await;
    let first = h.sync(SyncOptions::default()).await;
    let before: Guideline = h.store.get(NAMING_ID).await.unwrap().unwrap();
    let writes_after_first = h.writes();

    let second = h.sync(SyncOptions::default()).await;
    assert_eq!(h.writes(), writes_after_first);
    assert_eq!(second.writes(), 0);
    assert_eq!(second.head, first.head);
    assert!(second.files.is_empty());
    assert!(!second.reindexed);

    let after: Guideline = h.store.get(NAMING_ID).await.unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn forced_resync_rewrites_nothing_when_hashes_match() {
    let h = Harness::new().await;
    h.sync(SyncOptions::default()).await;
    let writes = h.writes();

    let report = h
        .sync(SyncOptions {
            force: true,
            ..SyncOptions::default()
        })
        .await;
    assert_eq!(report.writes(), 0);
    assert_eq!(report.unchanged.len(), 5);
    // only the pointer setting is rewritten
    assert_eq!(h.writes(), writes + 1);
}

#[tokio::test]
async fn edits_update_and_removed_guidelines_are_soft_deleted() {
    let h = Harness::new().await;
    h.sync(SyncOptions::default()).await;
    h.store
        .update::<Guideline, _>(NAMING_ID, |g| {
            g.related_memories = vec!["memory-1".into()];
            Ok(())
        })
        .await
        .unwrap();

    let edited = PYTHON_DESIGN
        .replace("use snake_case for method names.", "use snake_case for all method names.")
        .replace(
            "{% include requirement/SHOULD id=\"python-naming-modules\" %} keep module names short.\n",
            "",
        );
    h.write("docs/python/design.md", &edited).await;

    let report = h.sync(SyncOptions::default()).await;
    assert_eq!(report.updated, vec![NAMING_ID.to_string()]);
    assert_eq!(report.deleted, vec!["python_design=html=python-naming-modules".to_string()]);
    assert_eq!(report.created, Vec::<String>::new());

    let updated: Guideline = h.store.get(NAMING_ID).await.unwrap().unwrap();
    assert_eq!(updated.title, "use snake_case for all method names.");
    assert_eq!(updated.related_memories, vec!["memory-1".to_string()]);

    let gone = h
        .store
        .get_document::<Guideline>("python_design=html=python-naming-modules")
        .await
        .unwrap()
        .unwrap();
    assert!(gone.is_deleted);
    assert!(h.store.get::<Guideline>("python_design=html=python-naming-modules").await.unwrap().is_none());
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let h = Harness::new().await;
    let report = h
        .sync(SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        })
        .await;
    assert_eq!(h.writes(), 0);
    assert_eq!(report.created.len(), 5);
    assert!(!report.pointer_advanced);
    assert!(h.store.get::<Guideline>(NAMING_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn language_filter_keeps_general_and_holds_the_pointer() {
    let h = Harness::new().await;
    let report = h
        .sync(SyncOptions {
            language_filter: Some(Language::Python),
            ..SyncOptions::default()
        })
        .await;
    assert_eq!(
        report.files,
        vec!["docs/general/introduction.md".to_string(), "docs/python/design.md".to_string()]
    );
    assert!(!report.pointer_advanced);
    assert!(h.store.get::<Guideline>("java_design=html=java-builders").await.unwrap().is_none());
    assert_eq!(h.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await.unwrap(), None);
}

/// Directory source whose reads of one path always fail.
struct FlakySource {
    inner: DirectorySource,
    broken: String,
}

#[async_trait]
impl UpstreamSource for FlakySource {
    fn id(&self) -> String {
        "flaky".into()
    }

    async fn head(&self) -> IngestResult<String> {
        self.inner.head().await
    }

    async fn changed_files(&self, from: &str, to: &str) -> IngestResult<Vec<String>> {
        self.inner.changed_files(from, to).await
    }

    async fn list_files(&self, rev: &str) -> IngestResult<Vec<String>> {
        self.inner.list_files(rev).await
    }

    async fn read_file(&self, rev: &str, path: &str) -> IngestResult<Option<String>> {
        if path == self.broken {
            return Err(IngestError::upstream("flaky", CallError::Permanent("HTTP 500".into())));
        }
        self.inner.read_file(rev, path).await
    }
}

#[tokio::test]
async fn failed_file_is_isolated_and_blocks_the_pointer() {
    let h = Harness::new().await;
    let ingestor = Ingestor::new(
        h.store.clone(),
        Arc::new(FlakySource {
            inner: DirectorySource::new(h.corpus.path()),
            broken: "docs/java/design.md".into(),
        }),
        IngestSettings::default(),
    )
    .unwrap();

    let report = ingestor
        .sync(&SyncOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("docs/java/design.md: "));
    assert!(report.created.contains(&NAMING_ID.to_string()));
    assert!(!report.pointer_advanced);
    assert_eq!(h.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await.unwrap(), None);
}

#[tokio::test]
async fn cancelled_sync_returns_cancelled() {
    let h = Harness::new().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .ingestor()
        .sync(&SyncOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), apiview_protocol::ErrorKind::Cancelled);
    assert_eq!(h.writes(), 0);
}

fn prompts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../prompts")
}

#[tokio::test]
async fn llm_extraction_rewrites_text_but_keeps_parsed_hashes() {
    let h = Harness::new().await;
    let llm = ScriptedLlm::new().on("extract_guideline", |request| {
        let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if user.contains("module names") {
            return Err(CallError::Permanent("HTTP 400".into()));
        }
        Ok(json!({"title": "Use snake_case method names", "text": "Methods are snake_case."}).to_string())
    });
    let runner = PromptRunner::new(
        Arc::new(llm),
        RunnerSettings {
            prompts_dir: prompts_dir(),
            ..RunnerSettings::default()
        },
    );
    let ingestor = Ingestor::new(
        h.store.clone(),
        Arc::new(DirectorySource::new(h.corpus.path())),
        IngestSettings {
            llm_extraction: true,
            ..IngestSettings::default()
        },
    )
    .unwrap()
    .with_runner(Arc::new(runner));

    ingestor
        .sync(&SyncOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let naming: Guideline = h.store.get(NAMING_ID).await.unwrap().unwrap();
    assert_eq!(naming.title, "Use snake_case method names");
    let modules: Guideline = h
        .store
        .get("python_design=html=python-naming-modules")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(modules.title, "keep module names short.");

    // a forced resync compares parsed hashes, so nothing changes
    let again = ingestor
        .sync(
            &SyncOptions {
                force: true,
                ..SyncOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(again.writes(), 0);
}

#[tokio::test]
async fn export_renders_language_and_general_guidelines() {
    let h = Harness::new().await;
    h.sync(SyncOptions::default()).await;

    let layout = export_guidelines(&h.store, Language::Python).await.unwrap();
    let ids: Vec<&str> = layout.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "general_introduction=html=general-idioms",
            NAMING_ID,
            "python_design=html=python-naming-modules",
        ]
    );
    let naming = &layout[1];
    assert_eq!(naming.examples.len(), 1);
    assert!(naming.examples[0].bad_code.is_some());
    assert_eq!(naming.language, "python");
}
