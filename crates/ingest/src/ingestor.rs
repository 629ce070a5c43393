use crate::canonical::guideline_hash;
use crate::error::{IngestError, Result};
use crate::markdown::{GuidelineParser, ParsedGuideline};
use crate::source::UpstreamSource;
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::{ErrorKind, Example, Guideline, Language, GENERAL_LANGUAGE};
use apiview_search::SearchIndexer;
use apiview_store::{ContainerName, DocumentStore, LAST_SYNCED_COMMIT_SETTING};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const EXTRACT_PROMPT: &str = "extract_guideline";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Repository-relative folder holding `<language>/<file>.md`.
    pub guidelines_prefix: String,
    /// Let the model rewrite parsed titles and text before storing them.
    pub llm_extraction: bool,
    pub prompt_folder: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            guidelines_prefix: "docs/".to_string(),
            llm_extraction: false,
            prompt_folder: apiview_prompt::API_REVIEW_FOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Report what would change without writing.
    pub dry_run: bool,
    /// Ignore the stored pointer and process every corpus file.
    pub force: bool,
    /// Only this language's folder (plus `general/`).
    pub language_filter: Option<Language>,
}

/// Record ids touched by one sync, guidelines and examples alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub head: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub files: Vec<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub reindexed: bool,
    pub pointer_advanced: bool,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Sync complete: {} created, {} updated, {} deleted, {} unchanged, {} errors",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len(),
            self.errors.len()
        )
    }
}

/// Syncs the upstream guideline corpus into the document store.
pub struct Ingestor {
    store: DocumentStore,
    source: Arc<dyn UpstreamSource>,
    parser: GuidelineParser,
    indexer: Option<Arc<SearchIndexer>>,
    runner: Option<Arc<PromptRunner>>,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(
        store: DocumentStore,
        source: Arc<dyn UpstreamSource>,
        settings: IngestSettings,
    ) -> Result<Self> {
        let parser = GuidelineParser::new(settings.guidelines_prefix.clone())
            .map_err(|e| IngestError::Other(format!("guideline patterns: {e}")))?;
        Ok(Self {
            store,
            source,
            parser,
            indexer: None,
            runner: None,
            settings,
        })
    }

    /// Reindex guidelines and examples after a sync that wrote anything.
    pub fn with_indexer(mut self, indexer: Arc<SearchIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Runner for the `extract_guideline` prompt; only used with `llm_extraction`.
    pub fn with_runner(mut self, runner: Arc<PromptRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub async fn sync(&self, options: &SyncOptions, cancel: &CancellationToken) -> Result<SyncReport> {
        let head = cancellable(cancel, self.source.head()).await?;
        let previous = self.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await?;
        let mut report = SyncReport {
            head: head.clone(),
            previous: previous.clone(),
            dry_run: options.dry_run,
            ..SyncReport::default()
        };

        log::info!(
            "guideline sync from {}: head {head}, last synced {}",
            self.source.id(),
            previous.as_deref().unwrap_or("(none)")
        );
        if !options.force && previous.as_deref() == Some(head.as_str()) {
            log::info!("guidelines already synced at {head}");
            return Ok(report);
        }

        let files = self
            .files_to_process(options, previous.as_deref(), &head, cancel)
            .await?;
        log::info!("{} guideline files to process", files.len());

        let mut failed_files = 0usize;
        for path in &files {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            match self.sync_file(path, &head, options, &mut report, cancel).await {
                Ok(()) => report.files.push(path.clone()),
                Err(err) if err.kind() == ErrorKind::Cancelled => return Err(err),
                Err(err) => {
                    log::warn!("guideline file {path} failed: {err}");
                    report.errors.push(format!("{path}: {err}"));
                    failed_files += 1;
                }
            }
        }

        if options.dry_run {
            log::info!("dry run: {}", report.summary());
            return Ok(report);
        }

        if report.writes() > 0 {
            if let Some(indexer) = &self.indexer {
                for container in [ContainerName::Guidelines, ContainerName::Examples] {
                    if let Err(err) = indexer.run(container).await {
                        report.errors.push(format!("indexer {container}: {err}"));
                    }
                }
                report.reindexed = true;
            }
        }

        // a filtered run has not looked at every changed file
        if failed_files == 0 && options.language_filter.is_none() {
            self.store.put_setting(LAST_SYNCED_COMMIT_SETTING, &head).await?;
            report.pointer_advanced = true;
        } else {
            log::info!("sync pointer left at {}", previous.as_deref().unwrap_or("(none)"));
        }

        log::info!("{}", report.summary());
        Ok(report)
    }

    async fn files_to_process(
        &self,
        options: &SyncOptions,
        previous: Option<&str>,
        head: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let listed = match previous.filter(|_| !options.force) {
            Some(prev) => match cancellable(cancel, self.source.changed_files(prev, head)).await {
                Ok(files) => files,
                Err(err) if err.kind() == ErrorKind::Cancelled => return Err(err),
                Err(err) => {
                    log::warn!("cannot diff {prev}..{head} ({err}); falling back to a full sync");
                    cancellable(cancel, self.source.list_files(head)).await?
                }
            },
            None => cancellable(cancel, self.source.list_files(head)).await?,
        };

        let mut files: Vec<String> = listed
            .into_iter()
            .filter(|path| match self.parser.language_for(path) {
                Some(language) => match options.language_filter {
                    Some(filter) => language == filter.as_str() || language == GENERAL_LANGUAGE,
                    None => true,
                },
                None => false,
            })
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn sync_file(
        &self,
        path: &str,
        head: &str,
        options: &SyncOptions,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let content = cancellable(cancel, self.source.read_file(head, path))
            .await?
            .unwrap_or_default();
        let (language, parsed) = self
            .parser
            .parse(path, &content)
            .map(|file| (file.language, file.guidelines))
            .unwrap_or_default();

        let stored_guidelines = self
            .store
            .query::<Guideline>(|g| g.source_path.as_deref() == Some(path))
            .await?;
        let stored_examples = self.store.list::<Example>().await?;
        let dry = DryRun(options.dry_run);

        let mut seen = BTreeSet::new();
        for guideline in parsed {
            seen.insert(guideline.id.clone());
            self.sync_examples(&guideline, &stored_examples, report, &dry)
                .await?;
            self.sync_guideline(guideline, &language, path, head, report, &dry, cancel)
                .await?;
        }

        for stale in stored_guidelines.iter().filter(|g| !seen.contains(&g.id)) {
            for example in owned_examples(&stale.id, &stored_examples) {
                if dry.soft_delete(&self.store, ContainerName::Examples, &example.id).await? {
                    report.deleted.push(example.id.clone());
                }
            }
            if dry.soft_delete(&self.store, ContainerName::Guidelines, &stale.id).await? {
                report.deleted.push(stale.id.clone());
            }
        }
        Ok(())
    }

    async fn sync_examples(
        &self,
        guideline: &ParsedGuideline,
        stored: &[Example],
        report: &mut SyncReport,
        dry: &DryRun,
    ) -> Result<()> {
        let current: BTreeSet<&str> = guideline.examples.iter().map(|e| e.id.as_str()).collect();
        for example in &guideline.examples {
            let existing = stored.iter().find(|e| e.id == example.id);
            match existing {
                Some(old) if old.content_hash == example.content_hash => {
                    report.unchanged.push(example.id.clone());
                }
                Some(old) => {
                    let mut next = example.clone();
                    next.memory_ids = old.memory_ids.clone();
                    dry.upsert(&self.store, &next).await?;
                    report.updated.push(next.id);
                }
                None => {
                    dry.upsert(&self.store, example).await?;
                    report.created.push(example.id.clone());
                }
            }
        }
        for stale in owned_examples(&guideline.id, stored).filter(|e| !current.contains(e.id.as_str())) {
            if dry.soft_delete(&self.store, ContainerName::Examples, &stale.id).await? {
                report.deleted.push(stale.id.clone());
            }
        }
        Ok(())
    }

    async fn sync_guideline(
        &self,
        parsed: ParsedGuideline,
        language: &str,
        path: &str,
        head: &str,
        report: &mut SyncReport,
        dry: &DryRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let example_ids = parsed.example_ids();
        let content_hash = guideline_hash(&parsed.title, &parsed.text, &example_ids);
        let existing = self.store.get::<Guideline>(&parsed.id).await?;
        if existing.as_ref().is_some_and(|g| g.content_hash == content_hash) {
            report.unchanged.push(parsed.id);
            return Ok(());
        }

        let (title, text) = if dry.0 {
            (parsed.title.clone(), parsed.text.clone())
        } else {
            self.extract(language, &parsed, cancel).await?
        };

        let mut record = Guideline {
            id: parsed.id.clone(),
            language: language.to_string(),
            title,
            text,
            category: parsed.category,
            requirement: parsed.requirement,
            examples: example_ids,
            content_hash,
            last_synced_commit: head.to_string(),
            source_path: Some(path.to_string()),
            related_guidelines: Vec::new(),
            related_memories: Vec::new(),
            tags: Vec::new(),
        };
        match existing {
            Some(old) => {
                record.related_guidelines = old.related_guidelines;
                record.related_memories = old.related_memories;
                record.tags = old.tags;
                dry.upsert(&self.store, &record).await?;
                report.updated.push(record.id);
            }
            None => {
                dry.upsert(&self.store, &record).await?;
                report.created.push(record.id);
            }
        }
        Ok(())
    }

    /// Title and text to store; the parsed values when extraction is off or fails.
    async fn extract(
        &self,
        language: &str,
        parsed: &ParsedGuideline,
        cancel: &CancellationToken,
    ) -> Result<(String, String)> {
        let fallback = (parsed.title.clone(), parsed.text.clone());
        let Some(runner) = self.runner.as_ref().filter(|_| self.settings.llm_extraction) else {
            return Ok(fallback);
        };

        let display = language
            .parse::<Language>()
            .map(|l| l.display_name().to_string())
            .unwrap_or_else(|_| "all languages".to_string());
        let mut inputs = PromptInputs::new();
        inputs.insert("language".into(), display);
        inputs.insert("title".into(), parsed.title.clone());
        inputs.insert("text".into(), parsed.text.clone());

        let scope = CallScope::new(cancel.clone());
        match runner
            .run_json(&self.settings.prompt_folder, EXTRACT_PROMPT, &inputs, &scope)
            .await
        {
            Ok(reply) => {
                let field = |name: &str| {
                    reply
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                Ok((
                    field("title").unwrap_or(fallback.0),
                    field("text").unwrap_or(fallback.1),
                ))
            }
            Err(err) if err.is_cancelled() => Err(IngestError::Cancelled),
            Err(err) => {
                log::warn!("extraction of {} failed, keeping parsed text: {err}", parsed.id);
                Ok(fallback)
            }
        }
    }
}

/// Gate for every store write during a sync.
struct DryRun(bool);

impl DryRun {
    async fn upsert<T: apiview_store::Record>(&self, store: &DocumentStore, record: &T) -> Result<()> {
        if !self.0 {
            store.upsert(record).await?;
        }
        Ok(())
    }

    /// Whether the row was (or would be) flagged.
    async fn soft_delete(&self, store: &DocumentStore, container: ContainerName, id: &str) -> Result<bool> {
        if self.0 {
            return Ok(store.get_raw(container, id).await?.is_some_and(|d| !d.is_deleted));
        }
        Ok(store.soft_delete(container, id).await?)
    }
}

fn owned_examples<'a>(guideline_id: &'a str, stored: &'a [Example]) -> impl Iterator<Item = &'a Example> + 'a {
    let prefix = format!("{guideline_id}-example-");
    stored
        .iter()
        .filter(move |e| e.id.starts_with(&prefix) && e.guideline_ids.iter().any(|g| g == guideline_id))
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        result = fut => result,
    }
}
