use crate::config::{CopilotConfig, EmbeddingMode, LlmMode, SourceKind};
use crate::error::{Result, ServiceError};
use crate::gc::GarbageCollector;
use crate::jobs::JobManager;
use crate::memory::{RecordMemoryWorkflow, RECORD_MEMORY_ACTION};
use apiview_ingest::{DirectorySource, GitCheckoutSource, GithubSource, Ingestor, UpstreamSource};
use apiview_prompt::{LlmClient, OpenAiClient, PromptRunner, StubLlm};
use apiview_review::{EngineMetrics, MentionDispatcher, ReviewEngine, WorkflowRegistry};
use apiview_search::{open_local_indices, Embedder, HashEmbedder, HttpEmbedder, IndexSet, SearchIndexer, SearchManager};
use apiview_store::{DocumentStore, LAST_SYNCED_COMMIT_SETTING};
use std::sync::Arc;

/// Everything a command or request handler needs, built once per process.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: CopilotConfig,
    pub store: DocumentStore,
    pub indexer: Arc<SearchIndexer>,
    pub search: SearchManager,
    pub runner: Arc<PromptRunner>,
    pub engine: ReviewEngine,
    pub jobs: JobManager,
    pub dispatcher: Arc<MentionDispatcher>,
    embedder_id: String,
}

impl ServiceContext {
    /// File-backed store and indices under `paths.data_dir`, clients per config.
    pub async fn open(config: CopilotConfig) -> Result<Self> {
        config.validate().map_err(ServiceError::Config)?;
        let store = DocumentStore::open(config.paths.store_dir());
        let indices = open_local_indices(&config.paths.index_dir(), config.fusion()).await?;
        let embedder = embedder_for(&config);
        let llm = llm_for(&config);
        Self::build(config, store, indices, embedder, llm).await
    }

    /// Assemble a context from explicit parts.
    pub async fn build(
        config: CopilotConfig,
        store: DocumentStore,
        indices: IndexSet,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        config.validate().map_err(ServiceError::Config)?;
        let embedder_id = embedder.id();
        let indexer = Arc::new(SearchIndexer::new(store.clone(), indices.clone(), Arc::clone(&embedder)));
        let search = SearchManager::new(store.clone(), indices, embedder, config.search_settings());
        let runner = Arc::new(PromptRunner::new(llm, config.runner_settings()));
        let review_settings = config.review_settings();
        let engine = ReviewEngine::new(
            search.clone(),
            Arc::clone(&runner),
            EngineMetrics::new()?,
            review_settings.clone(),
        )?;
        let jobs = JobManager::new(store.clone(), engine.clone(), config.retention_seconds);

        let mut registry = WorkflowRegistry::new();
        registry.register(
            RECORD_MEMORY_ACTION,
            Arc::new(RecordMemoryWorkflow::new(store.clone(), Arc::clone(&indexer))),
        );
        let dispatcher = Arc::new(MentionDispatcher::new(
            Arc::clone(&runner),
            registry,
            review_settings.prompt_folder,
        ));

        let context = Self {
            config,
            store,
            indexer,
            search,
            runner,
            engine,
            jobs,
            dispatcher,
            embedder_id,
        };
        context.seed_sync_pointer().await?;
        Ok(context)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.engine.metrics()
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(self.store.clone(), Arc::clone(&self.indexer))
    }

    /// Ingestor over the configured upstream repository.
    pub fn ingestor(&self) -> Result<Ingestor> {
        let ingest = &self.config.ingest;
        let repository = ingest
            .repository
            .as_deref()
            .ok_or_else(|| ServiceError::config("ingest.repository is not set"))?;
        let source: Arc<dyn UpstreamSource> = match ingest.source {
            SourceKind::Git => Arc::new(GitCheckoutSource::new(repository).with_rev(ingest.branch.clone())),
            SourceKind::Github => {
                let token = std::env::var(&ingest.token_env).ok().filter(|t| !t.trim().is_empty());
                Arc::new(GithubSource::new(repository, ingest.branch.clone(), token)?)
            }
            SourceKind::Dir => Arc::new(DirectorySource::new(repository)),
        };
        self.ingestor_with(source)
    }

    pub fn ingestor_with(&self, source: Arc<dyn UpstreamSource>) -> Result<Ingestor> {
        Ok(Ingestor::new(self.store.clone(), source, self.config.ingest_settings())?
            .with_indexer(Arc::clone(&self.indexer))
            .with_runner(Arc::clone(&self.runner)))
    }

    /// A configured `last_synced_commit_sha` only applies to a store that has
    /// never synced.
    async fn seed_sync_pointer(&self) -> Result<()> {
        let Some(sha) = self.config.last_synced_commit_sha.as_deref() else {
            return Ok(());
        };
        if self.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await?.is_none() {
            log::info!("seeding ingestion pointer at {sha}");
            self.store.put_setting(LAST_SYNCED_COMMIT_SETTING, sha).await?;
        }
        Ok(())
    }
}

fn embedder_for(config: &CopilotConfig) -> Arc<dyn Embedder> {
    let dimension = config.search.embedding_dimension;
    match config.search.embedding {
        EmbeddingMode::Hash => Arc::new(HashEmbedder::new(dimension)),
        EmbeddingMode::Http => Arc::new(HttpEmbedder::new(
            config
                .search
                .embedding_endpoint
                .clone()
                .unwrap_or_else(|| config.llm.endpoint.clone()),
            config.search.embedding_model.clone(),
            config.api_key(),
            dimension,
        )),
    }
}

fn llm_for(config: &CopilotConfig) -> Arc<dyn LlmClient> {
    match config.llm.mode {
        LlmMode::Stub => Arc::new(StubLlm::new()),
        LlmMode::OpenAi => {
            let key = config.api_key();
            if key.is_none() {
                log::warn!("{} is not set; LLM calls go out unauthenticated", config.llm.api_key_env);
            }
            Arc::new(OpenAiClient::new(config.llm.endpoint.clone(), config.llm.model.clone(), key))
        }
    }
}
