use crate::embeddings::Embedder;
use crate::error::{Result, SearchError};
use crate::index::{IndexDocument, SearchIndex};
use apiview_protocol::{current_unix_ms, Example, Guideline, Memory};
use apiview_store::{ContainerName, DocumentStore, Record};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The three indices backing retrieval.
#[derive(Clone)]
pub struct IndexSet {
    pub guidelines: Arc<dyn SearchIndex>,
    pub examples: Arc<dyn SearchIndex>,
    pub memories: Arc<dyn SearchIndex>,
}

impl IndexSet {
    pub fn get(&self, container: ContainerName) -> Option<&Arc<dyn SearchIndex>> {
        match container {
            ContainerName::Guidelines => Some(&self.guidelines),
            ContainerName::Examples => Some(&self.examples),
            ContainerName::Memories => Some(&self.memories),
            ContainerName::ReviewJobs | ContainerName::Settings => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexerState {
    Idle,
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub state: IndexerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            state: IndexerState::Idle,
            last_run_unix_ms: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerReport {
    pub container: String,
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Text used to embed and keyword-match a stored record.
pub trait Indexable: Record {
    fn language(&self) -> &str;

    fn search_text(&self) -> String;
}

impl Indexable for Guideline {
    fn language(&self) -> &str {
        &self.language
    }

    fn search_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.category, self.text)
    }
}

impl Indexable for Example {
    fn language(&self) -> &str {
        &self.language
    }

    fn search_text(&self) -> String {
        let mut parts = vec![self.comment.as_str()];
        if let Some(bad) = &self.bad_code {
            parts.push(bad);
        }
        if let Some(good) = &self.good_code {
            parts.push(good);
        }
        parts.join("\n")
    }
}

impl Indexable for Memory {
    fn language(&self) -> &str {
        &self.language
    }

    fn search_text(&self) -> String {
        format!("{}\n{}", self.title, self.text)
    }
}

/// Mirrors document store containers into their search indices.
pub struct SearchIndexer {
    store: DocumentStore,
    indices: IndexSet,
    embedder: Arc<dyn Embedder>,
    status: std::sync::Mutex<HashMap<ContainerName, IndexerStatus>>,
    runs: Mutex<()>,
}

impl SearchIndexer {
    pub fn new(store: DocumentStore, indices: IndexSet, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            indices,
            embedder,
            status: std::sync::Mutex::new(HashMap::new()),
            runs: Mutex::new(()),
        }
    }

    pub fn indices(&self) -> &IndexSet {
        &self.indices
    }

    pub fn status(&self, container: ContainerName) -> IndexerStatus {
        self.status
            .lock()
            .map(|s| s.get(&container).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn set_status(&self, container: ContainerName, status: IndexerStatus) {
        if let Ok(mut guard) = self.status.lock() {
            guard.insert(container, status);
        }
    }

    /// Sync one container into its index.
    pub async fn run(&self, container: ContainerName) -> Result<IndexerReport> {
        let _serial = self.runs.lock().await;
        self.set_status(
            container,
            IndexerStatus {
                state: IndexerState::InProgress,
                last_run_unix_ms: Some(current_unix_ms()),
                error: None,
            },
        );

        let outcome = match container {
            ContainerName::Guidelines => self.sync::<Guideline>().await,
            ContainerName::Examples => self.sync::<Example>().await,
            ContainerName::Memories => self.sync::<Memory>().await,
            other => Err(SearchError::InvalidConfig(format!("{other} is not indexed"))),
        };

        let status = match &outcome {
            Ok(report) => {
                log::info!(
                    "indexed {container}: {} written, {} unchanged, {} removed",
                    report.indexed,
                    report.unchanged,
                    report.removed
                );
                IndexerStatus {
                    state: IndexerState::Success,
                    last_run_unix_ms: Some(current_unix_ms()),
                    error: None,
                }
            }
            Err(err) => {
                log::warn!("indexing {container} failed: {err}");
                IndexerStatus {
                    state: IndexerState::Failed,
                    last_run_unix_ms: Some(current_unix_ms()),
                    error: Some(err.to_string()),
                }
            }
        };
        self.set_status(container, status);
        outcome
    }

    pub async fn run_all(&self) -> Result<Vec<IndexerReport>> {
        let mut reports = Vec::new();
        for container in ContainerName::INDEXED {
            reports.push(self.run(container).await?);
        }
        Ok(reports)
    }

    /// Poll until the container's indexer is no longer in progress.
    pub async fn wait_for_idle(&self, container: ContainerName, poll: Duration) -> IndexerStatus {
        loop {
            let status = self.status(container);
            if status.state != IndexerState::InProgress {
                return status;
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn sync<T: Indexable>(&self) -> Result<IndexerReport> {
        let container = T::CONTAINER;
        let index = self
            .indices
            .get(container)
            .ok_or_else(|| SearchError::InvalidConfig(format!("no index for {container}")))?
            .clone();
        let index_name = index.name().to_string();
        let call = |err| SearchError::call(index_name.clone(), err);

        let docs = self.store.list_documents::<T>().await?;
        let mut live_ids = HashSet::new();
        let mut pending = Vec::new();
        let mut unchanged = 0usize;

        for doc in docs.iter().filter(|d| !d.is_deleted) {
            live_ids.insert(doc.id.clone());
            let text = doc.data.search_text();
            let language = doc.data.language().to_string();
            match index.get_document(&doc.id).await.map_err(call)? {
                Some(existing) if existing.text == text && existing.language == language => {
                    unchanged += 1;
                }
                _ => pending.push((doc.id.clone(), language, text)),
            }
        }

        let texts: Vec<String> = pending.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|err| SearchError::call(format!("embedder {}", self.embedder.id()), err))?;
        let indexed = pending.len();
        let batch = pending
            .into_iter()
            .zip(vectors)
            .map(|((id, language, text), vector)| IndexDocument {
                id,
                language,
                text,
                vector,
            })
            .collect();
        index.upsert(batch).await.map_err(call)?;

        let stale: Vec<String> = index
            .ids()
            .await
            .map_err(call)?
            .into_iter()
            .filter(|id| !live_ids.contains(id))
            .collect();
        let removed = index.remove(&stale).await.map_err(call)?;
        index.persist().await.map_err(call)?;

        Ok(IndexerReport {
            container: container.to_string(),
            indexed,
            unchanged,
            removed,
        })
    }
}
