use crate::context::Context;
use crate::embeddings::Embedder;
use crate::error::{Result, SearchError};
use crate::index::{Hit, IndexQuery, SearchIndex};
use crate::indexer::IndexSet;
use apiview_protocol::retry::guarded;
use apiview_protocol::{CallError, Example, Guideline, Language, Memory, RetryPolicy};
use apiview_store::{DocumentStore, Record};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub top_k: usize,
    /// Per-call deadline for index and embedding calls
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on records pulled in by `build_context`
    pub max_context_items: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            timeout: Duration::from_millis(10_000),
            retry: RetryPolicy::default(),
            max_context_items: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    pub record: T,
    pub score: f32,
}

/// Ranked records from one index, plus the failure that emptied it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieved<T> {
    pub hits: Vec<Scored<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl<T> Retrieved<T> {
    fn failed(reason: String) -> Self {
        Self {
            hits: Vec::new(),
            failure: Some(reason),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.hits.iter().map(|h| &h.record)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub guidelines: Vec<Scored<Guideline>>,
    pub examples: Vec<Scored<Example>>,
    pub memories: Vec<Scored<Memory>>,
    /// Names of indices (or the embedder) that failed permanently
    #[serde(default)]
    pub failures: Vec<String>,
}

impl SearchResults {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.guidelines.len() + self.examples.len() + self.memories.len()
    }
}

/// Retrieval over the guideline, example and memory indices.
#[derive(Clone)]
pub struct SearchManager {
    store: DocumentStore,
    indices: IndexSet,
    embedder: Arc<dyn Embedder>,
    settings: SearchSettings,
}

impl SearchManager {
    pub fn new(
        store: DocumentStore,
        indices: IndexSet,
        embedder: Arc<dyn Embedder>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            indices,
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub async fn search_guidelines(
        &self,
        query: &str,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<Retrieved<Guideline>> {
        let q = self.prepare(query, language, cancel).await?;
        self.query_index(&self.indices.guidelines, &q.0, cancel).await
    }

    pub async fn search_examples(
        &self,
        query: &str,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<Retrieved<Example>> {
        let q = self.prepare(query, language, cancel).await?;
        self.query_index(&self.indices.examples, &q.0, cancel).await
    }

    pub async fn search_memories(
        &self,
        query: &str,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<Retrieved<Memory>> {
        let q = self.prepare(query, language, cancel).await?;
        self.query_index(&self.indices.memories, &q.0, cancel).await
    }

    /// Query all three indices concurrently. Only cancellation is an error;
    /// index failures are recorded in `SearchResults::failures`.
    pub async fn search_all(
        &self,
        query: &str,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<SearchResults> {
        let (q, embed_failure) = self.prepare(query, language, cancel).await?;
        let (guidelines, examples, memories) = futures::join!(
            self.query_index::<Guideline>(&self.indices.guidelines, &q, cancel),
            self.query_index::<Example>(&self.indices.examples, &q, cancel),
            self.query_index::<Memory>(&self.indices.memories, &q, cancel),
        );
        let (guidelines, examples, memories) = (guidelines?, examples?, memories?);

        let mut failures: Vec<String> = embed_failure.into_iter().collect();
        failures.extend(guidelines.failure.clone());
        failures.extend(examples.failure.clone());
        failures.extend(memories.failure.clone());

        Ok(SearchResults {
            guidelines: guidelines.hits,
            examples: examples.hits,
            memories: memories.hits,
            failures,
        })
    }

    /// Fetch records directly by id, whichever container holds them.
    pub async fn search_all_by_id(&self, ids: &[String]) -> Result<SearchResults> {
        let mut results = SearchResults::default();
        for id in ids {
            if let Some(g) = self.store.get::<Guideline>(id).await? {
                results.guidelines.push(Scored { record: g, score: 1.0 });
            } else if let Some(e) = self.store.get::<Example>(id).await? {
                results.examples.push(Scored { record: e, score: 1.0 });
            } else if let Some(m) = self.store.get::<Memory>(id).await? {
                results.memories.push(Scored { record: m, score: 1.0 });
            }
        }
        Ok(results)
    }

    /// Resolve every link reachable from `results` and bundle the records.
    pub async fn build_context(&self, results: &SearchResults) -> Result<Context> {
        let mut ctx = Context::default();
        let mut seen: HashSet<(Kind, String)> = HashSet::new();
        let mut queue: VecDeque<(Kind, String)> = VecDeque::new();

        for g in results.guidelines.iter().map(|s| &s.record) {
            if seen.insert((Kind::Guideline, g.id.clone())) {
                enqueue_guideline_links(&mut queue, g);
                ctx.guidelines.push(g.clone());
            }
        }
        for e in results.examples.iter().map(|s| &s.record) {
            if seen.insert((Kind::Example, e.id.clone())) {
                enqueue_example_links(&mut queue, e);
                ctx.examples.push(e.clone());
            }
        }
        for m in results.memories.iter().map(|s| &s.record) {
            if seen.insert((Kind::Memory, m.id.clone())) {
                enqueue_memory_links(&mut queue, m);
                ctx.memories.push(m.clone());
            }
        }

        while let Some((kind, id)) = queue.pop_front() {
            if !seen.insert((kind, id.clone())) {
                continue;
            }
            let total = ctx.guidelines.len() + ctx.examples.len() + ctx.memories.len();
            if total >= self.settings.max_context_items {
                log::debug!("context item cap reached; {} links left unresolved", queue.len() + 1);
                break;
            }
            match kind {
                Kind::Guideline => match self.store.get::<Guideline>(&id).await? {
                    Some(g) => {
                        enqueue_guideline_links(&mut queue, &g);
                        ctx.guidelines.push(g);
                    }
                    None => ctx.unresolved.push(id),
                },
                Kind::Example => match self.store.get::<Example>(&id).await? {
                    Some(e) => {
                        enqueue_example_links(&mut queue, &e);
                        ctx.examples.push(e);
                    }
                    None => ctx.unresolved.push(id),
                },
                Kind::Memory => match self.store.get::<Memory>(&id).await? {
                    Some(m) => {
                        enqueue_memory_links(&mut queue, &m);
                        ctx.memories.push(m);
                    }
                    None => ctx.unresolved.push(id),
                },
            }
        }
        Ok(ctx)
    }

    async fn prepare(
        &self,
        query: &str,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<(IndexQuery, Option<String>)> {
        let texts = vec![query.to_string()];
        let embedded = self
            .settings
            .retry
            .run("embed query", cancel, |_| {
                guarded(self.settings.timeout, cancel, self.embedder.embed(&texts))
            })
            .await;

        let (vector, failure) = match embedded {
            Ok(mut vectors) => (vectors.pop(), None),
            Err(CallError::Cancelled) => {
                return Err(SearchError::call("embedder", CallError::Cancelled))
            }
            Err(err) => {
                log::warn!("query embedding failed, falling back to keyword search: {err}");
                (None, Some(format!("embedder: {err}")))
            }
        };

        Ok((
            IndexQuery {
                text: query.to_string(),
                vector,
                language,
                top_k: self.settings.top_k,
            },
            failure,
        ))
    }

    async fn query_index<T: Record>(
        &self,
        index: &Arc<dyn SearchIndex>,
        query: &IndexQuery,
        cancel: &CancellationToken,
    ) -> Result<Retrieved<T>> {
        let name = index.name().to_string();
        let hits: Vec<Hit> = match self
            .settings
            .retry
            .run(&format!("search {name}"), cancel, |_| {
                guarded(self.settings.timeout, cancel, index.search(query))
            })
            .await
        {
            Ok(hits) => hits,
            Err(CallError::Cancelled) => return Err(SearchError::call(name, CallError::Cancelled)),
            Err(err) => {
                log::warn!("index {name} unavailable, continuing without it: {err}");
                return Ok(Retrieved::failed(format!("{name}: {err}")));
            }
        };

        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get::<T>(&hit.id).await {
                Ok(Some(record)) => scored.push(Scored {
                    record,
                    score: hit.score,
                }),
                Ok(None) => log::debug!("index {name} returned {} which is not live in the store", hit.id),
                Err(err) => {
                    log::warn!("loading {} from store failed: {err}", hit.id);
                    return Ok(Retrieved::failed(format!("{name}: {err}")));
                }
            }
        }
        Ok(Retrieved {
            hits: scored,
            failure: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Guideline,
    Example,
    Memory,
}

fn enqueue_guideline_links(queue: &mut VecDeque<(Kind, String)>, g: &Guideline) {
    queue.extend(g.examples.iter().map(|id| (Kind::Example, id.clone())));
    queue.extend(g.related_guidelines.iter().map(|id| (Kind::Guideline, id.clone())));
    queue.extend(g.related_memories.iter().map(|id| (Kind::Memory, id.clone())));
}

fn enqueue_example_links(queue: &mut VecDeque<(Kind, String)>, e: &Example) {
    queue.extend(e.guideline_ids.iter().map(|id| (Kind::Guideline, id.clone())));
    queue.extend(e.memory_ids.iter().map(|id| (Kind::Memory, id.clone())));
}

fn enqueue_memory_links(queue: &mut VecDeque<(Kind, String)>, m: &Memory) {
    queue.extend(m.related_guideline_ids.iter().map(|id| (Kind::Guideline, id.clone())));
    queue.extend(m.related_example_ids.iter().map(|id| (Kind::Example, id.clone())));
}
