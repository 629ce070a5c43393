use crate::embeddings::cosine;
use crate::fusion::{sort_hits, HybridFusion};
use crate::tokenize::tokenize;
use apiview_protocol::{CallError, Language};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Row held by a search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub language: String,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    pub text: String,
    /// Absent when the query could not be embedded; ranking is keyword-only.
    pub vector: Option<Vec<f32>>,
    pub language: Option<Language>,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
}

/// A searchable view over one container.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &IndexQuery) -> Result<Vec<Hit>, CallError>;

    async fn get_document(&self, id: &str) -> Result<Option<IndexDocument>, CallError>;

    async fn upsert(&self, docs: Vec<IndexDocument>) -> Result<(), CallError>;

    /// Returns how many of `ids` were present.
    async fn remove(&self, ids: &[String]) -> Result<usize, CallError>;

    async fn ids(&self) -> Result<Vec<String>, CallError>;

    async fn len(&self) -> Result<usize, CallError>;

    /// Flush to durable storage, if any.
    async fn persist(&self) -> Result<(), CallError> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    name: String,
    documents: Vec<IndexDocument>,
}

/// In-process hybrid index: brute-force cosine plus Okapi BM25.
pub struct LocalIndex {
    name: String,
    fusion: HybridFusion,
    docs: RwLock<BTreeMap<String, IndexedDoc>>,
    path: Option<PathBuf>,
}

struct IndexedDoc {
    doc: IndexDocument,
    term_freq: HashMap<String, u32>,
    len: usize,
}

impl IndexedDoc {
    fn new(doc: IndexDocument) -> Self {
        let tokens = tokenize(&doc.text);
        let len = tokens.len();
        let mut term_freq = HashMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0) += 1;
        }
        Self {
            doc,
            term_freq,
            len,
        }
    }
}

impl LocalIndex {
    pub fn new(name: impl Into<String>, fusion: HybridFusion) -> Self {
        Self {
            name: name.into(),
            fusion,
            docs: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Index backed by a JSON file; existing content is loaded.
    pub async fn open(
        name: impl Into<String>,
        fusion: HybridFusion,
        path: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let mut index = Self::new(name, fusion);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let persisted: PersistedIndex = serde_json::from_slice(&bytes)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
                let docs = persisted
                    .documents
                    .into_iter()
                    .map(|d| (d.id.clone(), IndexedDoc::new(d)))
                    .collect();
                index.docs = RwLock::new(docs);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        index.path = Some(path);
        Ok(index)
    }

    fn keyword_scores(
        docs: &BTreeMap<String, IndexedDoc>,
        candidates: &[&IndexedDoc],
        query_terms: &[String],
    ) -> Vec<(String, f32)> {
        let total = docs.len() as f32;
        let avg_len = if docs.is_empty() {
            1.0
        } else {
            (docs.values().map(|d| d.len).sum::<usize>() as f32 / total).max(1.0)
        };
        let unique_terms: HashSet<&String> = query_terms.iter().collect();
        let idf: HashMap<&String, f32> = unique_terms
            .iter()
            .map(|term| {
                let df = docs.values().filter(|d| d.term_freq.contains_key(*term)).count() as f32;
                (*term, ((total - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        candidates
            .iter()
            .filter_map(|d| {
                let mut score = 0.0f32;
                for term in &unique_terms {
                    let Some(&tf) = d.term_freq.get(*term) else {
                        continue;
                    };
                    let tf = tf as f32;
                    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * d.len as f32 / avg_len);
                    score += idf[term] * tf * (BM25_K1 + 1.0) / (tf + norm);
                }
                (score > 0.0).then(|| (d.doc.id.clone(), score))
            })
            .collect()
    }
}

#[async_trait]
impl SearchIndex for LocalIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &IndexQuery) -> Result<Vec<Hit>, CallError> {
        let docs = self.docs.read().await;
        let candidates: Vec<&IndexedDoc> = docs
            .values()
            .filter(|d| query.language.map_or(true, |lang| lang.accepts(&d.doc.language)))
            .collect();
        if candidates.is_empty() || query.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector_scores: Vec<(String, f32)> = match &query.vector {
            Some(vector) => candidates
                .iter()
                .map(|d| (d.doc.id.clone(), cosine(vector, &d.doc.vector)))
                .filter(|(_, s)| *s > 0.0)
                .collect(),
            None => Vec::new(),
        };
        let terms = tokenize(&query.text);
        let keyword_scores = Self::keyword_scores(&docs, &candidates, &terms);

        let mut fused = self.fusion.fuse(&vector_scores, &keyword_scores);
        sort_hits(&mut fused);
        fused.truncate(query.top_k);
        Ok(fused
            .into_iter()
            .map(|(id, score)| Hit { id, score })
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<IndexDocument>, CallError> {
        Ok(self.docs.read().await.get(id).map(|d| d.doc.clone()))
    }

    async fn upsert(&self, docs: Vec<IndexDocument>) -> Result<(), CallError> {
        let mut guard = self.docs.write().await;
        for doc in docs {
            guard.insert(doc.id.clone(), IndexedDoc::new(doc));
        }
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<usize, CallError> {
        let mut guard = self.docs.write().await;
        Ok(ids.iter().filter(|id| guard.remove(id.as_str()).is_some()).count())
    }

    async fn ids(&self) -> Result<Vec<String>, CallError> {
        Ok(self.docs.read().await.keys().cloned().collect())
    }

    async fn len(&self) -> Result<usize, CallError> {
        Ok(self.docs.read().await.len())
    }

    async fn persist(&self) -> Result<(), CallError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = {
            let docs = self.docs.read().await;
            PersistedIndex {
                name: self.name.clone(),
                documents: docs.values().map(|d| d.doc.clone()).collect(),
            }
        };
        let bytes = serde_json::to_vec(&persisted)
            .map_err(|err| CallError::Permanent(format!("serialize index {}: {err}", self.name)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CallError::Transient(format!("create {}: {err}", parent.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| CallError::Transient(format!("write {}: {err}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|err| CallError::Transient(format!("rename {}: {err}", path.display())))?;
        Ok(())
    }
}
