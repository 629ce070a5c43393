use crate::tokenize::tokenize;
use apiview_protocol::CallError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// Turns text into fixed-width vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier; indices built by different embedders are incompatible.
    fn id(&self) -> String;

    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CallError>;
}

/// Deterministic feature-hashing embedder.
///
/// Each token is hashed to a bucket and a sign; counts are log-damped and the
/// result is L2-normalized, so texts sharing vocabulary end up close.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vec = vec![0.0f32; self.dimension];
        for (token, count) in counts {
            let mut state = fnv1a_64(token.as_bytes());
            let bits = splitmix64(&mut state);
            let bucket = (bits % self.dimension as u64) as usize;
            let sign = if (bits >> 63) == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign * (1.0 + (count as f32).ln());
        }
        normalize(&mut vec);
        vec
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> String {
        format!("hash-{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CallError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn id(&self) -> String {
        format!("http-{}-{}", self.model, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CallError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                CallError::Transient(format!("embedding request: {err}"))
            } else {
                CallError::Permanent(format!("embedding request: {err}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), text));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| CallError::Permanent(format!("embedding response: {err}")))?;
        parsed.data.sort_by_key(|row| row.index);
        if parsed.data.len() != texts.len() {
            return Err(CallError::Permanent(format!(
                "embedding response has {} rows for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        Ok(parsed
            .data
            .into_iter()
            .map(|row| {
                let mut v = row.embedding;
                normalize(&mut v);
                v
            })
            .collect())
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
