use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// Weighted sum of min-max normalized scores
    #[default]
    Linear,
    /// Reciprocal rank fusion
    Rrf,
}

/// Combines vector and keyword rankings into one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridFusion {
    pub mode: FusionMode,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// RRF constant k (typically 60)
    pub rrf_k: f32,
}

impl Default for HybridFusion {
    fn default() -> Self {
        Self {
            mode: FusionMode::Linear,
            vector_weight: 0.6,
            keyword_weight: 0.4,
            rrf_k: 60.0,
        }
    }
}

impl HybridFusion {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.vector_weight.is_finite() && self.keyword_weight.is_finite() && self.rrf_k.is_finite()) {
            return Err("search weights and rrf_k must be finite".to_string());
        }
        if self.vector_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err("search weights must be non-negative".to_string());
        }
        if self.vector_weight + self.keyword_weight <= 0.0 {
            return Err("at least one search weight must be positive".to_string());
        }
        if self.rrf_k <= 0.0 {
            return Err("rrf_k must be > 0".to_string());
        }
        Ok(())
    }

    /// Fuse `(id, score)` lists. Output is sorted by score descending, then id ascending.
    pub fn fuse(&self, vector: &[(String, f32)], keyword: &[(String, f32)]) -> Vec<(String, f32)> {
        let mut scores: HashMap<&str, f32> = HashMap::new();
        match self.mode {
            FusionMode::Linear => {
                for (id, score) in min_max(vector) {
                    *scores.entry(id).or_insert(0.0) += self.vector_weight * score;
                }
                for (id, score) in min_max(keyword) {
                    *scores.entry(id).or_insert(0.0) += self.keyword_weight * score;
                }
            }
            FusionMode::Rrf => {
                for (rank, (id, _)) in ranked(vector).into_iter().enumerate() {
                    *scores.entry(id).or_insert(0.0) += self.vector_weight / (self.rrf_k + rank as f32 + 1.0);
                }
                for (rank, (id, _)) in ranked(keyword).into_iter().enumerate() {
                    *scores.entry(id).or_insert(0.0) += self.keyword_weight / (self.rrf_k + rank as f32 + 1.0);
                }
            }
        }

        let mut out: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        sort_hits(&mut out);
        out
    }
}

/// Score descending, id ascending.
pub fn sort_hits(hits: &mut [(String, f32)]) {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

fn ranked(list: &[(String, f32)]) -> Vec<(&str, f32)> {
    let mut out: Vec<(&str, f32)> = list.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    out
}

fn min_max(list: &[(String, f32)]) -> Vec<(&str, f32)> {
    let Some(max) = list.iter().map(|(_, s)| *s).reduce(f32::max) else {
        return Vec::new();
    };
    let min = list.iter().map(|(_, s)| *s).fold(max, f32::min);
    let span = max - min;
    list.iter()
        .map(|(id, s)| {
            let norm = if span > f32::EPSILON {
                (s - min) / span
            } else if max > 0.0 {
                1.0
            } else {
                0.0
            };
            (id.as_str(), norm)
        })
        .collect()
}
