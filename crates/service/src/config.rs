//! Typed service configuration.
//!
//! Resolution order: built-in defaults, then a TOML file (`--config`, else
//! `APIVIEW_CONFIG`, else `./apiview.toml` when present), then environment
//! overrides.

use crate::error::{Result, ServiceError};
use apiview_ingest::IngestSettings;
use apiview_prompt::RunnerSettings;
use apiview_protocol::{Language, RetryPolicy};
use apiview_review::{ReviewSettings, JUDGE_PROMPT};
use apiview_search::{FusionMode, HybridFusion, SearchSettings};
use apiview_sectioner::SectionerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "APIVIEW_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "apiview.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Deterministic feature hashing, no network
    #[default]
    Hash,
    /// OpenAI-compatible `/embeddings` endpoint
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub fusion: FusionMode,
    pub rrf_k: f32,
    pub embedding: EmbeddingMode,
    pub embedding_dimension: usize,
    /// Defaults to `llm.endpoint` when unset.
    pub embedding_endpoint: Option<String>,
    pub embedding_model: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let fusion = HybridFusion::default();
        Self {
            vector_weight: fusion.vector_weight,
            keyword_weight: fusion.keyword_weight,
            fusion: fusion.mode,
            rrf_k: fusion.rrf_k,
            embedding: EmbeddingMode::Hash,
            embedding_dimension: 256,
            embedding_endpoint: None,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    OpenAi,
    /// Empty-but-valid answers for every prompt
    Stub,
}

impl LlmMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Stub => "stub",
        }
    }
}

impl std::str::FromStr for LlmMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "stub" => Ok(Self::Stub),
            other => Err(format!("unknown llm mode '{other}' (expected openai or stub)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub mode: LlmMode,
    pub endpoint: String,
    pub model: String,
    /// Model used for `judge_comment` calls, if different.
    pub judge_model: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::OpenAi,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            judge_model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local clone read through the git CLI
    #[default]
    Git,
    /// `owner/name` read over the GitHub REST API
    Github,
    /// Plain directory without history
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Checkout path, directory, or `owner/name`, depending on `source`.
    pub repository: Option<String>,
    pub source: SourceKind,
    /// Branch or revision to sync from.
    pub branch: String,
    /// Environment variable holding a GitHub token.
    pub token_env: String,
    pub guidelines_prefix: String,
    pub llm_extraction: bool,
    pub language_filter: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            repository: None,
            source: SourceKind::Git,
            branch: "main".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            guidelines_prefix: IngestSettings::default().guidelines_prefix,
            llm_extraction: false,
            language_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Document store and search indices live here.
    pub data_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub metadata_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".apiview"),
            prompts_dir: PathBuf::from("prompts"),
            metadata_dir: Some(PathBuf::from("metadata")),
        }
    }
}

impl PathsConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("indices")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// Line cap per section
    pub max_chunk_size: usize,
    /// Lines repeated at the start of the next section
    pub overlap: usize,
    pub indent_unit: usize,
    pub judge_confidence_threshold: f32,
    /// How long terminal jobs are kept
    pub retention_seconds: u64,
    pub retrieval_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub job_timeout_ms: u64,
    pub max_concurrency: usize,
    pub retrieval_top_k: usize,
    pub query_max_chars: usize,
    /// Seeds the ingestion pointer when the store has none yet.
    pub last_synced_commit_sha: Option<String>,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub ingest: IngestConfig,
    pub paths: PathsConfig,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        let review = ReviewSettings::default();
        Self {
            max_chunk_size: review.sectioner.max_chunk_size,
            overlap: review.sectioner.overlap,
            indent_unit: review.sectioner.indent_unit,
            judge_confidence_threshold: review.judge_confidence_threshold,
            retention_seconds: 604_800,
            retrieval_timeout_ms: 10_000,
            llm_timeout_ms: 120_000,
            job_timeout_ms: 900_000,
            max_concurrency: review.max_concurrency,
            retrieval_top_k: 5,
            query_max_chars: review.query_max_chars,
            last_synced_commit_sha: None,
            search: SearchConfig::default(),
            llm: LlmConfig::default(),
            ingest: IngestConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl CopilotConfig {
    /// Resolve and validate the configuration of this process.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
                _ => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
            },
        };
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate().map_err(ServiceError::Config)?;
        if let Some(path) = &path {
            log::debug!("loaded configuration from {}", path.display());
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&raw).map_err(|e| ServiceError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Apply `APIVIEW_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = get("APIVIEW_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(mode) = get("APIVIEW_LLM_MODE") {
            self.llm.mode = mode.parse().map_err(ServiceError::Config)?;
        }
        if let Some(endpoint) = get("APIVIEW_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(raw) = get("APIVIEW_MAX_CHUNK_SIZE") {
            self.max_chunk_size = raw
                .parse()
                .map_err(|_| ServiceError::config(format!("APIVIEW_MAX_CHUNK_SIZE must be an integer, got '{raw}'")))?;
        }
        if let Some(raw) = get("APIVIEW_JUDGE_THRESHOLD") {
            self.judge_confidence_threshold = raw
                .parse()
                .map_err(|_| ServiceError::config(format!("APIVIEW_JUDGE_THRESHOLD must be a number, got '{raw}'")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.review_settings().validate()?;
        self.fusion().validate()?;
        if self.retrieval_timeout_ms == 0 || self.llm_timeout_ms == 0 {
            return Err("retrieval_timeout_ms and llm_timeout_ms must be > 0".to_string());
        }
        if self.retention_seconds == 0 {
            return Err("retention_seconds must be > 0".to_string());
        }
        if self.retrieval_top_k == 0 {
            return Err("retrieval_top_k must be > 0".to_string());
        }
        if self.search.embedding_dimension == 0 {
            return Err("search.embedding_dimension must be > 0".to_string());
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("llm.temperature must be within [0, 2], got {t}"));
            }
        }
        self.language_filter()?;
        Ok(())
    }

    pub fn sectioner(&self) -> SectionerConfig {
        SectionerConfig {
            max_chunk_size: self.max_chunk_size,
            overlap: self.overlap,
            indent_unit: self.indent_unit,
        }
    }

    pub fn review_settings(&self) -> ReviewSettings {
        ReviewSettings {
            sectioner: self.sectioner(),
            judge_confidence_threshold: self.judge_confidence_threshold,
            max_concurrency: self.max_concurrency,
            query_max_chars: self.query_max_chars,
            metadata_dir: self.paths.metadata_dir.clone(),
            job_timeout: Duration::from_millis(self.job_timeout_ms),
            ..ReviewSettings::default()
        }
    }

    pub fn fusion(&self) -> HybridFusion {
        HybridFusion {
            mode: self.search.fusion,
            vector_weight: self.search.vector_weight,
            keyword_weight: self.search.keyword_weight,
            rrf_k: self.search.rrf_k,
        }
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            top_k: self.retrieval_top_k,
            timeout: Duration::from_millis(self.retrieval_timeout_ms),
            retry: RetryPolicy::default(),
            ..SearchSettings::default()
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        let mut model_overrides = HashMap::new();
        if let Some(judge) = &self.llm.judge_model {
            model_overrides.insert(JUDGE_PROMPT.to_string(), judge.clone());
        }
        RunnerSettings {
            prompts_dir: self.paths.prompts_dir.clone(),
            llm_timeout: Duration::from_millis(self.llm_timeout_ms),
            retry: RetryPolicy::default(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            model_overrides,
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            guidelines_prefix: self.ingest.guidelines_prefix.clone(),
            llm_extraction: self.ingest.llm_extraction,
            ..IngestSettings::default()
        }
    }

    pub fn language_filter(&self) -> std::result::Result<Option<Language>, String> {
        self.ingest
            .language_filter
            .as_deref()
            .map(str::parse::<Language>)
            .transpose()
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = CopilotConfig::default();
        assert_eq!(config.max_chunk_size, 250);
        assert_eq!(config.overlap, 10);
        assert_eq!(config.judge_confidence_threshold, 0.5);
        assert_eq!(config.retention_seconds, 604_800);
        assert_eq!(config.retrieval_timeout_ms, 10_000);
        assert_eq!(config.llm_timeout_ms, 120_000);
        assert_eq!(config.job_timeout_ms, 900_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let config = CopilotConfig::from_toml(
            r#"
max_chunk_size = 120
last_synced_commit_sha = "abc123"

[search]
fusion = "rrf"
vector_weight = 0.0

[llm]
mode = "stub"
judge_model = "gpt-judge"

[ingest]
source = "github"
repository = "Azure/azure-rest-api-specs"
language_filter = "c#"
"#,
        )
        .unwrap();
        assert_eq!(config.max_chunk_size, 120);
        assert_eq!(config.overlap, 10);
        assert_eq!(config.search.fusion, FusionMode::Rrf);
        assert_eq!(config.llm.mode, LlmMode::Stub);
        assert_eq!(config.ingest.source, SourceKind::Github);
        assert_eq!(config.language_filter().unwrap(), Some(Language::Dotnet));
        assert_eq!(
            config.runner_settings().model_overrides.get(JUDGE_PROMPT).map(String::as_str),
            Some("gpt-judge")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn mistyped_values_are_rejected() {
        assert!(CopilotConfig::from_toml("max_chunk_size = \"big\"").is_err());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = CopilotConfig::default();
        let env: HashMap<&str, &str> = [
            ("APIVIEW_DATA_DIR", "/tmp/apiview"),
            ("APIVIEW_LLM_MODE", "stub"),
            ("APIVIEW_MAX_CHUNK_SIZE", "40"),
            ("APIVIEW_JUDGE_THRESHOLD", "0.7"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("/tmp/apiview"));
        assert_eq!(config.llm.mode, LlmMode::Stub);
        assert_eq!(config.max_chunk_size, 40);
        assert!((config.judge_confidence_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_env_values_are_config_errors() {
        let mut config = CopilotConfig::default();
        let err = config
            .apply_env(|name| (name == "APIVIEW_MAX_CHUNK_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), apiview_protocol::ErrorKind::InputError);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let overlap = CopilotConfig {
            max_chunk_size: 10,
            overlap: 10,
            ..CopilotConfig::default()
        };
        assert!(overlap.validate().is_err());

        let threshold = CopilotConfig {
            judge_confidence_threshold: -0.1,
            ..CopilotConfig::default()
        };
        assert!(threshold.validate().is_err());

        let timeout = CopilotConfig {
            llm_timeout_ms: 0,
            ..CopilotConfig::default()
        };
        assert!(timeout.validate().is_err());

        let mut weights = CopilotConfig::default();
        weights.search.vector_weight = 0.0;
        weights.search.keyword_weight = 0.0;
        assert!(weights.validate().is_err());

        let mut language = CopilotConfig::default();
        language.ingest.language_filter = Some("cobol".to_string());
        assert!(language.validate().is_err());
    }
}
