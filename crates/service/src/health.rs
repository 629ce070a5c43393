use crate::context::ServiceContext;
use apiview_search::{IndexerState, IndexerStatus};
use apiview_store::{ContainerCounts, ContainerName, LAST_SYNCED_COMMIT_SETTING};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// Usable, but something needs attention
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerHealth {
    #[serde(flatten)]
    pub counts: ContainerCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer: Option<IndexerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub llm_mode: String,
    pub llm_client: String,
    pub embedder: String,
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_commit: Option<String>,
    pub containers: BTreeMap<String, ContainerHealth>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

impl ServiceContext {
    /// Probe the store, the indices and the indexer. Never fails; problems
    /// are reported in the result.
    pub async fn health(&self) -> HealthReport {
        let mut problems = Vec::new();
        let mut unhealthy = false;

        let mut containers = BTreeMap::new();
        for container in ContainerName::ALL {
            if container == ContainerName::Settings {
                continue;
            }
            let counts = match self.store.counts(container).await {
                Ok(counts) => counts,
                Err(err) => {
                    unhealthy = true;
                    problems.push(format!("store {container}: {err}"));
                    ContainerCounts::default()
                }
            };
            let mut indexed = None;
            let mut indexer = None;
            if let Some(index) = self.indexer.indices().get(container) {
                match index.len().await {
                    Ok(len) => indexed = Some(len),
                    Err(err) => {
                        unhealthy = true;
                        problems.push(format!("index {}: {err}", index.name()));
                    }
                }
                let status = self.indexer.status(container);
                if status.state == IndexerState::Failed {
                    problems.push(format!(
                        "indexer {container} failed: {}",
                        status.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                indexer = Some(status);
            }
            containers.insert(
                container.to_string(),
                ContainerHealth {
                    counts,
                    indexed,
                    indexer,
                },
            );
        }

        let last_synced_commit = match self.store.get_setting(LAST_SYNCED_COMMIT_SETTING).await {
            Ok(value) => value,
            Err(err) => {
                unhealthy = true;
                problems.push(format!("settings: {err}"));
                None
            }
        };

        if !self.config.paths.prompts_dir.is_dir() {
            unhealthy = true;
            problems.push(format!(
                "prompts directory {} does not exist",
                self.config.paths.prompts_dir.display()
            ));
        }
        if self.config.llm.mode == crate::config::LlmMode::OpenAi && self.config.api_key().is_none() {
            problems.push(format!("{} is not set", self.config.llm.api_key_env));
        }

        let status = if unhealthy {
            HealthStatus::Unhealthy
        } else if problems.is_empty() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport {
            status,
            llm_mode: self.config.llm.mode.as_str().to_string(),
            llm_client: self.runner.client_id(),
            embedder: self.embedder_id().to_string(),
            data_dir: self.config.paths.data_dir.display().to_string(),
            last_synced_commit,
            containers,
            problems,
        }
    }
}
