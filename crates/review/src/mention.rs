//! Routing of a reviewer's mention to one of a fixed set of workflows.

use crate::{ReviewError, Result};
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MENTION_PROMPT: &str = "mention_dispatch";
pub const NO_ACTION: &str = "no_action";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionRequest {
    /// The comment thread, oldest first.
    pub comments: Vec<String>,
    pub language: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    NoAction {
        reasoning: String,
    },
    Executed {
        action: String,
        reasoning: String,
        output: Value,
    },
    /// The model chose an action nobody registered; nothing ran.
    Unknown {
        action: String,
        reasoning: String,
    },
}

/// A sub-workflow reachable from a mention.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn description(&self) -> &str;

    async fn run(
        &self,
        language: Language,
        request: &MentionRequest,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Into<String>, workflow: Arc<dyn Workflow>) {
        self.workflows.insert(action.into(), workflow);
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn Workflow>> {
        self.workflows.get(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    /// `- action: description` lines for the dispatch prompt.
    fn describe(&self) -> String {
        let mut lines = vec![format!("- {NO_ACTION}: nothing needs to be done")];
        lines.extend(
            self.workflows
                .iter()
                .map(|(action, wf)| format!("- {action}: {}", wf.description())),
        );
        lines.join("\n")
    }
}

pub struct MentionDispatcher {
    runner: Arc<PromptRunner>,
    registry: WorkflowRegistry,
    folder: String,
}

impl MentionDispatcher {
    pub fn new(runner: Arc<PromptRunner>, registry: WorkflowRegistry, folder: impl Into<String>) -> Self {
        Self {
            runner,
            registry,
            folder: folder.into(),
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        request: &MentionRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome> {
        let language: Language = request.language.parse().map_err(ReviewError::InvalidInput)?;
        if request.comments.iter().all(|c| c.trim().is_empty()) {
            return Err(ReviewError::invalid_input("mention has no comments"));
        }

        let mut inputs = PromptInputs::new();
        inputs.insert("language".into(), language.display_name().into());
        inputs.insert("package_name".into(), request.package_name.clone());
        inputs.insert("comments".into(), request.comments.join("\n---\n"));
        inputs.insert("code".into(), request.code.clone());
        inputs.insert("actions".into(), self.registry.describe());

        let scope = CallScope::new(cancel.clone());
        let reply = self
            .runner
            .run_json(&self.folder, MENTION_PROMPT, &inputs, &scope)
            .await?;

        let action = reply
            .get("action")
            .and_then(Value::as_str)
            .map(|a| a.trim().to_ascii_lowercase())
            .unwrap_or_else(|| NO_ACTION.to_string());
        let reasoning = reply
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if action == NO_ACTION {
            return Ok(DispatchOutcome::NoAction { reasoning });
        }
        let Some(workflow) = self.registry.get(&action) else {
            log::warn!("mention dispatch chose unregistered action {action}");
            return Ok(DispatchOutcome::Unknown { action, reasoning });
        };

        let arguments = reply.get("arguments").cloned().unwrap_or(Value::Null);
        log::info!("mention dispatch running {action} for {language}");
        let output = workflow.run(language, request, &arguments, cancel).await?;
        Ok(DispatchOutcome::Executed {
            action,
            reasoning,
            output,
        })
    }
}
