use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::error::{PromptError, Result};
use crate::template::{resolve_template_path, PromptTemplate};
use crate::usage::UsageTracker;
use apiview_protocol::retry::guarded;
use apiview_protocol::RetryPolicy;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Template inputs keyed by placeholder name.
pub type PromptInputs = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub prompts_dir: PathBuf,
    pub llm_timeout: Duration,
    pub retry: RetryPolicy,
    /// Used when neither the call nor the template names a model.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Per-prompt model override, e.g. a dedicated judge model.
    pub model_overrides: HashMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            prompts_dir: PathBuf::from("prompts"),
            llm_timeout: Duration::from_millis(120_000),
            retry: RetryPolicy::default(),
            temperature: None,
            max_tokens: None,
            model_overrides: HashMap::new(),
        }
    }
}

/// Per-review call scope: where usage accumulates and what cancels the calls.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    pub cancel: CancellationToken,
    pub usage: Arc<UsageTracker>,
}

impl CallScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            usage: Arc::new(UsageTracker::new()),
        }
    }
}

const JSON_CORRECTION: &str = "Your previous reply was not valid JSON ({error}). \
Return only valid JSON matching the schema described above, with no surrounding prose.";

/// Loads templates, calls the LLM and insists on JSON.
pub struct PromptRunner {
    client: Arc<dyn LlmClient>,
    settings: RunnerSettings,
    cache: RwLock<HashMap<PathBuf, Arc<PromptTemplate>>>,
}

impl PromptRunner {
    pub fn new(client: Arc<dyn LlmClient>, settings: RunnerSettings) -> Self {
        Self {
            client,
            settings,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn client_id(&self) -> String {
        self.client.id()
    }

    pub async fn template(&self, folder: &str, name: &str) -> Result<Arc<PromptTemplate>> {
        let path = resolve_template_path(&self.settings.prompts_dir, folder, name);
        if let Some(template) = self.cache.read().await.get(&path) {
            return Ok(Arc::clone(template));
        }
        let template = Arc::new(PromptTemplate::load(&self.settings.prompts_dir, folder, name).await?);
        self.cache
            .write()
            .await
            .insert(path, Arc::clone(&template));
        Ok(template)
    }

    /// Render `folder/name`, call the model and parse its JSON reply.
    ///
    /// A reply that is not JSON gets exactly one corrective follow-up before
    /// the call fails with [`PromptError::InvalidJson`].
    pub async fn run_json(
        &self,
        folder: &str,
        name: &str,
        inputs: &PromptInputs,
        scope: &CallScope,
    ) -> Result<Value> {
        let template = self.template(folder, name).await?;
        let messages = template.render(inputs)?;
        let mut request = ChatRequest {
            prompt_name: template.name.clone(),
            model: self
                .settings
                .model_overrides
                .get(&template.name)
                .cloned()
                .or_else(|| template.model.clone()),
            messages,
            temperature: template.temperature.or(self.settings.temperature),
            max_tokens: template.max_tokens.or(self.settings.max_tokens),
            json: true,
        };

        let content = self.complete(&request, scope).await?;
        let error = match parse_json_reply(&content) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        log::warn!("prompt {}: non-JSON reply, asking for a correction: {error}", request.prompt_name);

        request.messages.push(ChatMessage::assistant(content));
        request
            .messages
            .push(ChatMessage::user(JSON_CORRECTION.replace("{error}", &error)));
        let corrected = self.complete(&request, scope).await?;
        parse_json_reply(&corrected).map_err(|detail| PromptError::InvalidJson {
            prompt: request.prompt_name.clone(),
            detail,
        })
    }

    async fn complete(&self, request: &ChatRequest, scope: &CallScope) -> Result<String> {
        let label = format!("prompt {}", request.prompt_name);
        let started = Instant::now();
        let response = self
            .settings
            .retry
            .run(&label, &scope.cancel, |_| {
                guarded(
                    self.settings.llm_timeout,
                    &scope.cancel,
                    self.client.complete(request),
                )
            })
            .await
            .map_err(|source| PromptError::Call {
                prompt: request.prompt_name.clone(),
                source,
            })?;
        let elapsed = started.elapsed();
        log::debug!(
            "prompt {} completed in {:?} ({} tokens)",
            request.prompt_name,
            elapsed,
            response.usage.total()
        );
        scope.usage.record(&request.prompt_name, elapsed, response.usage);
        Ok(response.content)
    }
}

/// Parse a model reply, tolerating a surrounding ```json fence.
pub fn parse_json_reply(content: &str) -> std::result::Result<Value, String> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(unfenced).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fenced_json_is_accepted() {
        assert_eq!(
            parse_json_reply("```json\n{\"comments\": []}\n```").unwrap(),
            serde_json::json!({"comments": []})
        );
        assert!(parse_json_reply("Sure! Here you go").is_err());
    }
}
