//! Offline LLM clients.

use crate::client::{ChatRequest, ChatResponse, LlmClient, TokenUsage};
use apiview_protocol::CallError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// The smallest valid answer each shipped template accepts.
pub fn empty_response_for(prompt_name: &str) -> &'static str {
    match prompt_name {
        name if name.ends_with("_review") => r#"{"comments": []}"#,
        "judge_comment" => {
            r#"{"specificity": 1.0, "guideline_grounding": 1.0, "actionability": 1.0, "reasoning": "stub"}"#
        }
        "filter_existing_comment" => r#"{"action": "KEEP", "reasoning": "stub"}"#,
        "group_generic_comments" => r#"{"clusters": []}"#,
        "mention_dispatch" => r#"{"action": "no_action", "reasoning": "stub client"}"#,
        _ => "{}",
    }
}

fn estimate_usage(request: &ChatRequest, content: &str) -> TokenUsage {
    let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
    TokenUsage {
        prompt_tokens: (prompt_chars / 4) as u64,
        completion_tokens: (content.len() / 4) as u64,
    }
}

/// Answers every prompt with an empty-but-valid JSON document.
#[derive(Debug, Default)]
pub struct StubLlm;

impl StubLlm {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    fn id(&self) -> String {
        "stub".to_string()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CallError> {
        let content = empty_response_for(&request.prompt_name).to_string();
        Ok(ChatResponse {
            usage: estimate_usage(request, &content),
            content,
        })
    }
}

type Handler = Box<dyn Fn(&ChatRequest) -> Result<String, CallError> + Send + Sync>;

/// Deterministic client for tests: one handler per prompt name.
///
/// Prompts without a handler fall back to [`empty_response_for`].
#[derive(Default)]
pub struct ScriptedLlm {
    handlers: HashMap<String, Handler>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, prompt_name: &str, handler: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, CallError> + Send + Sync + 'static,
    {
        self.handlers.insert(prompt_name.to_string(), Box::new(handler));
        self
    }

    /// Always answer `prompt_name` with `content`.
    #[must_use]
    pub fn respond(self, prompt_name: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        self.on(prompt_name, move |_| Ok(content.clone()))
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, prompt_name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.prompt_name == prompt_name)
            .count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn id(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CallError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let content = match self.handlers.get(&request.prompt_name) {
            Some(handler) => handler(request)?,
            None => empty_response_for(&request.prompt_name).to_string(),
        };
        Ok(ChatResponse {
            usage: estimate_usage(request, &content),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    fn request(name: &str) -> ChatRequest {
        ChatRequest {
            prompt_name: name.to_string(),
            model: None,
            messages: vec![ChatMessage::user("review this")],
            temperature: None,
            max_tokens: None,
            json: true,
        }
    }

    #[tokio::test]
    async fn stub_answers_valid_json_for_every_template() {
        let stub = StubLlm::new();
        for name in [
            "guideline_review",
            "generic_diff_review",
            "judge_comment",
            "filter_existing_comment",
            "group_generic_comments",
            "mention_dispatch",
            "extract_guideline",
        ] {
            let response = stub.complete(&request(name)).await.unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&response.content).unwrap();
            assert!(parsed.is_object(), "{name}");
        }
    }

    #[tokio::test]
    async fn scripted_routes_by_prompt_name_and_records_calls() {
        let llm = ScriptedLlm::new()
            .respond("judge_comment", r#"{"specificity": 0.2}"#)
            .on("generic_review", |_| Err(CallError::Permanent("boom".into())));

        let judged = llm.complete(&request("judge_comment")).await.unwrap();
        assert_eq!(judged.content, r#"{"specificity": 0.2}"#);
        assert!(llm.complete(&request("generic_review")).await.is_err());
        let fallback = llm.complete(&request("guideline_review")).await.unwrap();
        assert_eq!(fallback.content, r#"{"comments": []}"#);

        assert_eq!(llm.calls().len(), 3);
        assert_eq!(llm.call_count("judge_comment"), 1);
    }
}
