use apiview_protocol::CallError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One chat completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Template name; used for routing in test clients and for logs.
    pub prompt_name: String,
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the model for a JSON object response.
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub const fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Chat-completion transport.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn id(&self) -> String;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CallError>;
}

/// OpenAI-compatible `/chat/completions` client.
///
/// Azure endpoints authenticate with an `api-key` header, everything else
/// with a bearer token.
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    default_model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiClient {
    pub fn new(
        endpoint: impl Into<String>,
        default_model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            api_key,
        }
    }

    fn is_azure(&self) -> bool {
        self.endpoint.contains(".openai.azure.com")
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.default_model),
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if request.json {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn id(&self) -> String {
        format!("openai-{}", self.default_model)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CallError> {
        let body = self.build_body(request);
        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = if self.is_azure() {
                http.header("api-key", key)
            } else {
                http.bearer_auth(key)
            };
        }

        let response = http.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                CallError::Transient(format!("chat request: {err}"))
            } else {
                CallError::Permanent(format!("chat request: {err}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), text));
        }
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|err| CallError::Transient(format!("chat response: {err}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CallError::Transient("chat response has no content".to_string()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        Ok(ChatResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(json: bool) -> ChatRequest {
        ChatRequest {
            prompt_name: "guideline_review".into(),
            model: None,
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.0),
            max_tokens: Some(512),
            json,
        }
    }

    #[test]
    fn body_uses_default_model_and_json_mode() {
        let client = OpenAiClient::new("https://api.example.com/v1/", "gpt-4o", None);
        let body = client.build_body(&request(true));
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn plain_requests_omit_response_format() {
        let client = OpenAiClient::new("https://api.example.com/v1", "gpt-4o", None);
        let body = client.build_body(&request(false));
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn azure_endpoints_are_detected() {
        let azure = OpenAiClient::new("https://x.openai.azure.com/openai/v1", "m", None);
        let plain = OpenAiClient::new("https://api.openai.com/v1", "m", None);
        assert!(azure.is_azure());
        assert!(!plain.is_azure());
    }
}
