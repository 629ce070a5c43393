//! Prompt templates, LLM transports and the JSON-enforcing prompt runner.
//!
//! ```no_run
//! use apiview_prompt::{CallScope, PromptInputs, PromptRunner, RunnerSettings, StubLlm};
//! use std::sync::Arc;
//!
//! # async fn demo() -> apiview_prompt::Result<()> {
//! let runner = PromptRunner::new(Arc::new(StubLlm::new()), RunnerSettings::default());
//! let mut inputs = PromptInputs::new();
//! inputs.insert("language".into(), "Python".into());
//! let reply = runner
//!     .run_json("api_review", "generic_review", &inputs, &CallScope::default())
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod runner;
pub mod stub;
pub mod template;
pub mod usage;

pub use client::{ChatMessage, ChatRequest, ChatResponse, LlmClient, OpenAiClient, Role, TokenUsage};
pub use error::{PromptError, Result};
pub use runner::{parse_json_reply, CallScope, PromptInputs, PromptRunner, RunnerSettings};
pub use stub::{empty_response_for, ScriptedLlm, StubLlm};
pub use template::{resolve_template_path, PromptTemplate, TEMPLATE_EXTENSION};
pub use usage::{CallRecord, PromptLatency, UsageSnapshot, UsageTracker};

/// Template folder of the review prompts.
pub const API_REVIEW_FOLDER: &str = "api_review";
