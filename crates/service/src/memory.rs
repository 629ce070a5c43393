use apiview_protocol::{Language, Memory};
use apiview_review::{MentionRequest, ReviewError, Workflow};
use apiview_search::SearchIndexer;
use apiview_store::{ContainerName, DocumentStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const RECORD_MEMORY_ACTION: &str = "record_memory";

const MAX_TITLE_CHARS: usize = 120;

/// Stores the takeaway of a mention thread as a [`Memory`] and reindexes
/// memories so the next review can retrieve it.
pub struct RecordMemoryWorkflow {
    store: DocumentStore,
    indexer: Arc<SearchIndexer>,
}

impl RecordMemoryWorkflow {
    pub fn new(store: DocumentStore, indexer: Arc<SearchIndexer>) -> Self {
        Self { store, indexer }
    }
}

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list_arg(arguments: &Value, key: &str) -> Vec<String> {
    arguments
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

#[async_trait]
impl Workflow for RecordMemoryWorkflow {
    fn description(&self) -> &str {
        "remember a reviewer's correction or preference so future reviews apply it"
    }

    async fn run(
        &self,
        language: Language,
        request: &MentionRequest,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> apiview_review::Result<Value> {
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled);
        }
        let text = string_arg(arguments, "text").unwrap_or_else(|| {
            request
                .comments
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        });
        if text.is_empty() {
            return Err(ReviewError::invalid_input("nothing to remember"));
        }
        let title = string_arg(arguments, "title").unwrap_or_else(|| {
            let first = text.lines().next().unwrap_or_default();
            truncate_chars(first, MAX_TITLE_CHARS)
        });

        let memory = Memory {
            id: format!("memory-{}", uuid::Uuid::new_v4()),
            language: language.as_str().to_string(),
            title,
            text,
            related_guideline_ids: string_list_arg(arguments, "guideline_ids"),
            related_example_ids: string_list_arg(arguments, "example_ids"),
            source: if request.package_name.is_empty() {
                "mention".to_string()
            } else {
                format!("mention:{}", request.package_name)
            },
        };
        self.store.create(&memory).await?;
        log::info!("recorded memory {} for {language}", memory.id);

        let reindexed = match self.indexer.run(ContainerName::Memories).await {
            Ok(_) => true,
            Err(err) => {
                log::warn!("memory {} stored but reindex failed: {err}", memory.id);
                false
            }
        };
        Ok(json!({
            "id": memory.id,
            "title": memory.title,
            "reindexed": reindexed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_titles_are_cut_on_char_boundaries() {
        let title = truncate_chars(&"é".repeat(200), 10);
        assert_eq!(title.chars().count(), 13);
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn list_arguments_skip_non_strings() {
        let args = json!({"guideline_ids": ["a", 1, "b"]});
        assert_eq!(string_list_arg(&args, "guideline_ids"), vec!["a", "b"]);
        assert!(string_list_arg(&args, "missing").is_empty());
    }
}
