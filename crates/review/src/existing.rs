use crate::{ReviewError, Result};
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::{Comment, ExistingComment, Language};
use futures::stream::{self, StreamExt};
use serde_json::Value;

pub const FILTER_EXISTING_PROMPT: &str = "filter_existing_comment";

/// Drop new comments that repeat what reviewers already said on the same line.
///
/// Only unresolved existing comments with a line number are considered. A
/// failed prompt keeps the comment. Returns the survivors and the discard count.
pub async fn filter_existing(
    runner: &PromptRunner,
    folder: &str,
    language: Language,
    existing: &[ExistingComment],
    comments: Vec<Comment>,
    concurrency: usize,
    scope: &CallScope,
) -> Result<(Vec<Comment>, usize)> {
    let open: Vec<&ExistingComment> = existing
        .iter()
        .filter(|e| !e.is_resolved && e.line_no.is_some())
        .collect();
    if open.is_empty() || comments.is_empty() {
        return Ok((comments, 0));
    }

    let (open, comments_ref) = (&open, &comments);
    let decisions: Vec<Result<bool>> = stream::iter(0..comments.len())
        .map(|i| {
            let comment = &comments_ref[i];
            let on_line: Vec<&ExistingComment> = open
                .iter()
                .copied()
                .filter(|e| e.line_no == Some(comment.line_no))
                .collect();
            keep_comment(runner, folder, language, comment, on_line, scope)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut kept = Vec::with_capacity(comments.len());
    let mut discarded = 0;
    for (comment, decision) in comments.into_iter().zip(decisions) {
        if decision? {
            kept.push(comment);
        } else {
            log::debug!("line {}: comment already covered by a reviewer", comment.line_no);
            discarded += 1;
        }
    }
    Ok((kept, discarded))
}

async fn keep_comment(
    runner: &PromptRunner,
    folder: &str,
    language: Language,
    comment: &Comment,
    on_line: Vec<&ExistingComment>,
    scope: &CallScope,
) -> Result<bool> {
    if on_line.is_empty() {
        return Ok(true);
    }
    let mut inputs = PromptInputs::new();
    inputs.insert("language".into(), language.display_name().into());
    inputs.insert(
        "comment".into(),
        serde_json::to_string_pretty(comment).unwrap_or_else(|_| comment.text.clone()),
    );
    inputs.insert(
        "existing".into(),
        serde_json::to_string_pretty(&on_line).unwrap_or_default(),
    );

    match runner
        .run_json(folder, FILTER_EXISTING_PROMPT, &inputs, scope)
        .await
    {
        Ok(reply) => Ok(!is_discard(&reply)),
        Err(err) if err.is_cancelled() => Err(ReviewError::Cancelled),
        Err(err) => {
            log::warn!("existing-comment filter failed on line {}: {err}", comment.line_no);
            Ok(true)
        }
    }
}

fn is_discard(reply: &Value) -> bool {
    reply
        .get("action")
        .and_then(Value::as_str)
        .is_some_and(|a| a.trim().eq_ignore_ascii_case("discard"))
}
