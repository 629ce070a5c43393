//! Two judge passes: an LLM-graded filter, then deterministic deduplication.

use crate::metadata::LanguageGuidance;
use crate::{ReviewError, Result};
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::{Comment, Example, Guideline, Language, Memory};
use apiview_search::Context;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const JUDGE_PROMPT: &str = "judge_comment";

/// Every record retrieved during a review, so the judge sees what the reviewer saw.
#[derive(Debug, Clone, Default)]
pub struct EvidenceIndex {
    guidelines: BTreeMap<String, Guideline>,
    examples: BTreeMap<String, Example>,
    memories: BTreeMap<String, Memory>,
}

impl EvidenceIndex {
    pub fn absorb(&mut self, context: &Context) {
        for g in &context.guidelines {
            self.guidelines.entry(g.id.clone()).or_insert_with(|| g.clone());
        }
        for e in &context.examples {
            self.examples.entry(e.id.clone()).or_insert_with(|| e.clone());
        }
        for m in &context.memories {
            self.memories.entry(m.id.clone()).or_insert_with(|| m.clone());
        }
    }

    /// The cited guidelines with their examples, plus the cited memories.
    pub fn for_comment(&self, comment: &Comment) -> Context {
        let guidelines: Vec<Guideline> = comment
            .guideline_ids
            .iter()
            .filter_map(|id| self.guidelines.get(id).cloned())
            .collect();
        let examples = guidelines
            .iter()
            .flat_map(|g| g.examples.iter())
            .filter_map(|id| self.examples.get(id).cloned())
            .collect();
        let memories = comment
            .memory_ids
            .iter()
            .filter_map(|id| self.memories.get(id).cloned())
            .collect();
        Context {
            guidelines,
            examples,
            memories,
            unresolved: Vec::new(),
        }
    }
}

/// Scores returned by the judge prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeScores {
    pub specificity: f32,
    pub guideline_grounding: f32,
    pub actionability: f32,
}

impl JudgeScores {
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let dim = |name: &str| {
            reply
                .get(name)
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite())
                .map(|v| (v as f32).clamp(0.0, 1.0))
        };
        Some(Self {
            specificity: dim("specificity")?,
            guideline_grounding: dim("guideline_grounding")?,
            actionability: dim("actionability")?,
        })
    }

    pub fn mean(&self) -> f32 {
        (self.specificity + self.guideline_grounding + self.actionability) / 3.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub comments: Vec<Comment>,
    pub dropped: usize,
    /// Every judge call failed; comments passed through unfiltered.
    pub skipped: bool,
}

/// Inputs shared by every judge call of one review.
pub struct JudgeRequest<'a> {
    pub runner: &'a PromptRunner,
    pub folder: &'a str,
    pub language: Language,
    pub guidance: &'a LanguageGuidance,
    pub evidence: &'a EvidenceIndex,
    pub code_lines: &'a BTreeMap<u32, String>,
    pub threshold: f32,
    pub concurrency: usize,
    pub scope: &'a CallScope,
}

/// Pass 1: grade each comment and drop the ones below the threshold.
///
/// A comment's confidence becomes `min(model confidence, judge score)`.
/// Individual judge failures keep the model confidence.
pub async fn filter_pass(request: &JudgeRequest<'_>, comments: Vec<Comment>) -> Result<FilterOutcome> {
    if comments.is_empty() {
        return Ok(FilterOutcome::default());
    }

    let comments_ref = &comments;
    let verdicts: Vec<Result<Option<f32>>> = stream::iter(0..comments.len())
        .map(|i| judge_one(request, &comments_ref[i]))
        .buffered(request.concurrency.max(1))
        .collect()
        .await;

    let mut scores = Vec::with_capacity(verdicts.len());
    for verdict in verdicts {
        match verdict {
            Ok(score) => scores.push(score),
            Err(err) if err.is_cancelled() => return Err(ReviewError::Cancelled),
            Err(err) => return Err(err),
        }
    }

    if scores.iter().all(Option::is_none) {
        log::warn!("judge unavailable for all {} comments; passing them through", comments.len());
        return Ok(FilterOutcome {
            comments,
            dropped: 0,
            skipped: true,
        });
    }

    let mut outcome = FilterOutcome::default();
    for (mut comment, score) in comments.into_iter().zip(scores) {
        if let Some(score) = score {
            comment.confidence = comment.confidence.min(score);
        }
        if comment.confidence < request.threshold {
            log::debug!(
                "judge dropped comment on line {} (confidence {:.2})",
                comment.line_no,
                comment.confidence
            );
            outcome.dropped += 1;
        } else {
            outcome.comments.push(comment);
        }
    }
    Ok(outcome)
}

/// `Ok(None)` when the judge could not grade the comment.
async fn judge_one(request: &JudgeRequest<'_>, comment: &Comment) -> Result<Option<f32>> {
    let mut inputs = PromptInputs::new();
    inputs.insert("language".into(), request.language.display_name().into());
    inputs.insert(
        "comment".into(),
        serde_json::to_string_pretty(comment).unwrap_or_else(|_| comment.text.clone()),
    );
    inputs.insert(
        "code".into(),
        request
            .code_lines
            .get(&comment.line_no)
            .cloned()
            .unwrap_or_else(|| comment.code_excerpt.clone()),
    );
    inputs.insert("context".into(), request.evidence.for_comment(comment).to_markdown());
    inputs.insert(
        "exceptions".into(),
        request.guidance.filter_exceptions_or_none().to_string(),
    );

    match request
        .runner
        .run_json(request.folder, JUDGE_PROMPT, &inputs, request.scope)
        .await
    {
        Ok(reply) => match JudgeScores::from_reply(&reply) {
            Some(scores) => Ok(Some(scores.mean())),
            None => {
                log::warn!("judge reply for line {} lacks scores", comment.line_no);
                Ok(None)
            }
        },
        Err(err) if err.is_cancelled() => Err(ReviewError::Cancelled),
        Err(err @ apiview_prompt::PromptError::TemplateNotFound { .. }) => Err(err.into()),
        Err(err) => {
            log::warn!("judge failed for line {}: {err}", comment.line_no);
            Ok(None)
        }
    }
}

/// Pass 2: on each line keep the best of any comments that cite a shared
/// guideline or memory (or repeat the same generic text).
///
/// Ranking is confidence descending, then severity ordinal, then text.
pub fn dedup_pass(comments: Vec<Comment>) -> (Vec<Comment>, usize) {
    let mut by_line: BTreeMap<u32, Vec<Comment>> = BTreeMap::new();
    for comment in comments {
        by_line.entry(comment.line_no).or_default().push(comment);
    }

    let mut kept = Vec::new();
    let mut dropped = 0;
    for (_, mut group) in by_line {
        group.sort_by(rank);
        let mut survivors: Vec<Comment> = Vec::with_capacity(group.len());
        for comment in group {
            if survivors.iter().any(|s| duplicates(s, &comment)) {
                dropped += 1;
            } else {
                survivors.push(comment);
            }
        }
        kept.extend(survivors);
    }
    (kept, dropped)
}

fn rank(a: &Comment, b: &Comment) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.severity.ordinal().cmp(&b.severity.ordinal()))
        .then_with(|| a.text.cmp(&b.text))
}

fn duplicates(a: &Comment, b: &Comment) -> bool {
    if a.is_generic && b.is_generic {
        return a.text.trim().eq_ignore_ascii_case(b.text.trim());
    }
    a.overlaps(b)
}
