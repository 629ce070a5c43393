use crate::comments::{normalize_reply, KnownIds};
use crate::config::ReviewSettings;
use crate::existing::filter_existing;
use crate::grouper::group_comments;
use crate::judge::{dedup_pass, filter_pass, EvidenceIndex, JudgeRequest};
use crate::metadata::LanguageGuidance;
use crate::metrics::EngineMetrics;
use crate::{ReviewError, Result};
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::{
    Comment, CommentSource, ErrorKind, ExistingComment, JobPhase, Language, Review, ReviewRequest,
    ReviewStats, SectionFailure,
};
use apiview_search::{Context, SearchManager};
use apiview_sectioner::{DiffMark, Section, SectionedDocument};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives the engine's phase transitions.
pub trait PhaseObserver: Send + Sync {
    fn on_phase(&self, phase: JobPhase);
}

impl<F: Fn(JobPhase) + Send + Sync> PhaseObserver for F {
    fn on_phase(&self, phase: JobPhase) {
        self(phase);
    }
}

struct NoopObserver;

impl PhaseObserver for NoopObserver {
    fn on_phase(&self, _phase: JobPhase) {}
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub language: Language,
    pub document: SectionedDocument,
    pub existing: Vec<ExistingComment>,
}

struct SectionEvidence {
    context: Context,
    known: KnownIds,
    hits: usize,
    /// Indices that could not be queried for this section.
    failures: Vec<String>,
}

struct SectionComments {
    guideline: serde_json::Value,
    context: Option<serde_json::Value>,
    generic: serde_json::Value,
}

type SectionOutcome<T> = std::result::Result<T, SectionFailure>;

/// Orchestrates chunking, retrieval, per-section prompts, judging and grouping.
#[derive(Clone)]
pub struct ReviewEngine {
    search: SearchManager,
    runner: Arc<PromptRunner>,
    metrics: EngineMetrics,
    settings: ReviewSettings,
}

impl ReviewEngine {
    pub fn new(
        search: SearchManager,
        runner: Arc<PromptRunner>,
        metrics: EngineMetrics,
        settings: ReviewSettings,
    ) -> Result<Self> {
        settings.validate().map_err(ReviewError::InvalidInput)?;
        Ok(Self {
            search,
            runner,
            metrics,
            settings,
        })
    }

    pub fn settings(&self) -> &ReviewSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Synchronous validation: language, sectioner limits and diff construction.
    pub fn prepare(&self, request: &ReviewRequest) -> Result<PreparedRequest> {
        let language: Language = request.language.parse().map_err(ReviewError::InvalidInput)?;
        let document = match request.effective_base() {
            Some(base) => SectionedDocument::from_diff(base, &request.target, self.settings.sectioner)?,
            None => SectionedDocument::from_text(&request.target, self.settings.sectioner)?,
        };
        Ok(PreparedRequest {
            language,
            document,
            existing: request.comments.iter().cloned().map(ExistingComment::from).collect(),
        })
    }

    pub async fn review(&self, request: &ReviewRequest, cancel: &CancellationToken) -> Result<Review> {
        self.review_with_observer(request, cancel, &NoopObserver).await
    }

    /// Run a review under the job deadline, reporting phases to `observer`.
    pub async fn review_with_observer(
        &self,
        request: &ReviewRequest,
        cancel: &CancellationToken,
        observer: &dyn PhaseObserver,
    ) -> Result<Review> {
        observer.on_phase(JobPhase::Preparing);
        let outcome = match self.prepare(request) {
            Ok(prepared) => self.run_prepared(prepared, cancel, observer).await,
            Err(err) => Err(err),
        };
        let label = match &outcome {
            Ok(_) => "succeeded",
            Err(err) if err.kind() == ErrorKind::Cancelled => "cancelled",
            Err(_) => "failed",
        };
        self.metrics.review_finished(label);
        outcome
    }

    pub async fn run_prepared(
        &self,
        prepared: PreparedRequest,
        cancel: &CancellationToken,
        observer: &dyn PhaseObserver,
    ) -> Result<Review> {
        let job_cancel = cancel.child_token();
        let deadline = self.settings.job_timeout;
        let run = self.execute(prepared, &job_cancel, observer);
        tokio::select! {
            _ = cancel.cancelled() => Err(ReviewError::Cancelled),
            res = tokio::time::timeout(deadline, run) => match res {
                Ok(review) => review,
                Err(_) => {
                    job_cancel.cancel();
                    Err(ReviewError::DeadlineExceeded {
                        after_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            },
        }
    }

    async fn execute(
        &self,
        prepared: PreparedRequest,
        cancel: &CancellationToken,
        observer: &dyn PhaseObserver,
    ) -> Result<Review> {
        let PreparedRequest {
            language,
            document,
            existing,
        } = prepared;
        let scope = CallScope::new(cancel.clone());
        let guidance = LanguageGuidance::load(self.settings.metadata_dir.as_deref(), language).await?;
        let mut stats = ReviewStats::default();

        observer.on_phase(JobPhase::Chunking);
        let diff_mode = document.is_diff();
        let sections: Vec<&Section> = document
            .sections()
            .iter()
            .filter(|s| !diff_mode || s.added_lines().next().is_some())
            .collect();
        stats.sections = document.sections().len();
        log::info!(
            "reviewing {} {} ({} sections, {} to prompt)",
            language,
            if diff_mode { "diff" } else { "surface" },
            stats.sections,
            sections.len()
        );

        observer.on_phase(JobPhase::Retrieving);
        let sections = &sections;
        let retrieved: Vec<Result<SectionOutcome<SectionEvidence>>> = stream::iter(0..sections.len())
            .map(|i| self.retrieve(sections[i], language, cancel))
            .buffered(self.settings.max_concurrency)
            .collect()
            .await;

        let mut evidence_index = EvidenceIndex::default();
        let mut evidence: Vec<SectionOutcome<SectionEvidence>> = Vec::with_capacity(retrieved.len());
        for (section, outcome) in sections.iter().zip(retrieved) {
            match outcome? {
                Ok(found) => {
                    stats.retrieval_hits += found.hits as u64;
                    stats.retrieval_partial |= !found.failures.is_empty();
                    evidence_index.absorb(&found.context);
                    evidence.push(Ok(found));
                }
                Err(failure) => {
                    log::warn!("section {}: retrieval failed: {}", section.chunk_index, failure.message);
                    evidence.push(Err(failure));
                }
            }
        }

        observer.on_phase(JobPhase::Reviewing);
        let (guidance, scope, evidence_ref) = (&guidance, &scope, &evidence);
        let reviewed: Vec<Result<SectionOutcome<SectionComments>>> = stream::iter(0..sections.len())
            .map(|i| async move {
                match &evidence_ref[i] {
                    Ok(found) => {
                        self.review_section(sections[i], found, language, guidance, diff_mode, scope)
                            .await
                    }
                    Err(failure) => Ok(Err(failure.clone())),
                }
            })
            .buffered(self.settings.max_concurrency)
            .collect()
            .await;

        let mut merged: Vec<Comment> = Vec::new();
        for ((section, found), outcome) in sections.iter().zip(&evidence).zip(reviewed) {
            let replies = match outcome? {
                Ok(replies) => replies,
                Err(failure) => {
                    log::warn!(
                        "section {} excluded from merge: {} ({})",
                        failure.chunk_index,
                        failure.message,
                        failure.kind
                    );
                    stats.section_failures.push(failure);
                    continue;
                }
            };
            let Ok(found) = found else { continue };

            let ordered = [
                (CommentSource::Guideline, Some(&replies.guideline)),
                (CommentSource::Context, replies.context.as_ref()),
                (CommentSource::Generic, Some(&replies.generic)),
            ];
            for (source, reply) in ordered {
                let Some(reply) = reply else { continue };
                let normalized = normalize_reply(reply, source, section, &found.known);
                stats.malformed_comments += normalized.malformed;
                merged.extend(normalized.comments);
            }
        }
        stats.section_errors = stats.section_failures.len();
        self.metrics.sections_processed(sections.len(), stats.section_errors);
        self.metrics.comments_dropped("malformed", stats.malformed_comments);

        if stats.section_errors * 2 > sections.len() {
            let first = &stats.section_failures[0];
            return Err(ReviewError::TooManySectionFailures {
                failed: stats.section_errors,
                total: sections.len(),
                first: first.message.clone(),
                kind: first.kind,
            });
        }

        let before = merged.len();
        let mut merged = retarget_comments(&document, merged);
        stats.diff_filtered = before - merged.len();
        self.metrics.comments_dropped("diff", stats.diff_filtered);

        observer.on_phase(JobPhase::Judging);
        let code_lines = target_lines(&document);
        let judge = JudgeRequest {
            runner: &self.runner,
            folder: &self.settings.prompt_folder,
            language,
            guidance,
            evidence: &evidence_index,
            code_lines: &code_lines,
            threshold: self.settings.judge_confidence_threshold,
            concurrency: self.settings.max_concurrency,
            scope,
        };
        let filtered = filter_pass(&judge, std::mem::take(&mut merged)).await?;
        stats.judge_dropped = filtered.dropped;
        stats.judge_skipped = filtered.skipped;
        self.metrics.comments_dropped("judge", filtered.dropped);

        let (deduped, dedup_dropped) = dedup_pass(filtered.comments);
        stats.dedup_dropped = dedup_dropped;
        self.metrics.comments_dropped("dedup", dedup_dropped);

        let (mut comments, existing_filtered) = filter_existing(
            &self.runner,
            &self.settings.prompt_folder,
            language,
            &existing,
            deduped,
            self.settings.max_concurrency,
            scope,
        )
        .await?;
        stats.existing_filtered = existing_filtered;
        self.metrics.comments_dropped("existing", existing_filtered);

        observer.on_phase(JobPhase::Grouping);
        stats.grouping = group_comments(
            &self.runner,
            &self.settings.prompt_folder,
            language,
            &mut comments,
            scope,
        )
        .await?;

        comments.sort_by(|a, b| {
            a.line_no
                .cmp(&b.line_no)
                .then_with(|| a.source.priority().cmp(&b.source.priority()))
                .then_with(|| a.text.cmp(&b.text))
        });
        for comment in &comments {
            stats.record_confidence(comment.confidence);
            self.metrics.comment_emitted(comment.confidence);
        }
        self.absorb_usage(scope, &mut stats);

        log::info!(
            "review finished: {} comments, {} section errors, {} judge drops",
            comments.len(),
            stats.section_errors,
            stats.judge_dropped
        );
        Ok(Review { comments, stats })
    }

    async fn retrieve(
        &self,
        section: &Section,
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<SectionOutcome<SectionEvidence>> {
        let failure = |kind: ErrorKind, message: String| SectionFailure {
            chunk_index: section.chunk_index,
            kind,
            message,
        };
        let query = section.retrieval_query(self.settings.query_max_chars);
        let results = match self.search.search_all(&query, Some(language), cancel).await {
            Ok(results) => results,
            Err(err) if err.kind() == ErrorKind::Cancelled => return Err(ReviewError::Cancelled),
            Err(err) => return Ok(Err(failure(err.kind(), err.to_string()))),
        };
        for reason in &results.failures {
            self.metrics.retrieval_failure(reason);
        }
        let context = match self.search.build_context(&results).await {
            Ok(context) => context,
            Err(err) if err.kind() == ErrorKind::Cancelled => return Err(ReviewError::Cancelled),
            Err(err) => return Ok(Err(failure(err.kind(), err.to_string()))),
        };
        Ok(Ok(SectionEvidence {
            known: KnownIds::from_context(&context),
            hits: results.hit_count(),
            failures: results.failures.clone(),
            context,
        }))
    }

    async fn review_section(
        &self,
        section: &Section,
        evidence: &SectionEvidence,
        language: Language,
        guidance: &LanguageGuidance,
        diff_mode: bool,
        scope: &CallScope,
    ) -> Result<SectionOutcome<SectionComments>> {
        let content = section.numbered();
        let context = evidence.context.to_markdown();
        let folder = self.settings.prompt_folder.as_str();

        let mut with_context = PromptInputs::new();
        with_context.insert("language".into(), language.display_name().into());
        with_context.insert("context".into(), context);
        with_context.insert("content".into(), content.clone());

        let mut generic = PromptInputs::new();
        generic.insert("language".into(), language.display_name().into());
        generic.insert("custom_rules".into(), guidance.custom_rules_or_none().into());
        generic.insert("content".into(), content);

        let (guideline_name, generic_name) = if diff_mode {
            ("guideline_diff_review", "generic_diff_review")
        } else {
            ("guideline_review", "generic_review")
        };

        let context_call = async {
            if diff_mode {
                self.runner
                    .run_json(folder, "context_diff_review", &with_context, scope)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let (guideline, context, generic) = futures::join!(
            self.runner.run_json(folder, guideline_name, &with_context, scope),
            context_call,
            self.runner.run_json(folder, generic_name, &generic, scope),
        );

        let collected = guideline.and_then(|g| context.and_then(|c| generic.map(|x| (g, c, x))));
        match collected {
            Ok((guideline, context, generic)) => Ok(Ok(SectionComments {
                guideline,
                context,
                generic,
            })),
            Err(err) if err.is_cancelled() => Err(ReviewError::Cancelled),
            Err(err @ apiview_prompt::PromptError::TemplateNotFound { .. }) => Err(err.into()),
            Err(err) => Ok(Err(SectionFailure {
                chunk_index: section.chunk_index,
                kind: err.kind(),
                message: err.to_string(),
            })),
        }
    }

    fn absorb_usage(&self, scope: &CallScope, stats: &mut ReviewStats) {
        for record in scope.usage.records() {
            self.metrics.prompt_call(
                &record.prompt,
                record.elapsed.as_secs_f64(),
                record.usage.total(),
            );
        }
        let usage = scope.usage.snapshot();
        stats.tokens = usage.tokens;
        stats.prompt_tokens = usage.prompt_tokens;
        stats.completion_tokens = usage.completion_tokens;
        stats.prompt_ms = usage.prompt_ms;
        stats.prompt_calls = usage.calls;
    }
}

/// Keep comments on lines that exist in the target (and, in diff mode, were
/// added) and renumber them to target line numbers.
fn retarget_comments(document: &SectionedDocument, comments: Vec<Comment>) -> Vec<Comment> {
    let diff_mode = document.is_diff();
    comments
        .into_iter()
        .filter_map(|mut comment| {
            let line = document.line(comment.line_no as usize)?;
            if diff_mode && line.diff_mark != DiffMark::Added {
                log::debug!("dropping comment on unchanged line {}", comment.line_no);
                return None;
            }
            comment.line_no = u32::try_from(line.target_line_no?).ok()?;
            Some(comment)
        })
        .collect()
}

fn target_lines(document: &SectionedDocument) -> BTreeMap<u32, String> {
    document
        .lines()
        .iter()
        .filter_map(|l| {
            let target = u32::try_from(l.target_line_no?).ok()?;
            Some((target, l.text.clone()))
        })
        .collect()
}
