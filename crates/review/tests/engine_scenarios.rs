use apiview_prompt::{ChatRequest, PromptRunner, RunnerSettings, ScriptedLlm};
use apiview_protocol::{
    CallError, ErrorKind, ExistingComment, ExistingCommentInput, Guideline, JobPhase,
    ReviewRequest, RetryPolicy, Severity,
};
use apiview_review::{EngineMetrics, ReviewEngine, ReviewError, ReviewSettings};
use apiview_search::{
    local_indices, HashEmbedder, Hit, HybridFusion, IndexDocument, IndexQuery, IndexSet,
    SearchIndex, SearchIndexer, SearchManager, SearchSettings,
};
use apiview_store::DocumentStore;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMING_ID: &str = "python_design=html=python-naming-methods";

const BASE: &str = "class Client:\n    def get_other(self): pass\n    def close(self): pass\n";
const TARGET: &str =
    "class Client:\n    def get_other(self): pass\n    def GetThing(self): pass\n    def close(self): pass\n";

fn repo_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").join(name)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

/// Index that fails every query.
struct BrokenIndex;

#[async_trait]
impl SearchIndex for BrokenIndex {
    fn name(&self) -> &str {
        "memories"
    }

    async fn search(&self, _query: &IndexQuery) -> Result<Vec<Hit>, CallError> {
        Err(CallError::Permanent("HTTP 403".into()))
    }

    async fn get_document(&self, _id: &str) -> Result<Option<IndexDocument>, CallError> {
        Ok(None)
    }

    async fn upsert(&self, _docs: Vec<IndexDocument>) -> Result<(), CallError> {
        Ok(())
    }

    async fn remove(&self, _ids: &[String]) -> Result<usize, CallError> {
        Ok(0)
    }

    async fn ids(&self) -> Result<Vec<String>, CallError> {
        Ok(Vec::new())
    }

    async fn len(&self) -> Result<usize, CallError> {
        Ok(0)
    }
}

struct Harness {
    engine: ReviewEngine,
    llm: Arc<ScriptedLlm>,
}

async fn harness(llm: ScriptedLlm, broken_memories: bool) -> Harness {
    let store = DocumentStore::in_memory();
    store
        .upsert(&Guideline {
            id: NAMING_ID.into(),
            language: "python".into(),
            title: "Use snake_case for method names".into(),
            text: "DO use snake_case for method names, for example get_thing rather than GetThing."
                .into(),
            category: "Naming".into(),
            requirement: None,
            examples: Vec::new(),
            content_hash: String::new(),
            last_synced_commit: String::new(),
            source_path: None,
            related_guidelines: Vec::new(),
            related_memories: Vec::new(),
            tags: Vec::new(),
        })
        .await
        .unwrap();

    let healthy = local_indices(HybridFusion::default());
    let indices = if broken_memories {
        IndexSet {
            memories: Arc::new(BrokenIndex),
            ..healthy
        }
    } else {
        healthy
    };
    let embedder = Arc::new(HashEmbedder::new(128));
    SearchIndexer::new(store.clone(), indices.clone(), embedder.clone())
        .run_all()
        .await
        .unwrap();

    let search = SearchManager::new(
        store,
        indices,
        embedder,
        SearchSettings {
            retry: fast_retry(),
            ..SearchSettings::default()
        },
    );
    let llm = Arc::new(llm);
    let runner = PromptRunner::new(
        llm.clone(),
        RunnerSettings {
            prompts_dir: repo_dir("prompts"),
            llm_timeout: Duration::from_secs(5),
            retry: fast_retry(),
            ..RunnerSettings::default()
        },
    );
    let settings = ReviewSettings {
        metadata_dir: Some(repo_dir("metadata")),
        ..ReviewSettings::default()
    };
    let engine = ReviewEngine::new(search, Arc::new(runner), EngineMetrics::new().unwrap(), settings)
        .unwrap();
    Harness { engine, llm }
}

/// Number of the rendered line containing `needle`, as shown to the model.
fn rendered_line(request: &ChatRequest, needle: &str) -> Option<u64> {
    let content = &request.messages.last()?.content;
    content.lines().find_map(|line| {
        let (number, text) = line.split_once(": ")?;
        if text.contains(needle) {
            number.trim().parse().ok()
        } else {
            None
        }
    })
}

fn naming_comment(request: &ChatRequest, confidence: f64) -> Result<String, CallError> {
    let line_no = rendered_line(request, "GetThing").unwrap_or(1);
    Ok(json!({"comments": [{
        "line_no": line_no,
        "code": "def GetThing(self): pass",
        "text": "Method names must use snake_case: get_thing.",
        "severity": "should",
        "guideline_ids": ["python-naming-methods"],
        "memory_ids": [],
        "confidence": confidence,
        "suggestion": "def get_thing(self): pass"
    }]})
    .to_string())
}

fn request(target: &str, base: Option<&str>) -> ReviewRequest {
    ReviewRequest {
        target: target.into(),
        base: base.map(str::to_string),
        language: "python".into(),
        comments: Vec::new(),
    }
}

#[tokio::test]
async fn empty_diff_yields_empty_review() {
    let h = harness(ScriptedLlm::new(), false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(TARGET)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(review.comments.is_empty());
    assert_eq!(review.stats.section_errors, 0);
    assert!(h.llm.calls().is_empty());
}

#[tokio::test]
async fn added_line_violating_a_guideline_gets_one_comment() {
    let llm = ScriptedLlm::new().on("guideline_diff_review", |r| naming_comment(r, 0.9));
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(review.comments.len(), 1);
    let comment = &review.comments[0];
    assert_eq!(comment.line_no, 3);
    assert_eq!(comment.guideline_ids, vec![NAMING_ID.to_string()]);
    assert_eq!(comment.severity, Severity::Should);
    assert!(!comment.is_generic);
    assert_eq!(comment.correlation_id, None);
    assert!(review.stats.retrieval_hits > 0);
    assert!(review.stats.prompt_calls >= 4);
    assert_eq!(h.llm.call_count("context_diff_review"), 1);
    assert_eq!(h.llm.call_count("context_review"), 0);
}

#[tokio::test]
async fn comments_on_unchanged_lines_are_dropped_in_diff_mode() {
    let llm = ScriptedLlm::new().on("generic_diff_review", |r| {
        let line_no = rendered_line(r, "def close").unwrap_or(1);
        Ok(json!({"comments": [{"line_no": line_no, "code": "def close(self)", "text": "close should be async"}]})
            .to_string())
    });
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(review.comments.is_empty());
    assert_eq!(review.stats.diff_filtered, 1);
}

#[tokio::test]
async fn comments_citing_the_same_guideline_share_a_correlation_id() {
    let surface = "class Client:\n    def GetThing(self): pass\n    def GetOther(self): pass\n";
    let llm = ScriptedLlm::new().respond(
        "guideline_review",
        json!({"comments": [
            {"line_no": 2, "code": "def GetThing", "text": "Use snake_case: get_thing.", "severity": "should",
             "guideline_ids": [NAMING_ID], "confidence": 0.9},
            {"line_no": 3, "code": "def GetOther", "text": "Use snake_case: get_other.", "severity": "should",
             "guideline_ids": [NAMING_ID], "confidence": 0.9}
        ]})
        .to_string(),
    );
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(surface, None), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(review.comments.len(), 2);
    assert!(review.comments[0].correlation_id.is_some());
    assert_eq!(review.comments[0].correlation_id, review.comments[1].correlation_id);
    assert_eq!(review.stats.grouping.signature_groups.len(), 1);
    assert_eq!(review.stats.grouping.signature_groups[0].line_nos, vec![2, 3]);
}

#[tokio::test]
async fn generic_comments_are_clustered_by_the_model() {
    let surface = "class Client:\n    def fetch(self, b, a): pass\n    def store(self, b, a): pass\n    def close(self): pass\n";
    let llm = ScriptedLlm::new()
        .respond(
            "generic_review",
            json!({"comments": [
                {"line_no": 2, "code": "def fetch", "text": "Parameter order differs from the service.", "confidence": 0.8},
                {"line_no": 3, "code": "def store", "text": "Parameter order differs here too.", "confidence": 0.8},
                {"line_no": 4, "code": "def close", "text": "Consider a context manager.", "confidence": 0.8}
            ]})
            .to_string(),
        )
        .respond(
            "group_generic_comments",
            json!({"clusters": [{"indices": [0, 1], "reason": "parameter ordering"}, {"indices": [2], "reason": "alone"}]})
                .to_string(),
        );
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(surface, None), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(review.comments.len(), 3);
    assert!(review.comments.iter().all(|c| c.is_generic && c.guideline_ids.is_empty()));
    assert!(review.comments[0].correlation_id.is_some());
    assert_eq!(review.comments[0].correlation_id, review.comments[1].correlation_id);
    assert_eq!(review.comments[2].correlation_id, None);

    let clusters = &review.stats.grouping.generic_clusters;
    assert_eq!(clusters.iter().filter(|c| c.accepted).count(), 1);
    assert_eq!(clusters.iter().filter(|c| !c.accepted).count(), 1);
}

#[tokio::test]
async fn degraded_retrieval_still_produces_a_review() {
    let llm = ScriptedLlm::new().on("guideline_diff_review", |r| naming_comment(r, 0.9));
    let h = harness(llm, true).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(review.stats.retrieval_partial);
    assert_eq!(review.stats.section_errors, 0);
    assert!(!review.comments.is_empty());
    let metrics = h.engine.metrics().render().unwrap();
    assert!(metrics.contains("apiview_retrieval_failures_total{index=\"memories\"}"));
}

#[tokio::test]
async fn judge_removes_low_confidence_comment() {
    let llm = ScriptedLlm::new().on("guideline_diff_review", |r| naming_comment(r, 0.1));
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(review.comments.is_empty());
    assert_eq!(review.stats.judge_dropped, 1);
    assert!(!review.stats.judge_skipped);
}

#[tokio::test]
async fn judge_score_caps_model_confidence() {
    let llm = ScriptedLlm::new()
        .on("guideline_diff_review", |r| naming_comment(r, 0.95))
        .respond(
            "judge_comment",
            json!({"specificity": 0.9, "guideline_grounding": 0.6, "actionability": 0.75}).to_string(),
        );
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(review.comments.len(), 1);
    assert!((review.comments[0].confidence - 0.75).abs() < 1e-5);
    assert_eq!(review.stats.confidence_histogram[7], 1);
}

#[tokio::test]
async fn unavailable_judge_passes_comments_through() {
    let llm = ScriptedLlm::new()
        .on("guideline_diff_review", |r| naming_comment(r, 0.1))
        .on("judge_comment", |_| Err(CallError::Permanent("HTTP 401".into())));
    let h = harness(llm, false).await;
    let review = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(review.stats.judge_skipped);
    assert_eq!(review.comments.len(), 1);
}

#[tokio::test]
async fn existing_reviewer_comments_can_discard_duplicates() {
    let llm = ScriptedLlm::new()
        .on("guideline_diff_review", |r| naming_comment(r, 0.9))
        .respond("filter_existing_comment", r#"{"action": "DISCARD", "reasoning": "already raised"}"#);
    let h = harness(llm, false).await;
    let mut req = request(TARGET, Some(BASE));
    req.comments = vec![
        ExistingCommentInput::Detailed(ExistingComment {
            line_no: Some(3),
            author: Some("reviewer".into()),
            text: "Please rename to get_thing".into(),
            is_resolved: false,
        }),
        ExistingCommentInput::Text("Looks good overall".into()),
    ];
    let review = h.engine.review(&req, &CancellationToken::new()).await.unwrap();

    assert!(review.comments.is_empty());
    assert_eq!(review.stats.existing_filtered, 1);
    assert_eq!(h.llm.call_count("filter_existing_comment"), 1);
}

#[tokio::test]
async fn failing_majority_of_sections_fails_the_review() {
    let llm = ScriptedLlm::new().on("generic_diff_review", |_| Err(CallError::Permanent("HTTP 400".into())));
    let h = harness(llm, false).await;
    let err = h
        .engine
        .review(&request(TARGET, Some(BASE)), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReviewError::TooManySectionFailures { failed: 1, total: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::PromptFailure);
}

#[tokio::test]
async fn unknown_language_is_an_input_error() {
    let h = harness(ScriptedLlm::new(), false).await;
    let mut req = request(TARGET, None);
    req.language = "cobol".into();
    let err = h.engine.review(&req, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputError);
}

#[tokio::test]
async fn cancelled_review_reports_cancellation() {
    let h = harness(ScriptedLlm::new(), false).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .engine
        .review(&request(TARGET, Some(BASE)), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn phases_are_reported_in_order() {
    let h = harness(ScriptedLlm::new(), false).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = move |phase: JobPhase| sink.lock().unwrap().push(phase);
    h.engine
        .review_with_observer(&request(TARGET, Some(BASE)), &CancellationToken::new(), &observer)
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            JobPhase::Preparing,
            JobPhase::Chunking,
            JobPhase::Retrieving,
            JobPhase::Reviewing,
            JobPhase::Judging,
            JobPhase::Grouping,
        ]
    );
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn review_futures_can_run_on_spawned_tasks() {
    let h = harness(ScriptedLlm::new(), false).await;
    let req = request(TARGET, Some(BASE));
    let cancel = CancellationToken::new();
    assert_send(&h.engine.review(&req, &cancel));
    let prepared = h.engine.prepare(&req).unwrap();
    assert_send(&h.engine.run_prepared(prepared, &cancel, &|_: JobPhase| {}));

    let engine = h.engine.clone();
    let review = tokio::spawn(async move { engine.review(&req, &cancel).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(review.stats.section_errors, 0);
}
