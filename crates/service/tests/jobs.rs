use apiview_prompt::{ChatRequest, ChatResponse, LlmClient, ScriptedLlm, TokenUsage};
use apiview_protocol::{CallError, ErrorKind, JobPhase, JobState, ReviewJob, ReviewRequest};
use apiview_search::{local_indices, HashEmbedder, HybridFusion};
use apiview_service::{CopilotConfig, LlmMode, ServiceContext};
use apiview_store::{ContainerName, DocumentStore};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

fn config() -> CopilotConfig {
    let mut config = CopilotConfig::default();
    config.paths.prompts_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../prompts");
    config.paths.metadata_dir = None;
    config.llm.mode = LlmMode::Stub;
    config.retention_seconds = 60;
    config
}

async fn context(llm: Arc<dyn LlmClient>) -> ServiceContext {
    ServiceContext::build(
        config(),
        DocumentStore::in_memory(),
        local_indices(HybridFusion::default()),
        Arc::new(HashEmbedder::new(64)),
        llm,
    )
    .await
    .unwrap()
}

fn request(language: &str) -> ReviewRequest {
    ReviewRequest {
        target: "class Client:\n    def GetThing(self): pass\n".into(),
        base: None,
        language: language.into(),
        comments: Vec::new(),
    }
}

/// Never answers; only cancellation or the job deadline ends a call.
struct HangingLlm;

#[async_trait]
impl LlmClient for HangingLlm {
    fn id(&self) -> String {
        "hanging".to_string()
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, CallError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ChatResponse {
            content: "{}".into(),
            usage: TokenUsage::default(),
        })
    }
}

#[tokio::test]
async fn submitted_job_runs_to_success() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let queued = ctx.jobs.submit(request("python")).await.unwrap();
    assert_eq!(queued.state, JobState::Queued);
    assert_eq!(queued.language, "python");
    assert_eq!(queued.input_fingerprint.len(), 64);

    let done = ctx.jobs.wait(&queued.id, POLL).await.unwrap();
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.phase, JobPhase::Succeeded);
    assert!(done.started_at.is_some());
    assert!(done.finished_at >= done.started_at);
    assert!(done.result.is_some());
    assert!(done.error.is_none());

    let metrics = ctx.metrics().render().unwrap();
    assert!(metrics.contains("apiview_reviews_total{outcome=\"succeeded\"} 1"));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_a_job_exists() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let err = ctx.jobs.submit(request("cobol")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputError);
    assert_eq!(ctx.store.counts(ContainerName::ReviewJobs).await.unwrap().live, 0);
}

#[tokio::test]
async fn cancel_fails_the_job_as_cancelled() {
    let ctx = context(Arc::new(HangingLlm)).await;
    let job = ctx.jobs.submit(request("python")).await.unwrap();
    assert!(ctx.jobs.cancel(&job.id).await.unwrap());

    let done = ctx.jobs.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert!(done.result.is_none());
}

#[tokio::test]
async fn finished_jobs_refuse_further_transitions() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let job = ctx.jobs.submit(request("python")).await.unwrap();
    let done = ctx.jobs.wait(&job.id, POLL).await.unwrap();

    assert!(!ctx.jobs.cancel(&job.id).await.unwrap());
    let after = ctx.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(after, done);
}

#[tokio::test]
async fn cancelling_an_unknown_job_is_an_input_error() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let err = ctx.jobs.cancel("no-such-job").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputError);
}

#[tokio::test]
async fn panics_inside_a_run_become_fatal_failures() {
    let llm = ScriptedLlm::new().on("generic_review", |_| panic!("template exploded"));
    let ctx = context(Arc::new(llm)).await;
    let job = ctx.jobs.submit(request("python")).await.unwrap();

    let done = ctx.jobs.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.state, JobState::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Fatal);
    assert_eq!(error.detail.as_deref(), Some("template exploded"));
}

#[tokio::test]
async fn sweep_removes_only_expired_terminal_jobs() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let job = ctx.jobs.submit(request("python")).await.unwrap();
    let done = ctx.jobs.wait(&job.id, POLL).await.unwrap();
    let finished_at = done.finished_at.unwrap();

    let mut stuck = ReviewJob::queued("stuck".into(), "python".into(), "f".into(), 0);
    stuck.state = JobState::Running;
    stuck.phase = JobPhase::Reviewing;
    ctx.store.create(&stuck).await.unwrap();

    assert_eq!(ctx.jobs.sweep(finished_at).await.unwrap(), 0);
    assert!(ctx.jobs.get(&job.id).await.unwrap().is_some());

    let later = finished_at + 60 * 1000 + 1;
    assert_eq!(ctx.jobs.sweep(later).await.unwrap(), 1);
    assert!(ctx.jobs.get(&job.id).await.unwrap().is_none());

    assert_eq!(ctx.jobs.sweep(u64::MAX).await.unwrap(), 0);
    assert!(ctx.jobs.get("stuck").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn sweeper_stops_when_cancelled() {
    let ctx = context(Arc::new(ScriptedLlm::new())).await;
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = ctx.jobs.spawn_sweeper(Duration::from_secs(60), cancel.clone());
    tokio::time::advance(Duration::from_secs(61)).await;
    cancel.cancel();
    handle.await.unwrap();
}
