use apiview_prompt::{
    CallScope, PromptError, PromptInputs, PromptRunner, RunnerSettings, ScriptedLlm,
};
use apiview_protocol::{CallError, ErrorKind, RetryPolicy};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TEMPLATE: &str = "+++\nname = \"generic_review\"\ninputs = [\"language\", \"content\"]\n+++\nsystem:\nReview {language} code. Reply with {{\"comments\": [...]}}.\nuser:\n{content}\n";

fn prompts_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    let folder = dir.path().join("api_review");
    std::fs::create_dir_all(&folder).expect("mkdir");
    std::fs::write(folder.join("generic_review.prompty"), TEMPLATE).expect("write");
    dir
}

fn runner(dir: &TempDir, llm: Arc<ScriptedLlm>) -> PromptRunner {
    PromptRunner::new(
        llm,
        RunnerSettings {
            prompts_dir: dir.path().to_path_buf(),
            llm_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..RunnerSettings::default()
        },
    )
}

fn inputs() -> PromptInputs {
    let mut inputs = PromptInputs::new();
    inputs.insert("language".into(), "Python".into());
    inputs.insert("content".into(), "1: def GetThing(self): pass".into());
    inputs
}

#[tokio::test]
async fn renders_template_and_parses_json() {
    let dir = prompts_dir();
    let llm = Arc::new(ScriptedLlm::new().respond("generic_review", r#"{"comments": [{"line_no": 1}]}"#));
    let runner = runner(&dir, Arc::clone(&llm));
    let scope = CallScope::default();

    let reply = runner
        .run_json("api_review", "generic_review", &inputs(), &scope)
        .await
        .unwrap();
    assert_eq!(reply["comments"][0]["line_no"], 1);

    let calls = llm.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].json);
    assert_eq!(calls[0].messages[0].content, "Review Python code. Reply with {\"comments\": [...]}.");
    assert_eq!(scope.usage.snapshot().calls, 1);
}

#[tokio::test]
async fn non_json_reply_gets_one_corrective_retry() {
    let dir = prompts_dir();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let llm = Arc::new(ScriptedLlm::new().on("generic_review", move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("Here are my comments: none".to_string())
        } else {
            Ok(r#"{"comments": []}"#.to_string())
        }
    }));
    let runner = runner(&dir, Arc::clone(&llm));

    let reply = runner
        .run_json("api_review", "generic_review", &inputs(), &CallScope::default())
        .await
        .unwrap();
    assert_eq!(reply, serde_json::json!({"comments": []}));

    let calls = llm.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].messages.len(), calls[0].messages.len() + 2);
}

#[tokio::test]
async fn persistent_non_json_is_a_prompt_failure() {
    let dir = prompts_dir();
    let llm = Arc::new(ScriptedLlm::new().respond("generic_review", "not json"));
    let runner = runner(&dir, Arc::clone(&llm));

    let err = runner
        .run_json("api_review", "generic_review", &inputs(), &CallScope::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PromptError::InvalidJson { .. }));
    assert_eq!(err.kind(), ErrorKind::PromptFailure);
    assert_eq!(llm.calls().len(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried_and_permanent_are_not() {
    let dir = prompts_dir();
    let transient = Arc::new(
        ScriptedLlm::new().on("generic_review", |_| Err(CallError::Transient("HTTP 429".into()))),
    );
    let err = runner(&dir, Arc::clone(&transient))
        .run_json("api_review", "generic_review", &inputs(), &CallScope::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PromptFailure);
    assert_eq!(transient.calls().len(), 3);

    let permanent = Arc::new(
        ScriptedLlm::new().on("generic_review", |_| Err(CallError::Permanent("HTTP 401".into()))),
    );
    runner(&dir, Arc::clone(&permanent))
        .run_json("api_review", "generic_review", &inputs(), &CallScope::default())
        .await
        .unwrap_err();
    assert_eq!(permanent.calls().len(), 1);
}

#[tokio::test]
async fn cancelled_scope_makes_no_calls() {
    let dir = prompts_dir();
    let llm = Arc::new(ScriptedLlm::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner(&dir, Arc::clone(&llm))
        .run_json("api_review", "generic_review", &inputs(), &CallScope::new(cancel))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn missing_template_fails_before_calling_the_model() {
    let dir = prompts_dir();
    let llm = Arc::new(ScriptedLlm::new());
    let err = runner(&dir, Arc::clone(&llm))
        .run_json("api_review", "judge_comment", &PromptInputs::new(), &CallScope::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PromptError::TemplateNotFound { .. }));
    assert!(llm.calls().is_empty());
}
