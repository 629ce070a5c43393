//! Asynchronous review jobs: submission, phase tracking, cancellation and
//! retention.

use crate::error::{Result, ServiceError};
use apiview_protocol::{
    current_unix_ms, ErrorKind, JobError, JobPhase, Review, ReviewJob, ReviewRequest,
};
use apiview_review::{PreparedRequest, ReviewEngine, ReviewError};
use apiview_store::{ContainerName, DocumentStore, StoreError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns every review job of this process and persists their records.
#[derive(Clone)]
pub struct JobManager {
    store: DocumentStore,
    engine: ReviewEngine,
    retention_seconds: u64,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl JobManager {
    pub fn new(store: DocumentStore, engine: ReviewEngine, retention_seconds: u64) -> Self {
        Self {
            store,
            engine,
            retention_seconds,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn retention_seconds(&self) -> u64 {
        self.retention_seconds
    }

    /// Validate `request`, persist a queued job and start it in the background.
    ///
    /// Input errors are returned here and no job is created for them.
    pub async fn submit(&self, request: ReviewRequest) -> Result<ReviewJob> {
        let prepared = self.engine.prepare(&request)?;
        let id = uuid::Uuid::new_v4().to_string();
        let job = ReviewJob::queued(
            id.clone(),
            prepared.language.as_str().to_string(),
            fingerprint(&request),
            current_unix_ms(),
        );
        self.store.create(&job).await?;

        let cancel = CancellationToken::new();
        self.track(&id, cancel.clone());
        log::info!("job {id}: queued ({})", job.language);

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run(id, prepared, cancel).await;
        });
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ReviewJob>> {
        Ok(self.store.get::<ReviewJob>(id).await?)
    }

    /// Fire the job's cancellation token. Returns false when the job already
    /// finished.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let token = self
            .running
            .lock()
            .map_err(|_| ServiceError::Other("job table poisoned".to_string()))?
            .get(id)
            .cloned();
        if let Some(token) = token {
            log::info!("job {id}: cancellation requested");
            token.cancel();
            return Ok(true);
        }

        let job = self
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound(id.to_string()))?;
        if job.state.is_terminal() {
            return Ok(false);
        }
        // Not owned by this process; nothing will ever finish it.
        self.finish(id, Err(cancelled_error())).await?;
        Ok(true)
    }

    /// Poll until the job is terminal.
    pub async fn wait(&self, id: &str, poll: Duration) -> Result<ReviewJob> {
        loop {
            let job = self
                .get(id)
                .await?
                .ok_or_else(|| ServiceError::JobNotFound(id.to_string()))?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Delete terminal jobs whose retention has passed. Returns how many went.
    pub async fn sweep(&self, now_ms: u64) -> Result<usize> {
        let mut removed = 0usize;
        for doc in self.store.list_documents::<ReviewJob>().await? {
            if !doc.data.is_expired(now_ms, self.retention_seconds) {
                continue;
            }
            match self
                .store
                .hard_delete_if(ContainerName::ReviewJobs, &doc.id, doc.etag)
                .await
            {
                Ok(true) => removed += 1,
                Ok(false) | Err(StoreError::Conflict { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        if removed > 0 {
            log::info!("retention sweep removed {removed} job(s)");
        }
        Ok(removed)
    }

    /// Run [`JobManager::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = manager.sweep(current_unix_ms()).await {
                            log::warn!("retention sweep failed: {err}");
                        }
                    }
                }
            }
        })
    }

    fn track(&self, id: &str, cancel: CancellationToken) {
        if let Ok(mut running) = self.running.lock() {
            running.insert(id.to_string(), cancel);
        }
    }

    fn untrack(&self, id: &str) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(id);
        }
    }

    async fn run(&self, id: String, prepared: PreparedRequest, cancel: CancellationToken) {
        let started = self
            .transition(&id, JobPhase::Preparing, |job| {
                job.started_at = Some(current_unix_ms());
            })
            .await;
        let outcome = match started {
            Ok(()) => self.execute(&id, prepared, cancel).await,
            Err(err) => {
                log::warn!("job {id}: could not start: {err}");
                Err(JobError {
                    kind: err.kind(),
                    message: err.to_string(),
                    detail: None,
                })
            }
        };
        if let Err(err) = self.finish(&id, outcome).await {
            log::warn!("job {id}: final write failed: {err}");
        }
        self.untrack(&id);
    }

    async fn execute(
        &self,
        id: &str,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<Review, JobError> {
        let (phases_tx, mut phases_rx) = mpsc::unbounded_channel::<JobPhase>();
        let engine = self.engine.clone();
        // engine panics surface as a JoinError
        let handle = tokio::spawn(async move {
            let observer = move |phase: JobPhase| {
                let _ = phases_tx.send(phase);
            };
            engine.run_prepared(prepared, &cancel, &observer).await
        });

        while let Some(phase) = phases_rx.recv().await {
            if let Err(err) = self.transition(id, phase, |_| {}).await {
                log::debug!("job {id}: phase {phase:?} not recorded: {err}");
            }
        }

        let outcome = match handle.await {
            Ok(Ok(review)) => Ok(review),
            Ok(Err(err)) => Err(job_error(&err)),
            Err(join) if join.is_panic() => {
                let detail = panic_message(join.into_panic());
                log::warn!("job {id}: review panicked: {detail}");
                Err(JobError {
                    kind: ErrorKind::Fatal,
                    message: "review panicked".to_string(),
                    detail: Some(detail),
                })
            }
            Err(_) => Err(cancelled_error()),
        };
        let label = match &outcome {
            Ok(_) => "succeeded",
            Err(err) if err.kind == ErrorKind::Cancelled => "cancelled",
            Err(_) => "failed",
        };
        self.engine.metrics().review_finished(label);
        outcome
    }

    /// Move a live job to `phase`. Refused when the job is already terminal.
    async fn transition(
        &self,
        id: &str,
        phase: JobPhase,
        mut extra: impl FnMut(&mut ReviewJob),
    ) -> Result<()> {
        let next = phase.state();
        self.store
            .update::<ReviewJob, _>(id, |job| {
                if !job.state.can_transition_to(next) {
                    return Err(StoreError::invalid_input(format!(
                        "job {id} cannot move from {:?} to {next:?}",
                        job.state
                    )));
                }
                job.state = next;
                job.phase = phase;
                extra(job);
                Ok(())
            })
            .await?;
        log::debug!("job {id}: {phase:?}");
        Ok(())
    }

    async fn finish(&self, id: &str, outcome: std::result::Result<Review, JobError>) -> Result<()> {
        let (phase, summary) = match &outcome {
            Ok(review) => (JobPhase::Succeeded, format!("{} comment(s)", review.comments.len())),
            Err(err) => (JobPhase::Failed, format!("{}: {}", err.kind, err.message)),
        };
        self.transition(id, phase, |job| {
            job.finished_at = Some(current_unix_ms());
            match &outcome {
                Ok(review) => job.result = Some(review.clone()),
                Err(err) => job.error = Some(err.clone()),
            }
        })
        .await?;
        log::info!("job {id}: {phase:?} ({summary})");
        Ok(())
    }
}

/// Stable digest of what was asked, for deduplication and audit.
fn fingerprint(request: &ReviewRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.language.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.effective_base().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(request.target.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn job_error(err: &ReviewError) -> JobError {
    JobError {
        kind: err.kind(),
        message: err.to_string(),
        detail: None,
    }
}

fn cancelled_error() -> JobError {
    JobError {
        kind: ErrorKind::Cancelled,
        message: "review cancelled".to_string(),
        detail: None,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_empty_base() {
        let plain = ReviewRequest {
            target: "class A".into(),
            base: None,
            language: "python".into(),
            comments: Vec::new(),
        };
        let empty_base = ReviewRequest {
            base: Some(String::new()),
            ..plain.clone()
        };
        assert_eq!(fingerprint(&plain), fingerprint(&empty_base));
        assert_eq!(fingerprint(&plain).len(), 64);
    }

    #[test]
    fn panic_payloads_become_text() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
