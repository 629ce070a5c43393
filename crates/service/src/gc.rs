use crate::error::{Result, ServiceError};
use apiview_search::SearchIndexer;
use apiview_store::{ContainerName, DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INDEXER_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub container: String,
    /// Soft-deleted rows looked at
    pub scanned: usize,
    pub purged: usize,
    /// Still indexed or rewritten during the pass, kept for the next cycle
    pub retained: usize,
}

/// Second phase of deletion: hard-deletes soft-deleted rows once the search
/// index no longer holds them.
pub struct GarbageCollector {
    store: DocumentStore,
    indexer: Arc<SearchIndexer>,
}

impl GarbageCollector {
    pub fn new(store: DocumentStore, indexer: Arc<SearchIndexer>) -> Self {
        Self { store, indexer }
    }

    pub async fn collect(&self, container: ContainerName) -> Result<GcReport> {
        let Some(index) = self.indexer.indices().get(container).cloned() else {
            return Err(ServiceError::invalid_input(format!(
                "{container} is not indexed; terminal review jobs are removed by the retention sweeper"
            )));
        };

        self.indexer.wait_for_idle(container, INDEXER_POLL).await;
        if let Err(err) = self.indexer.run(container).await {
            // rows still in the index are retained below
            log::warn!("{container}: indexer run before purge failed: {err}");
        }

        let mut report = GcReport {
            container: container.to_string(),
            ..GcReport::default()
        };
        for row in self.store.list_deleted(container).await? {
            report.scanned += 1;
            match index.get_document(&row.id).await {
                Ok(None) => match self.store.hard_delete_if(container, &row.id, row.etag).await {
                    Ok(true) => report.purged += 1,
                    Ok(false) => {}
                    Err(StoreError::Conflict { .. }) => {
                        log::info!("{container}/{}: written since listed, retained", row.id);
                        report.retained += 1;
                    }
                    Err(err) => return Err(err.into()),
                },
                Ok(Some(_)) => report.retained += 1,
                Err(err) => {
                    log::warn!("{container}/{}: index lookup failed, retained: {err}", row.id);
                    report.retained += 1;
                }
            }
        }
        log::info!(
            "gc {container}: scanned {}, purged {}, retained {}",
            report.scanned,
            report.purged,
            report.retained
        );
        Ok(report)
    }

    pub async fn collect_all(&self) -> Result<Vec<GcReport>> {
        let mut reports = Vec::new();
        for container in ContainerName::INDEXED {
            reports.push(self.collect(container).await?);
        }
        Ok(reports)
    }

    /// Run [`GarbageCollector::collect_all`] every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.collect_all().await {
                            log::warn!("garbage collection failed: {err}");
                        }
                    }
                }
            }
        })
    }
}
