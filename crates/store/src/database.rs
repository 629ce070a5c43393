use crate::backend::{FileBackend, MemoryBackend, Precondition, StoreBackend};
use crate::error::{Result, StoreError};
use crate::record::{ContainerName, RawDocument, Record, Setting, StoredDocument};
use apiview_protocol::current_unix_ms;
use std::path::PathBuf;
use std::sync::Arc;

/// Row counts for one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ContainerCounts {
    pub live: usize,
    pub deleted: usize,
}

/// Typed gateway over a [`StoreBackend`].
///
/// Writes are optimistic: a write that loses the compare-and-swap is retried
/// once against the fresh row, and a second loss surfaces as
/// [`StoreError::Conflict`].
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StoreBackend>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(root)))
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Live row by id.
    pub async fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        Ok(self
            .get_document::<T>(id)
            .await?
            .filter(|d| !d.is_deleted)
            .map(|d| d.data))
    }

    /// Row envelope by id, including soft-deleted rows.
    pub async fn get_document<T: Record>(&self, id: &str) -> Result<Option<StoredDocument<T>>> {
        match self.backend.read(T::CONTAINER, id).await? {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn get_raw(&self, container: ContainerName, id: &str) -> Result<Option<RawDocument>> {
        self.backend.read(container, id).await
    }

    /// Live rows sorted by id.
    pub async fn list<T: Record>(&self) -> Result<Vec<T>> {
        Ok(self
            .list_documents::<T>()
            .await?
            .into_iter()
            .filter(|d| !d.is_deleted)
            .map(|d| d.data)
            .collect())
    }

    pub async fn list_documents<T: Record>(&self) -> Result<Vec<StoredDocument<T>>> {
        let mut docs = self
            .backend
            .list(T::CONTAINER)
            .await?
            .into_iter()
            .map(RawDocument::decode)
            .collect::<serde_json::Result<Vec<StoredDocument<T>>>>()?;
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    /// Soft-deleted rows awaiting garbage collection.
    pub async fn list_deleted(&self, container: ContainerName) -> Result<Vec<RawDocument>> {
        let mut rows: Vec<RawDocument> = self
            .backend
            .list(container)
            .await?
            .into_iter()
            .filter(|d| d.is_deleted)
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    pub async fn query<T: Record>(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        Ok(self.list::<T>().await?.into_iter().filter(|r| predicate(r)).collect())
    }

    pub async fn counts(&self, container: ContainerName) -> Result<ContainerCounts> {
        let rows = self.backend.list(container).await?;
        let deleted = rows.iter().filter(|r| r.is_deleted).count();
        Ok(ContainerCounts {
            live: rows.len() - deleted,
            deleted,
        })
    }

    /// Insert a new row. A soft-deleted row with the same id is replaced.
    pub async fn create<T: Record>(&self, record: &T) -> Result<u64> {
        let id = record.id().to_string();
        let precondition = match self.backend.read(T::CONTAINER, &id).await? {
            None => Precondition::Absent,
            Some(existing) if existing.is_deleted => Precondition::Etag(existing.etag),
            Some(_) => {
                return Err(StoreError::AlreadyExists {
                    container: T::CONTAINER,
                    id,
                })
            }
        };
        self.backend
            .write(T::CONTAINER, envelope(record)?, precondition)
            .await
    }

    /// Insert or overwrite a row, reviving it if soft-deleted.
    pub async fn upsert<T: Record>(&self, record: &T) -> Result<u64> {
        let id = record.id().to_string();
        let mut last_conflict = None;
        for attempt in 0..2 {
            let precondition = match self.backend.read(T::CONTAINER, &id).await? {
                Some(existing) => Precondition::Etag(existing.etag),
                None => Precondition::Absent,
            };
            match self
                .backend
                .write(T::CONTAINER, envelope(record)?, precondition)
                .await
            {
                Ok(etag) => return Ok(etag),
                Err(err @ StoreError::Conflict { .. }) => {
                    log::debug!("upsert {}/{id} lost CAS (attempt {})", T::CONTAINER, attempt + 1);
                    last_conflict = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| StoreError::conflict(T::CONTAINER, id)))
    }

    /// Write `record` only if the stored etag still equals `etag`. Never retried.
    pub async fn replace_if<T: Record>(&self, record: &T, etag: u64) -> Result<u64> {
        self.backend
            .write(T::CONTAINER, envelope(record)?, Precondition::Etag(etag))
            .await
    }

    /// Read-modify-write of a live row.
    ///
    /// `mutate` may run twice when the first write loses the CAS; returning
    /// `Err` aborts without writing.
    pub async fn update<T, F>(&self, id: &str, mut mutate: F) -> Result<T>
    where
        T: Record,
        F: FnMut(&mut T) -> Result<()>,
    {
        let mut last_conflict = None;
        for attempt in 0..2 {
            let current = self
                .get_document::<T>(id)
                .await?
                .filter(|d| !d.is_deleted)
                .ok_or_else(|| StoreError::not_found(T::CONTAINER, id))?;
            let etag = current.etag;
            let mut data = current.data;
            mutate(&mut data)?;
            if data.id() != id {
                return Err(StoreError::invalid_input(format!(
                    "update of {}/{id} must not change the id",
                    T::CONTAINER
                )));
            }
            match self
                .backend
                .write(T::CONTAINER, envelope(&data)?, Precondition::Etag(etag))
                .await
            {
                Ok(_) => return Ok(data),
                Err(err @ StoreError::Conflict { .. }) => {
                    log::debug!("update {}/{id} lost CAS (attempt {})", T::CONTAINER, attempt + 1);
                    last_conflict = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| StoreError::conflict(T::CONTAINER, id)))
    }

    /// First phase of deletion: flag the row. Returns false if it was missing
    /// or already flagged.
    pub async fn soft_delete(&self, container: ContainerName, id: &str) -> Result<bool> {
        for attempt in 0..2 {
            let Some(mut row) = self.backend.read(container, id).await? else {
                return Ok(false);
            };
            if row.is_deleted {
                return Ok(false);
            }
            let etag = row.etag;
            let now = current_unix_ms();
            row.is_deleted = true;
            row.deleted_at = Some(now);
            row.updated_at = now;
            match self.backend.write(container, row, Precondition::Etag(etag)).await {
                Ok(_) => {
                    log::info!("soft-deleted {container}/{id}");
                    return Ok(true);
                }
                Err(StoreError::Conflict { .. }) if attempt == 0 => continue,
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::conflict(container, id))
    }

    /// Second phase of deletion: remove the row for good.
    pub async fn hard_delete(&self, container: ContainerName, id: &str) -> Result<bool> {
        self.remove_row(container, id, None).await
    }

    /// Like [`DocumentStore::hard_delete`], but only while the row still has
    /// `etag`. A row written since it was read yields [`StoreError::Conflict`].
    pub async fn hard_delete_if(&self, container: ContainerName, id: &str, etag: u64) -> Result<bool> {
        self.remove_row(container, id, Some(etag)).await
    }

    async fn remove_row(&self, container: ContainerName, id: &str, etag: Option<u64>) -> Result<bool> {
        let removed = self.backend.remove(container, id, etag).await?;
        if removed {
            log::info!("hard-deleted {container}/{id}");
        }
        Ok(removed)
    }

    pub async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get::<Setting>(name).await?.map(|s| s.value))
    }

    pub async fn put_setting(&self, name: &str, value: &str) -> Result<()> {
        self.upsert(&Setting {
            id: name.to_string(),
            value: value.to_string(),
        })
        .await
        .map(|_| ())
    }
}

fn envelope<T: Record>(record: &T) -> Result<RawDocument> {
    Ok(StoredDocument {
        id: record.id().to_string(),
        etag: 0,
        is_deleted: false,
        deleted_at: None,
        updated_at: current_unix_ms(),
        data: serde_json::to_value(record)?,
    })
}
