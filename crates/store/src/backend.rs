use crate::error::{Result, StoreError};
use crate::record::{ContainerName, RawDocument};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Write condition checked atomically by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No row with this id may exist
    Absent,
    /// The row's current etag must match
    Etag(u64),
}

impl Precondition {
    fn holds(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (Self::Absent, None) => true,
            (Self::Etag(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

/// Storage engine behind the document store.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn read(&self, container: ContainerName, id: &str) -> Result<Option<RawDocument>>;

    async fn list(&self, container: ContainerName) -> Result<Vec<RawDocument>>;

    /// Write `doc` if `precondition` holds. The backend assigns the new etag and returns it.
    async fn write(
        &self,
        container: ContainerName,
        doc: RawDocument,
        precondition: Precondition,
    ) -> Result<u64>;

    /// Remove a row. Returns whether it existed.
    ///
    /// With `etag`, the row is removed only while it still carries that etag;
    /// otherwise the call fails with [`StoreError::Conflict`].
    async fn remove(&self, container: ContainerName, id: &str, etag: Option<u64>) -> Result<bool>;
}

fn next_etag(precondition: Precondition) -> u64 {
    match precondition {
        Precondition::Absent => 1,
        Precondition::Etag(current) => current + 1,
    }
}

/// Process-local backend used by tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryBackend {
    containers: RwLock<HashMap<ContainerName, BTreeMap<String, RawDocument>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn read(&self, container: ContainerName, id: &str) -> Result<Option<RawDocument>> {
        let guard = self.containers.read().await;
        Ok(guard.get(&container).and_then(|rows| rows.get(id)).cloned())
    }

    async fn list(&self, container: ContainerName) -> Result<Vec<RawDocument>> {
        let guard = self.containers.read().await;
        Ok(guard
            .get(&container)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn write(
        &self,
        container: ContainerName,
        mut doc: RawDocument,
        precondition: Precondition,
    ) -> Result<u64> {
        let mut guard = self.containers.write().await;
        let rows = guard.entry(container).or_default();
        let current = rows.get(&doc.id).map(|d| d.etag);
        if !precondition.holds(current) {
            return Err(StoreError::conflict(container, doc.id));
        }
        let etag = next_etag(precondition);
        doc.etag = etag;
        rows.insert(doc.id.clone(), doc);
        Ok(etag)
    }

    async fn remove(&self, container: ContainerName, id: &str, etag: Option<u64>) -> Result<bool> {
        let mut guard = self.containers.write().await;
        let Some(rows) = guard.get_mut(&container) else {
            return Ok(false);
        };
        let Some(current) = rows.get(id).map(|d| d.etag) else {
            return Ok(false);
        };
        if etag.is_some_and(|expected| expected != current) {
            return Err(StoreError::conflict(container, id));
        }
        Ok(rows.remove(id).is_some())
    }
}

/// One JSON file per row under `<root>/<container>/`.
///
/// Writes go through a temp file and rename; compare-and-swap holds an
/// exclusive lock on `<root>/<container>/.lock`.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: ContainerName) -> PathBuf {
        self.root.join(container.as_str())
    }

    fn row_path(&self, container: ContainerName, id: &str) -> PathBuf {
        self.container_dir(container)
            .join(format!("{}.json", encode_file_stem(id)))
    }

    async fn lock_container(&self, container: ContainerName) -> Result<ContainerLock> {
        let dir = self.container_dir(container);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(".lock");

        tokio::task::spawn_blocking(move || -> Result<ContainerLock> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|err| StoreError::Other(format!("open lock {}: {err}", path.display())))?;
            file.lock_exclusive().map_err(|err| {
                StoreError::Other(format!("acquire lock {}: {err}", path.display()))
            })?;
            Ok(ContainerLock { file })
        })
        .await
        .map_err(|err| StoreError::Other(format!("join lock task: {err}")))?
    }
}

struct ContainerLock {
    file: std::fs::File,
}

impl Drop for ContainerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

async fn read_row(path: &Path) -> Result<Option<RawDocument>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn read(&self, container: ContainerName, id: &str) -> Result<Option<RawDocument>> {
        read_row(&self.row_path(container, id)).await
    }

    async fn list(&self, container: ContainerName) -> Result<Vec<RawDocument>> {
        let dir = self.container_dir(container);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut rows = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(row) = read_row(&path).await? {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn write(
        &self,
        container: ContainerName,
        mut doc: RawDocument,
        precondition: Precondition,
    ) -> Result<u64> {
        let _lock = self.lock_container(container).await?;
        let path = self.row_path(container, &doc.id);
        let current = read_row(&path).await?.map(|d| d.etag);
        if !precondition.holds(current) {
            return Err(StoreError::conflict(container, doc.id));
        }

        let etag = next_etag(precondition);
        doc.etag = etag;
        let bytes = serde_json::to_vec_pretty(&doc)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(etag)
    }

    async fn remove(&self, container: ContainerName, id: &str, etag: Option<u64>) -> Result<bool> {
        let _lock = self.lock_container(container).await?;
        let path = self.row_path(container, id);
        if let Some(expected) = etag {
            match read_row(&path).await? {
                None => return Ok(false),
                Some(row) if row.etag != expected => return Err(StoreError::conflict(container, id)),
                Some(_) => {}
            }
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_.-]` so ids map to unique file names.
fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stems_are_unique_and_safe() {
        assert_eq!(encode_file_stem("python_naming=html=snake-case"), "python_naming%3Dhtml%3Dsnake-case");
        assert_eq!(encode_file_stem("a/b"), "a%2Fb");
        assert_eq!(encode_file_stem(".hidden"), "%2Ehidden");
        assert_ne!(encode_file_stem("a#b"), encode_file_stem("a_b"));
    }

    #[test]
    fn preconditions() {
        assert!(Precondition::Absent.holds(None));
        assert!(!Precondition::Absent.holds(Some(1)));
        assert!(Precondition::Etag(2).holds(Some(2)));
        assert!(!Precondition::Etag(2).holds(Some(3)));
        assert!(!Precondition::Etag(2).holds(None));
    }
}
