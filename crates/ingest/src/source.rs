use crate::error::{IngestError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Read access to the repository holding the guideline corpus.
///
/// Paths are repository-relative with `/` separators.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    fn id(&self) -> String;

    /// Revision the next sync should read.
    async fn head(&self) -> Result<String>;

    /// Paths added, modified or removed between two revisions.
    async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>>;

    async fn list_files(&self, rev: &str) -> Result<Vec<String>>;

    /// `None` when `path` does not exist at `rev`.
    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>>;
}

/// A plain directory tree. The revision is a digest of every Markdown file,
/// so an untouched tree keeps its head across runs.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn markdown_files(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in walkdir::WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(|e| IngestError::Other(format!("walk {}: {e}", root.display())))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if rel.to_ascii_lowercase().ends_with(".md") {
                    files.push(rel);
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| IngestError::Other(format!("directory scan task failed: {e}")))?
    }
}

#[async_trait]
impl UpstreamSource for DirectorySource {
    fn id(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    async fn head(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for rel in self.markdown_files().await? {
            let bytes = tokio::fs::read(self.root.join(&rel)).await?;
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update(&bytes);
            hasher.update([0u8]);
        }
        Ok(hasher
            .finalize()
            .iter()
            .take(20)
            .map(|b| format!("{b:02x}"))
            .collect())
    }

    /// A directory keeps no history: every present file counts as changed and
    /// unchanged records are filtered by their content hash.
    async fn changed_files(&self, _from: &str, _to: &str) -> Result<Vec<String>> {
        self.markdown_files().await
    }

    async fn list_files(&self, _rev: &str) -> Result<Vec<String>> {
        self.markdown_files().await
    }

    async fn read_file(&self, _rev: &str, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.root.join(path)).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
