use crate::error::{IngestError, Result};
use crate::source::UpstreamSource;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Local clone of the upstream repository, read through the `git` CLI.
pub struct GitCheckoutSource {
    repo: PathBuf,
    rev: String,
    timeout: Duration,
}

impl GitCheckoutSource {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            rev: "HEAD".to_string(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    /// Sync from `rev` (a branch, tag or commit) instead of `HEAD`.
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = rev.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        let command = args.first().copied().unwrap_or("git").to_string();
        timeout(
            self.timeout,
            tokio::process::Command::new("git")
                .arg("-C")
                .arg(&self.repo)
                .args(args)
                .output(),
        )
        .await
        .map_err(|_| IngestError::git(&command, format!("timed out after {:?}", self.timeout)))?
        .map_err(|e| IngestError::git(&command, e.to_string()))
    }

    async fn git_ok(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.git(args).await?;
        if !output.status.success() {
            let command = args.first().copied().unwrap_or("git");
            return Err(IngestError::git(
                command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

fn split_nul(stdout: &[u8]) -> Vec<String> {
    stdout
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

#[async_trait]
impl UpstreamSource for GitCheckoutSource {
    fn id(&self) -> String {
        format!("git:{}", self.repo.display())
    }

    async fn head(&self) -> Result<String> {
        let rev = format!("{}^{{commit}}", self.rev);
        let stdout = self.git_ok(&["rev-parse", "--verify", &rev]).await?;
        let head = String::from_utf8_lossy(&stdout).trim().to_string();
        if head.is_empty() {
            return Err(IngestError::git("rev-parse", "empty revision"));
        }
        Ok(head)
    }

    async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>> {
        if from.trim() == to.trim() {
            return Ok(Vec::new());
        }
        // renames show up as a delete plus an add
        let stdout = self
            .git_ok(&["diff", "--name-only", "--no-renames", "-z", from, to])
            .await?;
        let mut files = split_nul(&stdout);
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn list_files(&self, rev: &str) -> Result<Vec<String>> {
        let stdout = self
            .git_ok(&["ls-tree", "-r", "--name-only", "-z", rev])
            .await?;
        Ok(split_nul(&stdout))
    }

    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let object = format!("{rev}:{path}");
        let exists = self.git(&["cat-file", "-e", &object]).await?;
        if !exists.status.success() {
            return Ok(None);
        }
        let stdout = self.git_ok(&["show", &object]).await?;
        Ok(Some(String::from_utf8_lossy(&stdout).into_owned()))
    }
}
