use crate::error::{IngestError, Result};
use crate::source::UpstreamSource;
use apiview_protocol::{CallError, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";

/// Upstream repository read over the GitHub REST API.
pub struct GithubSource {
    client: reqwest::Client,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
    api_base: String,
    raw_base: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Deserialize)]
struct CompareFile {
    filename: String,
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GithubSource {
    /// `repository` is `owner/name`.
    pub fn new(repository: &str, branch: impl Into<String>, token: Option<String>) -> Result<Self> {
        let (owner, repo) = repository
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                IngestError::InvalidInput(format!("repository must be owner/name, got '{repository}'"))
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("apiview-copilot")
            .build()
            .map_err(|e| IngestError::Other(format!("http client: {e}")))?;
        Ok(Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.into(),
            token,
            api_base: API_BASE.to_string(),
            raw_base: RAW_BASE.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Point at a GitHub Enterprise or mock server.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, raw_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.raw_base = raw_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{path}", self.api_base, self.owner, self.repo)
    }

    async fn get_once(&self, url: &str) -> std::result::Result<Option<reqwest::Response>, CallError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                CallError::Transient(format!("GET {url}: {err}"))
            } else {
                CallError::Permanent(format!("GET {url}: {err}"))
            }
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), body));
        }
        Ok(Some(response))
    }

    async fn get_text(&self, url: &str) -> Result<Option<String>> {
        // callers cancel by dropping the future
        let cancel = CancellationToken::new();
        self.retry
            .run(url, &cancel, |_| async move {
                match self.get_once(url).await? {
                    Some(response) => response
                        .text()
                        .await
                        .map(Some)
                        .map_err(|e| CallError::Transient(format!("GET {url}: {e}"))),
                    None => Ok(None),
                }
            })
            .await
            .map_err(|e| IngestError::upstream(self.id(), e))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self
            .get_text(url)
            .await?
            .ok_or_else(|| IngestError::upstream(self.id(), CallError::Permanent(format!("GET {url}: 404"))))?;
        serde_json::from_str(&text).map_err(|e| {
            IngestError::upstream(self.id(), CallError::Permanent(format!("GET {url}: {e}")))
        })
    }
}

#[async_trait]
impl UpstreamSource for GithubSource {
    fn id(&self) -> String {
        format!("github:{}/{}@{}", self.owner, self.repo, self.branch)
    }

    async fn head(&self) -> Result<String> {
        let commit: CommitResponse = self.get_json(&self.api(&format!("commits/{}", self.branch))).await?;
        Ok(commit.sha)
    }

    async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>> {
        if from == to {
            return Ok(Vec::new());
        }
        let compare: CompareResponse = self.get_json(&self.api(&format!("compare/{from}...{to}"))).await?;
        let mut files: Vec<String> = compare
            .files
            .into_iter()
            .flat_map(|f| std::iter::once(f.filename).chain(f.previous_filename))
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn list_files(&self, rev: &str) -> Result<Vec<String>> {
        let tree: TreeResponse = self
            .get_json(&self.api(&format!("git/trees/{rev}?recursive=1")))
            .await?;
        if tree.truncated {
            log::warn!("{}: tree listing at {rev} was truncated", self.id());
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect())
    }

    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let url = format!("{}/{}/{}/{rev}/{path}", self.raw_base, self.owner, self.repo);
        self.get_text(&url).await
    }
}
