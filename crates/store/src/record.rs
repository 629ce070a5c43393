use apiview_protocol::{Example, Guideline, Memory, ReviewJob};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerName {
    Guidelines,
    Examples,
    Memories,
    ReviewJobs,
    Settings,
}

impl ContainerName {
    pub const ALL: [ContainerName; 5] = [
        Self::Guidelines,
        Self::Examples,
        Self::Memories,
        Self::ReviewJobs,
        Self::Settings,
    ];

    /// Containers mirrored into a search index.
    pub const INDEXED: [ContainerName; 3] = [Self::Guidelines, Self::Examples, Self::Memories];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guidelines => "guidelines",
            Self::Examples => "examples",
            Self::Memories => "memories",
            Self::ReviewJobs => "review_jobs",
            Self::Settings => "settings",
        }
    }

    pub const fn is_indexed(&self) -> bool {
        matches!(self, Self::Guidelines | Self::Examples | Self::Memories)
    }

    /// Only examples and memories may be deleted by hand.
    pub const fn is_user_deletable(&self) -> bool {
        matches!(self, Self::Examples | Self::Memories)
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerName {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "guidelines" | "guideline" => Ok(Self::Guidelines),
            "examples" | "example" => Ok(Self::Examples),
            "memories" | "memory" => Ok(Self::Memories),
            "review_jobs" | "review_job" | "jobs" => Ok(Self::ReviewJobs),
            "settings" => Ok(Self::Settings),
            other => Err(format!(
                "unknown container '{other}' (expected one of: guidelines, examples, memories, review_jobs, settings)"
            )),
        }
    }
}

/// A typed row living in exactly one container.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const CONTAINER: ContainerName;

    fn id(&self) -> &str;
}

impl Record for Guideline {
    const CONTAINER: ContainerName = ContainerName::Guidelines;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Example {
    const CONTAINER: ContainerName = ContainerName::Examples;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Memory {
    const CONTAINER: ContainerName = ContainerName::Memories;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ReviewJob {
    const CONTAINER: ContainerName = ContainerName::ReviewJobs;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Named configuration value persisted by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub id: String,
    pub value: String,
}

impl Record for Setting {
    const CONTAINER: ContainerName = ContainerName::Settings;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Stored envelope around a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument<T> {
    pub id: String,
    /// Version bumped on every write
    pub etag: u64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    pub updated_at: u64,
    pub data: T,
}

pub type RawDocument = StoredDocument<serde_json::Value>;

impl RawDocument {
    pub fn decode<T: Record>(self) -> serde_json::Result<StoredDocument<T>> {
        Ok(StoredDocument {
            id: self.id,
            etag: self.etag,
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at,
            updated_at: self.updated_at,
            data: serde_json::from_value(self.data)?,
        })
    }
}
