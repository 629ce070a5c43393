use apiview_protocol::Language;
use serde::Deserialize;
use std::path::Path;

/// Extra per-language review instructions from `<metadata_dir>/<language>/guidance.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LanguageGuidance {
    /// Injected into generic review prompts.
    pub custom_rules: String,
    /// Known false positives handed to the judge.
    pub filter_exceptions: String,
}

impl LanguageGuidance {
    pub const FILE_NAME: &'static str = "guidance.toml";

    /// Missing directories or files mean no extra guidance.
    pub async fn load(metadata_dir: Option<&Path>, language: Language) -> crate::Result<Self> {
        let Some(dir) = metadata_dir else {
            return Ok(Self::default());
        };
        let path = dir.join(language.as_str()).join(Self::FILE_NAME);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        toml::from_str(&raw).map_err(|err| {
            crate::ReviewError::Other(format!("invalid {}: {err}", path.display()))
        })
    }

    pub fn custom_rules_or_none(&self) -> &str {
        non_empty_or_none(&self.custom_rules)
    }

    pub fn filter_exceptions_or_none(&self) -> &str {
        non_empty_or_none(&self.filter_exceptions)
    }
}

fn non_empty_or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "None"
    } else {
        value.trim()
    }
}
