use apiview_sectioner::SectionerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables of one review run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    pub sectioner: SectionerConfig,
    /// Comments whose judged confidence falls below this are dropped.
    pub judge_confidence_threshold: f32,
    /// Upper bound on concurrently running sections and judge calls.
    pub max_concurrency: usize,
    pub query_max_chars: usize,
    pub prompt_folder: String,
    /// Root of `<language>/guidance.toml` files.
    pub metadata_dir: Option<PathBuf>,
    /// Overall deadline of one review.
    #[serde(with = "duration_ms")]
    pub job_timeout: Duration,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            sectioner: SectionerConfig::default(),
            judge_confidence_threshold: 0.5,
            max_concurrency: 8,
            query_max_chars: 4000,
            prompt_folder: apiview_prompt::API_REVIEW_FOLDER.to_string(),
            metadata_dir: None,
            job_timeout: Duration::from_millis(900_000),
        }
    }
}

impl ReviewSettings {
    pub fn validate(&self) -> Result<(), String> {
        self.sectioner.validate()?;
        if !(0.0..=1.0).contains(&self.judge_confidence_threshold) {
            return Err(format!(
                "judge_confidence_threshold must be within [0, 1], got {}",
                self.judge_confidence_threshold
            ));
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be > 0".to_string());
        }
        if self.query_max_chars == 0 {
            return Err("query_max_chars must be > 0".to_string());
        }
        if self.job_timeout.is_zero() {
            return Err("job_timeout must be > 0".to_string());
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReviewSettings::default().validate().is_ok());
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let settings = ReviewSettings {
            judge_confidence_threshold: 1.5,
            ..ReviewSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn sectioner_limits_are_checked() {
        let settings = ReviewSettings {
            sectioner: SectionerConfig::with_limits(10, 10),
            ..ReviewSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
