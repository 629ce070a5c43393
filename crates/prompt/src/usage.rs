use crate::client::TokenUsage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// One completed prompt call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub prompt: String,
    pub elapsed: Duration,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptLatency {
    pub calls: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub prompt_ms: u64,
    pub calls: u64,
    pub per_prompt: BTreeMap<String, PromptLatency>,
}

/// Accumulates token usage and latency across the calls of one review.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Mutex<Vec<CallRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, prompt: &str, elapsed: Duration, usage: TokenUsage) {
        if let Ok(mut records) = self.records.lock() {
            records.push(CallRecord {
                prompt: prompt.to_string(),
                elapsed,
                usage,
            });
        }
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let mut snapshot = UsageSnapshot::default();
        for record in self.records() {
            let ms = u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX);
            snapshot.prompt_tokens += record.usage.prompt_tokens;
            snapshot.completion_tokens += record.usage.completion_tokens;
            snapshot.prompt_ms += ms;
            snapshot.calls += 1;
            let entry = snapshot.per_prompt.entry(record.prompt).or_default();
            entry.calls += 1;
            entry.total_ms += ms;
        }
        snapshot.tokens = snapshot.prompt_tokens + snapshot.completion_tokens;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_aggregates_per_prompt() {
        let tracker = UsageTracker::new();
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
        };
        tracker.record("guideline_review", Duration::from_millis(30), usage);
        tracker.record("guideline_review", Duration::from_millis(10), usage);
        tracker.record("judge_comment", Duration::from_millis(5), TokenUsage::default());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tokens, 240);
        assert_eq!(snapshot.prompt_ms, 45);
        assert_eq!(snapshot.calls, 3);
        assert_eq!(
            snapshot.per_prompt["guideline_review"],
            PromptLatency {
                calls: 2,
                total_ms: 40
            }
        );
    }
}
