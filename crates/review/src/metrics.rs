use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Prometheus counters and histograms of the review pipeline.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    reviews: IntCounterVec,
    sections: IntCounter,
    section_errors: IntCounter,
    comments_emitted: IntCounter,
    comments_dropped: IntCounterVec,
    llm_tokens: IntCounter,
    prompt_latency: HistogramVec,
    retrieval_failures: IntCounterVec,
    comment_confidence: Histogram,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let reviews = IntCounterVec::new(
            Opts::new("apiview_reviews_total", "Finished reviews by outcome"),
            &["outcome"],
        )?;
        let sections = IntCounter::with_opts(Opts::new(
            "apiview_sections_total",
            "Sections processed",
        ))?;
        let section_errors = IntCounter::with_opts(Opts::new(
            "apiview_section_errors_total",
            "Sections that failed retrieval or prompting",
        ))?;
        let comments_emitted = IntCounter::with_opts(Opts::new(
            "apiview_comments_emitted_total",
            "Comments in final reviews",
        ))?;
        let comments_dropped = IntCounterVec::new(
            Opts::new("apiview_comments_dropped_total", "Comments removed by pipeline stage"),
            &["stage"],
        )?;
        let llm_tokens = IntCounter::with_opts(Opts::new(
            "apiview_llm_tokens_total",
            "Prompt and completion tokens consumed",
        ))?;
        let prompt_latency = HistogramVec::new(
            HistogramOpts::new("apiview_prompt_latency_seconds", "LLM call latency by prompt")
                .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["prompt"],
        )?;
        let retrieval_failures = IntCounterVec::new(
            Opts::new("apiview_retrieval_failures_total", "Failed index queries"),
            &["index"],
        )?;
        let comment_confidence = Histogram::with_opts(
            HistogramOpts::new("apiview_comment_confidence", "Confidence of emitted comments")
                .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        )?;

        registry.register(Box::new(reviews.clone()))?;
        registry.register(Box::new(sections.clone()))?;
        registry.register(Box::new(section_errors.clone()))?;
        registry.register(Box::new(comments_emitted.clone()))?;
        registry.register(Box::new(comments_dropped.clone()))?;
        registry.register(Box::new(llm_tokens.clone()))?;
        registry.register(Box::new(prompt_latency.clone()))?;
        registry.register(Box::new(retrieval_failures.clone()))?;
        registry.register(Box::new(comment_confidence.clone()))?;

        Ok(Self {
            registry,
            reviews,
            sections,
            section_errors,
            comments_emitted,
            comments_dropped,
            llm_tokens,
            prompt_latency,
            retrieval_failures,
            comment_confidence,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn review_finished(&self, outcome: &str) {
        self.reviews.with_label_values(&[outcome]).inc();
    }

    pub fn sections_processed(&self, total: usize, failed: usize) {
        self.sections.inc_by(total as u64);
        self.section_errors.inc_by(failed as u64);
    }

    pub fn comments_dropped(&self, stage: &str, count: usize) {
        if count > 0 {
            self.comments_dropped
                .with_label_values(&[stage])
                .inc_by(count as u64);
        }
    }

    pub fn comment_emitted(&self, confidence: f32) {
        self.comments_emitted.inc();
        self.comment_confidence.observe(f64::from(confidence));
    }

    pub fn prompt_call(&self, prompt: &str, seconds: f64, tokens: u64) {
        self.prompt_latency.with_label_values(&[prompt]).observe(seconds);
        self.llm_tokens.inc_by(tokens);
    }

    /// `failure` is formatted `"<index>: <reason>"`.
    pub fn retrieval_failure(&self, failure: &str) {
        let index = failure.split(':').next().unwrap_or("unknown").trim();
        self.retrieval_failures.with_label_values(&[index]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_recorded_series() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.review_finished("succeeded");
        metrics.comments_dropped("judge", 2);
        metrics.comment_emitted(0.8);
        metrics.retrieval_failure("memories: HTTP 503");
        metrics.prompt_call("guideline_review", 0.3, 120);

        let text = metrics.render().unwrap();
        assert!(text.contains("apiview_reviews_total{outcome=\"succeeded\"} 1"));
        assert!(text.contains("apiview_comments_dropped_total{stage=\"judge\"} 2"));
        assert!(text.contains("apiview_retrieval_failures_total{index=\"memories\"} 1"));
        assert!(text.contains("apiview_llm_tokens_total 120"));
        assert!(text.contains("apiview_comment_confidence_count 1"));
    }
}
