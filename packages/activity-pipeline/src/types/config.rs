//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Exponential backoff policy shared by the fetch client and the sink adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `attempts` tries with no delay in between.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_attempts: attempts,
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
        }
    }

    /// Delay before retrying after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Fallbacks applied to vector-store metadata when a record leaves a field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataDefaults {
    pub rating: f32,
    pub duration_minutes: u32,
    pub review_count: u32,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            rating: 2.5,
            duration_minutes: 45,
            review_count: 0,
        }
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Targets processed in parallel.
    pub concurrency: usize,

    /// Upstream requests in flight across all workers.
    pub max_in_flight: usize,

    /// Request rate ceiling. Zero disables rate limiting.
    pub requests_per_second: u32,

    pub page_size: u32,

    pub max_pages_per_target: u32,

    /// Timeout of a single fetch attempt.
    pub request_timeout_ms: u64,

    /// Wall-clock budget of one target, all pages included.
    pub target_budget_ms: u64,

    pub fetch_retry: RetryPolicy,

    /// Records per sink batch.
    pub sink_batch_size: usize,

    pub sink_retry: RetryPolicy,

    /// Capacity of the queue between workers and the collector.
    pub channel_capacity: usize,

    /// Cap on targets dispatched by one run. `None` runs everything.
    pub max_targets_per_run: Option<usize>,

    pub categories: Vec<String>,

    pub metadata_defaults: MetadataDefaults,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_in_flight: 16,
            requests_per_second: 10,
            page_size: 30,
            max_pages_per_target: 50,
            request_timeout_ms: 30_000,
            target_budget_ms: 600_000,
            fetch_retry: RetryPolicy::default(),
            sink_batch_size: 100,
            sink_retry: RetryPolicy::fixed(10, Duration::from_secs(1)),
            channel_capacity: 1024,
            max_targets_per_run: None,
            categories: vec!["attractions".to_string()],
            metadata_defaults: MetadataDefaults::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages_per_target(mut self, max_pages: u32) -> Self {
        self.max_pages_per_target = max_pages;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_target_budget(mut self, budget: Duration) -> Self {
        self.target_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_sink_batch_size(mut self, size: usize) -> Self {
        self.sink_batch_size = size;
        self
    }

    pub fn with_sink_retry(mut self, policy: RetryPolicy) -> Self {
        self.sink_retry = policy;
        self
    }

    pub fn with_max_targets_per_run(mut self, max: usize) -> Self {
        self.max_targets_per_run = Some(max);
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn target_budget(&self) -> Duration {
        Duration::from_millis(self.target_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("concurrency", self.concurrency),
            ("max_in_flight", self.max_in_flight),
            ("page_size", self.page_size as usize),
            ("max_pages_per_target", self.max_pages_per_target as usize),
            ("sink_batch_size", self.sink_batch_size),
            ("channel_capacity", self.channel_capacity),
            ("fetch_retry.max_attempts", self.fetch_retry.max_attempts as usize),
            ("sink_retry.max_attempts", self.sink_retry.max_attempts as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.request_timeout_ms == 0 || self.target_budget_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts",
                reason: "must be greater than zero".into(),
            });
        }

        if self.categories.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "categories",
                reason: "at least one category is required".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"concurrency": 2, "fetch_retry": {"max_attempts": 3}}"#).unwrap();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.fetch_retry.max_attempts, 3);
        assert_eq!(config.fetch_retry.initial_delay_ms, 500);
        assert_eq!(config.categories, vec!["attractions"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = PipelineConfig::default().with_concurrency(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "concurrency", .. }));
    }
}
