//! Application configuration types
//!
//! Each section maps onto one core component's builder-style config.

use conduit_core::{
    CircuitBreakerConfig, CommunicationConfig, EventBusConfig, JobOrchestratorConfig,
    OrchestratorConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub event_bus: EventBusSettings,
    #[serde(default)]
    pub communication: CommunicationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Orchestrator configuration (exposed to TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Timeout applied to calls whose context has no deadline
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        OrchestratorConfig::new()
            .with_default_timeout(Duration::from_secs(settings.default_timeout_secs))
    }
}

fn default_tool_timeout_secs() -> u64 {
    600
}

/// Job worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_max_retained_jobs")]
    pub max_retained_jobs: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            job_timeout_secs: default_job_timeout_secs(),
            max_retained_jobs: default_max_retained_jobs(),
        }
    }
}

impl From<&JobSettings> for JobOrchestratorConfig {
    fn from(settings: &JobSettings) -> Self {
        JobOrchestratorConfig::new()
            .with_worker_count(settings.worker_count)
            .with_queue_capacity(settings.queue_capacity)
            .with_job_timeout(Duration::from_secs(settings.job_timeout_secs))
            .with_max_retained_jobs(settings.max_retained_jobs)
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    100
}
fn default_job_timeout_secs() -> u64 {
    1800
}
fn default_max_retained_jobs() -> usize {
    1000
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            channel_capacity: default_channel_capacity(),
            max_history: default_max_history(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl From<&EventBusSettings> for EventBusConfig {
    fn from(settings: &EventBusSettings) -> Self {
        EventBusConfig::new()
            .with_worker_count(settings.worker_count)
            .with_channel_capacity(settings.channel_capacity)
            .with_max_history(settings.max_history)
            .with_handler_timeout(Duration::from_secs(settings.handler_timeout_secs))
    }
}

fn default_channel_capacity() -> usize {
    1000
}
fn default_max_history() -> usize {
    1000
}
fn default_handler_timeout_secs() -> u64 {
    30
}

/// Retry, circuit breaker and tracking limits for tool requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_breaker_max_failures")]
    pub breaker_max_failures: u32,
    #[serde(default = "default_breaker_reset_timeout_secs")]
    pub breaker_reset_timeout_secs: u64,
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
    #[serde(default = "default_max_correlations")]
    pub max_correlations: usize,
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            breaker_max_failures: default_breaker_max_failures(),
            breaker_reset_timeout_secs: default_breaker_reset_timeout_secs(),
            metrics_window: default_metrics_window(),
            max_correlations: default_max_correlations(),
        }
    }
}

impl From<&CommunicationSettings> for CommunicationConfig {
    fn from(settings: &CommunicationSettings) -> Self {
        let retry = RetryConfig::new()
            .with_max_retries(settings.max_retries)
            .with_base_delay(Duration::from_millis(settings.base_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms));
        let breaker = CircuitBreakerConfig::new()
            .with_max_failures(settings.breaker_max_failures)
            .with_reset_timeout(Duration::from_secs(settings.breaker_reset_timeout_secs));

        CommunicationConfig::new()
            .with_retry(retry)
            .with_breaker(breaker)
            .with_metrics_window(settings.metrics_window)
            .with_max_correlations(settings.max_correlations)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_breaker_max_failures() -> u32 {
    5
}
fn default_breaker_reset_timeout_secs() -> u64 {
    60
}
fn default_metrics_window() -> usize {
    100
}
fn default_max_correlations() -> usize {
    10_000
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_settings_convert() {
        let settings = CommunicationSettings {
            max_retries: 1,
            breaker_max_failures: 2,
            ..CommunicationSettings::default()
        };
        let config = CommunicationConfig::from(&settings);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.breaker.max_failures, 2);
        assert_eq!(config.breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.max_correlations, 10_000);
    }

    #[test]
    fn test_job_settings_convert() {
        let config = JobOrchestratorConfig::from(&JobSettings::default());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
    }
}
