use autoalarm_cloud::batch::BatchSettings;
use autoalarm_cloud::prometheus::PrometheusSettings;
use autoalarm_cloud::retry::LinearBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAlarmConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Resources reconciled in parallel
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Default for AutoAlarmConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            max_concurrent: default_max_concurrent(),
            prometheus: PrometheusConfig::default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Absent disables the Prometheus pathway.
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
    #[serde(default = "default_list_retry_delay_secs")]
    pub list_retry_delay_secs: u64,
    #[serde(default = "default_list_retry_attempts")]
    pub list_retry_attempts: u32,
    #[serde(default = "default_rule_limit")]
    pub rule_limit: usize,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            workspace_id: None,
            propagation_delay_secs: default_propagation_delay_secs(),
            list_retry_delay_secs: default_list_retry_delay_secs(),
            list_retry_attempts: default_list_retry_attempts(),
            rule_limit: default_rule_limit(),
        }
    }
}

impl PrometheusConfig {
    pub fn settings(&self) -> PrometheusSettings {
        PrometheusSettings {
            propagation_delay: Duration::from_secs(self.propagation_delay_secs),
            list_retry_delay: Duration::from_secs(self.list_retry_delay_secs),
            list_retry_attempts: self.list_retry_attempts,
            rule_limit: self.rule_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_increment_ms")]
    pub increment_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
            increment_ms: default_retry_increment_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            increment: Duration::from_millis(self.increment_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Target of `autoalarm enqueue`
    #[serde(default)]
    pub queue_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_fast_batch_ms")]
    pub fast_batch_ms: u64,
    #[serde(default = "default_max_batch_attempts")]
    pub max_batch_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            batch_size: default_batch_size(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            fast_batch_ms: default_fast_batch_ms(),
            max_batch_attempts: default_max_batch_attempts(),
        }
    }
}

impl DispatchConfig {
    pub fn batch_settings(&self) -> BatchSettings {
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            tracing::warn!(
                factor = self.factor,
                "Dispatch factor must be at least 1, using default"
            );
            default_factor()
        };
        BatchSettings {
            batch_size: self.batch_size,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)),
            factor,
            fast_batch: Duration::from_millis(self.fast_batch_ms),
            max_batch_attempts: self.max_batch_attempts,
        }
    }
}

fn default_region() -> String {
    std::env::var("AWS_REGION")
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "us-east-1".to_string())
}

fn default_max_concurrent() -> usize {
    5
}

fn default_propagation_delay_secs() -> u64 {
    90
}

fn default_list_retry_delay_secs() -> u64 {
    60
}

fn default_list_retry_attempts() -> u32 {
    3
}

fn default_rule_limit() -> usize {
    2000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    2000
}

fn default_retry_increment_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    10 // SendMessageBatch maximum
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_factor() -> f64 {
    1.5
}

fn default_fast_batch_ms() -> u64 {
    500
}

fn default_max_batch_attempts() -> u32 {
    3
}

impl AutoAlarmConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.prometheus
            .workspace_id
            .as_deref()
            .filter(|ws| !ws.is_empty())
    }
}
