//! Alarm configuration resolution for AutoAlarm.
//!
//! Everything in this crate is pure: tag override strings are parsed into
//! [`options::MetricAlarmOptions`], merged with a per-metric
//! [`MetricAlarmConfig`], and turned into the set of CloudWatch alarms
//! ([`plan`]) or Prometheus rules ([`promrule`]) a resource should have.
//! Malformed tags degrade to defaults rather than failing.

pub mod configs;
pub mod naming;
pub mod options;
pub mod plan;
pub mod promrule;
pub mod statistic;


use options::MetricAlarmOptions;
use serde::{Deserialize, Serialize};

/// Static description of one alarmable metric of a service.
///
/// Service tables live in [`configs`] and are ordered by tag key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlarmConfig {
    /// Suffix after `autoalarm:` in the override tag (e.g., `"cpu"`)
    pub tag_key: String,
    /// May be empty when the name is only known at runtime; such configs
    /// are skipped until an adapter fills it in.
    pub metric_name: String,
    pub metric_namespace: String,
    /// Create the alarm from `defaults` even without an override tag.
    pub default_create: bool,
    /// Use the anomaly-detection workflow instead of a static threshold.
    pub anomaly: bool,
    /// One alarm per storage volume of the resource.
    #[serde(default)]
    pub per_volume: bool,
    /// PromQL expression with a `{selector}` placeholder, for services that
    /// can be monitored through Prometheus.
    #[serde(default)]
    pub prometheus_query: Option<String>,
    pub defaults: MetricAlarmOptions,
}

impl MetricAlarmConfig {
    /// Full tag key carrying overrides for this metric.
    pub fn override_tag(&self) -> String {
        format!("{}{}", autoalarm_common::TAG_PREFIX, self.tag_key)
    }
}
