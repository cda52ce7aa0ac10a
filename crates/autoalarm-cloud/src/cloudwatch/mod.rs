//! CloudWatch alarm management.
//!
//! [`CloudWatchApi`] is the narrow surface the reconciler needs;
//! [`HttpCloudWatch`] implements it over the AWS JSON protocol.

mod engine;
mod http;

pub use engine::AlarmReconciler;
pub use http::HttpCloudWatch;

use crate::error::Result;
use autoalarm_common::types::Dimension;
use serde::{Deserialize, Serialize};

/// CloudWatch accepts at most this many names per `DeleteAlarms` call.
pub const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDimension {
    pub name: String,
    pub value: String,
}

impl From<&Dimension> for MetricDimension {
    fn from(d: &Dimension) -> Self {
        Self {
            name: d.name.clone(),
            value: d.value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<MetricDimension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricStat {
    pub metric: Metric,
    pub period: u32,
    pub stat: String,
}

/// One entry of a metric-math alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataQuery {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_stat: Option<MetricStat>,
    pub return_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Body of `PutMetricAlarm`. Creates or fully replaces the alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricAlarmRequest {
    pub alarm_name: String,
    pub alarm_description: String,
    pub actions_enabled: bool,
    pub comparison_operator: String,
    pub evaluation_periods: u32,
    pub datapoints_to_alarm: u32,
    pub treat_missing_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dimensions: Vec<MetricDimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_statistic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_metric_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub metrics: Vec<MetricDataQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleMetricAnomalyDetector {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<MetricDimension>,
    pub stat: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnomalyDetectorConfiguration {
    pub metric_timezone: String,
}

/// Body of `PutAnomalyDetector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnomalyDetectorRequest {
    pub single_metric_anomaly_detector: SingleMetricAnomalyDetector,
    pub configuration: AnomalyDetectorConfiguration,
}

/// CloudWatch operations used by [`AlarmReconciler`].
#[async_trait::async_trait]
pub trait CloudWatchApi: Send + Sync {
    async fn put_metric_alarm(&self, request: &MetricAlarmRequest) -> Result<()>;

    async fn put_anomaly_detector(&self, request: &AnomalyDetectorRequest) -> Result<()>;

    /// Names of all metric alarms whose name starts with `prefix`.
    async fn list_alarm_names(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes alarms by name, at most [`DELETE_BATCH_SIZE`] per request.
    async fn delete_alarms(&self, names: &[String]) -> Result<()>;
}
