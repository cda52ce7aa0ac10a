use super::defaults;
use crate::statistic::Statistic;
use crate::MetricAlarmConfig;
use autoalarm_common::types::ComparisonOperator::{GreaterThanThreshold, GreaterThanUpperThreshold};
use autoalarm_common::types::MissingDataTreatment::{Ignore, NotBreaching};

pub const SERVICE: &str = "SQS";
pub const NAMESPACE: &str = "AWS/SQS";

/// Alarmable SQS queue metrics. None are created without an override tag.
pub fn metric_configs() -> Vec<MetricAlarmConfig> {
    vec![
        MetricAlarmConfig {
            tag_key: "age-of-oldest-message".into(),
            metric_name: "ApproximateAgeOfOldestMessage".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: false,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                None,
                None,
                300,
                1,
                Statistic::Maximum,
                1,
                GreaterThanThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "empty-receives".into(),
            metric_name: "NumberOfEmptyReceives".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: false,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                None,
                None,
                300,
                1,
                Statistic::Sum,
                1,
                GreaterThanThreshold,
                NotBreaching,
            ),
        },
        MetricAlarmConfig {
            tag_key: "messages-sent-anomaly".into(),
            metric_name: "NumberOfMessagesSent".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: true,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                Some(2.0),
                Some(5.0),
                300,
                2,
                Statistic::Average,
                2,
                GreaterThanUpperThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "messages-visible".into(),
            metric_name: "ApproximateNumberOfMessagesVisible".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: false,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                None,
                None,
                300,
                1,
                Statistic::Maximum,
                1,
                GreaterThanThreshold,
                Ignore,
            ),
        },
    ]
}
