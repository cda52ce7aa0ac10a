use super::defaults;
use crate::statistic::Statistic;
use crate::MetricAlarmConfig;
use autoalarm_common::types::ComparisonOperator::{GreaterThanThreshold, GreaterThanUpperThreshold};
use autoalarm_common::types::MissingDataTreatment::Ignore;

pub const SERVICE: &str = "EC2";
pub const NAMESPACE: &str = "AWS/EC2";
pub const AGENT_NAMESPACE: &str = "CWAgent";

/// Alarmable EC2 instance metrics.
pub fn metric_configs() -> Vec<MetricAlarmConfig> {
    vec![
        MetricAlarmConfig {
            tag_key: "cpu".into(),
            metric_name: "CPUUtilization".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: true,
            anomaly: false,
            per_volume: false,
            prometheus_query: Some(
                r#"100 - (avg by (instance_id) (rate(node_cpu_seconds_total{mode="idle", {selector}}[5m])) * 100)"#.into(),
            ),
            defaults: defaults(
                Some(95.0),
                Some(98.0),
                300,
                2,
                Statistic::Maximum,
                2,
                GreaterThanThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "cpu-anomaly".into(),
            metric_name: "CPUUtilization".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: true,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                Some(2.0),
                Some(3.0),
                300,
                2,
                Statistic::Average,
                2,
                GreaterThanUpperThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "memory".into(),
            metric_name: "mem_used_percent".into(),
            metric_namespace: AGENT_NAMESPACE.into(),
            default_create: true,
            anomaly: false,
            per_volume: false,
            prometheus_query: Some(
                r#"100 * (1 - node_memory_MemAvailable_bytes{{selector}} / node_memory_MemTotal_bytes{{selector}})"#.into(),
            ),
            defaults: defaults(
                Some(90.0),
                Some(95.0),
                300,
                10,
                Statistic::Maximum,
                8,
                GreaterThanThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "network-in-anomaly".into(),
            metric_name: "NetworkIn".into(),
            metric_namespace: NAMESPACE.into(),
            default_create: false,
            anomaly: true,
            per_volume: false,
            prometheus_query: None,
            defaults: defaults(
                Some(2.0),
                Some(3.0),
                300,
                2,
                Statistic::Average,
                2,
                GreaterThanUpperThreshold,
                Ignore,
            ),
        },
        MetricAlarmConfig {
            tag_key: "storage".into(),
            metric_name: "disk_used_percent".into(),
            metric_namespace: AGENT_NAMESPACE.into(),
            default_create: true,
            anomaly: false,
            per_volume: true,
            prometheus_query: Some(
                r#"100 * (1 - node_filesystem_avail_bytes{fstype!="tmpfs", {selector}} / node_filesystem_size_bytes{fstype!="tmpfs", {selector}})"#.into(),
            ),
            defaults: defaults(
                Some(90.0),
                Some(95.0),
                300,
                2,
                Statistic::Maximum,
                1,
                GreaterThanThreshold,
                Ignore,
            ),
        },
    ]
}
