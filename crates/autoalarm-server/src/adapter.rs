//! Per-service glue between resource IDs and the alarm engines.

use autoalarm_alert::configs::{ec2, sqs};
use autoalarm_alert::MetricAlarmConfig;
use autoalarm_common::types::ResourceIdentity;
use autoalarm_common::TAG_PREFIX;
use std::collections::HashMap;

/// `autoalarm:enabled=false` removes every alarm of the resource.
pub const ENABLED_TAG: &str = "enabled";
/// `autoalarm:target=prometheus` selects Prometheus rules over CloudWatch.
pub const TARGET_TAG: &str = "target";

pub trait ServiceAdapter: Send + Sync {
    /// Service name as used in alarm names, e.g. `EC2`
    fn service(&self) -> &'static str;

    fn identity(&self, resource_id: &str) -> ResourceIdentity;

    fn metric_configs(&self) -> Vec<MetricAlarmConfig>;

    /// Label matchers selecting this resource's series, if the service is
    /// scraped by Prometheus.
    fn prometheus_selector(&self, _identity: &ResourceIdentity) -> Option<String> {
        None
    }
}

pub struct Ec2Adapter;

impl ServiceAdapter for Ec2Adapter {
    fn service(&self) -> &'static str {
        ec2::SERVICE
    }

    fn identity(&self, resource_id: &str) -> ResourceIdentity {
        ResourceIdentity::new(ec2::SERVICE, resource_id).with_dimension("InstanceId", resource_id)
    }

    fn metric_configs(&self) -> Vec<MetricAlarmConfig> {
        ec2::metric_configs()
    }

    fn prometheus_selector(&self, identity: &ResourceIdentity) -> Option<String> {
        Some(format!(r#"instance_id="{}""#, identity.service_identifier))
    }
}

pub struct SqsAdapter;

impl ServiceAdapter for SqsAdapter {
    fn service(&self) -> &'static str {
        sqs::SERVICE
    }

    fn identity(&self, resource_id: &str) -> ResourceIdentity {
        ResourceIdentity::new(sqs::SERVICE, resource_id).with_dimension("QueueName", resource_id)
    }

    fn metric_configs(&self) -> Vec<MetricAlarmConfig> {
        sqs::metric_configs()
    }
}

/// Adapters keyed by upper-case service name.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ServiceAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self {
            adapters: vec![Box::new(Ec2Adapter), Box::new(SqsAdapter)],
        }
    }
}

impl AdapterRegistry {
    pub fn get(&self, service: &str) -> Option<&dyn ServiceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.service().eq_ignore_ascii_case(service))
            .map(|a| a.as_ref())
    }
}

fn tag<'a>(tags: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    tags.get(&format!("{TAG_PREFIX}{key}"))
        .map(|v| v.trim())
}

/// Whether the resource explicitly opted out of AutoAlarm.
pub fn is_disabled(tags: &HashMap<String, String>) -> bool {
    tag(tags, ENABLED_TAG).is_some_and(|v| v.eq_ignore_ascii_case("false"))
}

pub fn wants_prometheus(tags: &HashMap<String, String>) -> bool {
    tag(tags, TARGET_TAG).is_some_and(|v| v.eq_ignore_ascii_case("prometheus"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn should_find_adapters_case_insensitively() {
        let registry = AdapterRegistry::default();
        assert_eq!(registry.get("ec2").map(|a| a.service()), Some("EC2"));
        assert_eq!(registry.get("SQS").map(|a| a.service()), Some("SQS"));
        assert!(registry.get("rds").is_none());
    }

    #[test]
    fn should_build_identities_with_service_dimensions() {
        let identity = Ec2Adapter.identity("i-0abc");
        assert_eq!(identity.dimensions[0].name, "InstanceId");
        assert_eq!(
            Ec2Adapter.prometheus_selector(&identity).as_deref(),
            Some(r#"instance_id="i-0abc""#)
        );

        let identity = SqsAdapter.identity("orders");
        assert_eq!(identity.dimensions[0].name, "QueueName");
        assert_eq!(SqsAdapter.prometheus_selector(&identity), None);
    }

    #[test]
    fn should_read_control_tags() {
        assert!(is_disabled(&tags(&[("autoalarm:enabled", "False")])));
        assert!(!is_disabled(&tags(&[("autoalarm:enabled", "true")])));
        assert!(!is_disabled(&tags(&[])));
        assert!(wants_prometheus(&tags(&[("autoalarm:target", "prometheus")])));
        assert!(!wants_prometheus(&tags(&[("autoalarm:target", "cloudwatch")])));
    }
}
