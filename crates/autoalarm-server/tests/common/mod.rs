#![allow(dead_code)]

use autoalarm_alert::promrule::NamespaceDetails;
use autoalarm_cloud::cloudwatch::{
    AlarmReconciler, AnomalyDetectorRequest, CloudWatchApi, MetricAlarmRequest,
};
use autoalarm_cloud::error::{CloudError, Result};
use autoalarm_cloud::prometheus::{
    PrometheusRulesApi, PrometheusSettings, RuleSetReconciler, WorkspaceStatus,
};
use autoalarm_cloud::retry::LinearBackoff;
use autoalarm_cloud::tagging::TagSource;
use autoalarm_server::event::{InstanceState, ResourceEvent};
use autoalarm_server::processor::{EventProcessor, PrometheusTarget};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WORKSPACE_ID: &str = "ws-test";

/// In-memory CloudWatch holding alarms by name.
#[derive(Default)]
pub struct FakeCloudWatch {
    pub alarms: Mutex<BTreeSet<String>>,
    pub puts: Mutex<Vec<MetricAlarmRequest>>,
    pub detectors: Mutex<Vec<AnomalyDetectorRequest>>,
}

impl FakeCloudWatch {
    pub fn names(&self) -> BTreeSet<String> {
        self.alarms.lock().unwrap().clone()
    }

    pub fn names_for(&self, service_identifier: &str) -> BTreeSet<String> {
        let needle = format!("-{service_identifier}-");
        self.names()
            .into_iter()
            .filter(|name| name.contains(&needle))
            .collect()
    }

    /// Stores an alarm as if an earlier run had created it.
    pub fn seed(&self, name: &str) {
        self.alarms.lock().unwrap().insert(name.to_string());
    }

    pub fn last_put(&self, name: &str) -> Option<MetricAlarmRequest> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.alarm_name == name)
            .cloned()
    }
}

#[async_trait::async_trait]
impl CloudWatchApi for FakeCloudWatch {
    async fn put_metric_alarm(&self, request: &MetricAlarmRequest) -> Result<()> {
        self.alarms.lock().unwrap().insert(request.alarm_name.clone());
        self.puts.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn put_anomaly_detector(&self, request: &AnomalyDetectorRequest) -> Result<()> {
        self.detectors.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn list_alarm_names(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .alarms
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_alarms(&self, names: &[String]) -> Result<()> {
        let mut alarms = self.alarms.lock().unwrap();
        for name in names {
            alarms.remove(name);
        }
        Ok(())
    }
}

/// In-memory rules workspace holding namespace documents by name.
pub struct FakeRules {
    pub status: Mutex<Option<WorkspaceStatus>>,
    pub namespaces: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Create and put calls, in order
    pub writes: Mutex<Vec<String>>,
}

impl FakeRules {
    pub fn new(status: Option<WorkspaceStatus>) -> Self {
        Self {
            status: Mutex::new(status),
            namespaces: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn alert_names(&self, namespace: &str) -> BTreeSet<String> {
        let namespaces = self.namespaces.lock().unwrap();
        let Some(bytes) = namespaces.get(namespace) else {
            return BTreeSet::new();
        };
        let details = NamespaceDetails::from_yaml(bytes).unwrap();
        details
            .groups
            .iter()
            .flat_map(|g| g.rules.iter().map(|r| r.alert.clone()))
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.lock().unwrap().contains_key(namespace)
    }
}

#[async_trait::async_trait]
impl PrometheusRulesApi for FakeRules {
    async fn workspace_status(&self, _workspace_id: &str) -> Result<Option<WorkspaceStatus>> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn list_namespaces(&self, _workspace_id: &str) -> Result<Vec<String>> {
        Ok(self.namespaces.lock().unwrap().keys().cloned().collect())
    }

    async fn describe_namespace(&self, _workspace_id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.namespaces.lock().unwrap().get(name).cloned())
    }

    async fn create_namespace(&self, _workspace_id: &str, name: &str, data: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().push(format!("create {name}"));
        self.namespaces
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn put_namespace(&self, _workspace_id: &str, name: &str, data: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().push(format!("put {name}"));
        let mut namespaces = self.namespaces.lock().unwrap();
        match namespaces.get_mut(name) {
            Some(existing) => {
                *existing = data.to_vec();
                Ok(())
            }
            None => Err(CloudError::NotFound {
                service: "aps".to_string(),
                message: format!("namespace {name}"),
            }),
        }
    }

    async fn delete_namespace(&self, _workspace_id: &str, name: &str) -> Result<()> {
        self.namespaces.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Tags by ARN; the first `failures` lookups are throttled.
#[derive(Default)]
pub struct FakeTags {
    pub tags: Mutex<HashMap<String, HashMap<String, String>>>,
    pub failures: Mutex<u32>,
    pub calls: Mutex<u32>,
}

impl FakeTags {
    pub fn insert(&self, arn: &str, tags: HashMap<String, String>) {
        self.tags.lock().unwrap().insert(arn.to_string(), tags);
    }
}

#[async_trait::async_trait]
impl TagSource for FakeTags {
    async fn fetch_tags(&self, arn: &str) -> Result<HashMap<String, String>> {
        *self.calls.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CloudError::Throttled {
                    service: "tagging".to_string(),
                });
            }
        }
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(arn)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct TestContext {
    pub cloudwatch: Arc<FakeCloudWatch>,
    pub rules: Arc<FakeRules>,
    pub tags: Arc<FakeTags>,
    pub processor: Arc<EventProcessor>,
}

fn no_wait_backoff() -> LinearBackoff {
    LinearBackoff {
        max_attempts: 3,
        initial_delay: Duration::ZERO,
        increment: Duration::ZERO,
    }
}

fn no_wait_settings() -> PrometheusSettings {
    PrometheusSettings {
        propagation_delay: Duration::ZERO,
        list_retry_delay: Duration::ZERO,
        ..PrometheusSettings::default()
    }
}

/// Processor over fresh fakes with the Prometheus pathway disabled.
pub fn build_test_context() -> TestContext {
    build(None)
}

/// Processor with the Prometheus pathway enabled; the fake workspace reports
/// `status` (`None` means it does not exist).
pub fn build_prometheus_context(status: Option<WorkspaceStatus>) -> TestContext {
    build(Some(status))
}

fn build(workspace: Option<Option<WorkspaceStatus>>) -> TestContext {
    let prometheus_enabled = workspace.is_some();
    let cloudwatch = Arc::new(FakeCloudWatch::default());
    let rules = Arc::new(FakeRules::new(workspace.flatten()));
    let tags = Arc::new(FakeTags::default());

    let mut processor = EventProcessor::new(
        AlarmReconciler::new(cloudwatch.clone()),
        tags.clone(),
        no_wait_backoff(),
        4,
    );
    if prometheus_enabled {
        processor = processor.with_prometheus(PrometheusTarget {
            workspace_id: WORKSPACE_ID.to_string(),
            reconciler: RuleSetReconciler::new(rules.clone(), no_wait_settings()),
        });
    }

    TestContext {
        cloudwatch,
        rules,
        tags,
        processor: Arc::new(processor),
    }
}

pub fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn instance_arn(instance_id: &str) -> String {
    format!("arn:aws:ec2:us-east-1:123456789012:instance/{instance_id}")
}

pub fn ec2_tag_change(instance_id: &str, pairs: &[(&str, &str)]) -> ResourceEvent {
    ResourceEvent::TagChange {
        service: "EC2".to_string(),
        resource_id: instance_id.to_string(),
        arn: instance_arn(instance_id),
        tags: tags(pairs),
    }
}

pub fn ec2_state_change(instance_id: &str, state: InstanceState) -> ResourceEvent {
    ResourceEvent::Ec2StateChange {
        instance_id: instance_id.to_string(),
        arn: instance_arn(instance_id),
        state,
    }
}

/// Names of the six alarms an untagged EC2 instance gets by default.
pub fn default_ec2_alarms(instance_id: &str) -> BTreeSet<String> {
    ["cpu", "memory", "storage"]
        .iter()
        .flat_map(|metric| {
            ["Warning", "Critical"]
                .iter()
                .map(move |class| format!("AutoAlarm-EC2-{instance_id}-{metric}-{class}"))
        })
        .collect()
}
