use super::{
    AnomalyDetectorConfiguration, AnomalyDetectorRequest, CloudWatchApi, Metric,
    MetricAlarmRequest, MetricDataQuery, MetricDimension, MetricStat,
    SingleMetricAnomalyDetector,
};
use crate::error::Result;
use autoalarm_alert::naming::resource_prefix;
use autoalarm_alert::plan::{plan_alarms, AlarmSpec};
use autoalarm_alert::MetricAlarmConfig;
use autoalarm_common::types::{AlarmVariant, ResourceIdentity};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const METRIC_QUERY_ID: &str = "m1";
const BAND_QUERY_ID: &str = "ad1";

/// Brings the CloudWatch alarms of one resource in line with its tags.
///
/// Callers must not reconcile the same resource concurrently: the final
/// list-and-delete step assumes it is the only writer for that name prefix.
pub struct AlarmReconciler {
    api: Arc<dyn CloudWatchApi>,
}

impl AlarmReconciler {
    pub fn new(api: Arc<dyn CloudWatchApi>) -> Self {
        Self { api }
    }

    /// Creates or updates every wanted alarm, then deletes every other alarm
    /// under the resource's name prefix. Returns the keep set.
    ///
    /// Individual put and delete failures are logged and skipped; only the
    /// alarms that were written successfully end up in the keep set. When the
    /// prefix listing fails, only the names the plans retired are deleted.
    pub async fn reconcile(
        &self,
        resource: &ResourceIdentity,
        tags: &HashMap<String, String>,
        configs: &[MetricAlarmConfig],
    ) -> BTreeSet<String> {
        let mut keep = BTreeSet::new();
        let mut retired = BTreeSet::new();

        for config in configs {
            if config.metric_name.is_empty() {
                tracing::warn!(
                    resource = %resource.service_identifier,
                    metric = %config.tag_key,
                    "Metric name unresolved, skipping config"
                );
                continue;
            }

            let plan = plan_alarms(resource, config, tags);
            retired.extend(plan.retired);
            if plan.opted_out {
                tracing::debug!(
                    resource = %resource.service_identifier,
                    metric = %config.tag_key,
                    "No thresholds wanted, alarms will be removed"
                );
                continue;
            }

            for spec in &plan.desired {
                match self.put_alarm(spec).await {
                    Ok(()) => {
                        tracing::info!(alarm = %spec.name, threshold = spec.threshold, "Alarm upserted");
                        keep.insert(spec.name.clone());
                    }
                    Err(e) => {
                        tracing::error!(alarm = %spec.name, error = %e, "Failed to upsert alarm");
                    }
                }
            }
        }

        let prefix = resource_prefix(&resource.service, &resource.service_identifier);
        let stale: Vec<String> = match self.api.list_alarm_names(&prefix).await {
            Ok(existing) => existing
                .into_iter()
                .filter(|name| !keep.contains(name))
                .collect(),
            Err(e) => {
                tracing::error!(
                    resource = %resource.service_identifier,
                    error = %e,
                    "Failed to list existing alarms, deleting retired names only"
                );
                retired
                    .into_iter()
                    .filter(|name| !keep.contains(name))
                    .collect()
            }
        };

        if !stale.is_empty() {
            match self.api.delete_alarms(&stale).await {
                Ok(()) => tracing::info!(
                    resource = %resource.service_identifier,
                    deleted = stale.len(),
                    "Deleted stale alarms"
                ),
                Err(e) => tracing::error!(
                    resource = %resource.service_identifier,
                    error = %e,
                    "Failed to delete stale alarms"
                ),
            }
        }

        keep
    }

    /// Removes every managed alarm of a resource. Returns how many were deleted.
    pub async fn delete_all_alarms(&self, service: &str, service_identifier: &str) -> Result<usize> {
        let prefix = resource_prefix(service, service_identifier);
        let existing = self.api.list_alarm_names(&prefix).await?;
        if existing.is_empty() {
            return Ok(0);
        }
        self.api.delete_alarms(&existing).await?;
        tracing::info!(
            resource = %service_identifier,
            deleted = existing.len(),
            "Deleted all alarms"
        );
        Ok(existing.len())
    }

    async fn put_alarm(&self, spec: &AlarmSpec) -> Result<()> {
        match spec.variant {
            AlarmVariant::Static => self.api.put_metric_alarm(&static_request(spec)).await,
            AlarmVariant::Anomaly => {
                self.api.put_anomaly_detector(&detector_request(spec)).await?;
                self.api.put_metric_alarm(&anomaly_request(spec)).await
            }
        }
    }
}

fn dimensions(spec: &AlarmSpec) -> Vec<MetricDimension> {
    spec.dimensions.iter().map(MetricDimension::from).collect()
}

fn base_request(spec: &AlarmSpec) -> MetricAlarmRequest {
    let options = &spec.options;
    MetricAlarmRequest {
        alarm_name: spec.name.clone(),
        alarm_description: spec.description.clone(),
        actions_enabled: false,
        comparison_operator: options.comparison_operator.as_str().to_string(),
        evaluation_periods: options.evaluation_periods,
        datapoints_to_alarm: options.datapoints_to_alarm,
        treat_missing_data: options.missing_data_treatment.as_str().to_string(),
        metric_name: None,
        namespace: None,
        dimensions: Vec::new(),
        period: None,
        statistic: None,
        extended_statistic: None,
        threshold: None,
        threshold_metric_id: None,
        metrics: Vec::new(),
    }
}

fn static_request(spec: &AlarmSpec) -> MetricAlarmRequest {
    let statistic = spec.options.statistic.to_string();
    let (statistic, extended_statistic) = if spec.options.statistic.is_extended() {
        (None, Some(statistic))
    } else {
        (Some(statistic), None)
    };

    MetricAlarmRequest {
        metric_name: Some(spec.metric_name.clone()),
        namespace: Some(spec.metric_namespace.clone()),
        dimensions: dimensions(spec),
        period: Some(spec.options.period),
        statistic,
        extended_statistic,
        threshold: Some(spec.threshold),
        ..base_request(spec)
    }
}

fn detector_request(spec: &AlarmSpec) -> AnomalyDetectorRequest {
    AnomalyDetectorRequest {
        single_metric_anomaly_detector: SingleMetricAnomalyDetector {
            namespace: spec.metric_namespace.clone(),
            metric_name: spec.metric_name.clone(),
            dimensions: dimensions(spec),
            stat: spec.options.statistic.to_string(),
        },
        configuration: AnomalyDetectorConfiguration {
            metric_timezone: "UTC".to_string(),
        },
    }
}

/// `spec.threshold` is the band width in standard deviations here.
fn anomaly_request(spec: &AlarmSpec) -> MetricAlarmRequest {
    let metric = MetricDataQuery {
        id: METRIC_QUERY_ID.to_string(),
        expression: None,
        metric_stat: Some(MetricStat {
            metric: Metric {
                namespace: spec.metric_namespace.clone(),
                metric_name: spec.metric_name.clone(),
                dimensions: dimensions(spec),
            },
            period: spec.options.period,
            stat: spec.options.statistic.to_string(),
        }),
        return_data: true,
        label: None,
    };
    let band = MetricDataQuery {
        id: BAND_QUERY_ID.to_string(),
        expression: Some(format!(
            "ANOMALY_DETECTION_BAND({METRIC_QUERY_ID}, {})",
            spec.threshold
        )),
        metric_stat: None,
        return_data: true,
        label: Some(format!("{} (expected)", spec.metric_name)),
    };

    MetricAlarmRequest {
        threshold_metric_id: Some(BAND_QUERY_ID.to_string()),
        metrics: vec![metric, band],
        ..base_request(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use autoalarm_alert::configs::ec2;
    use autoalarm_common::types::StorageVolume;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCloudWatch {
        alarms: Mutex<BTreeMap<String, MetricAlarmRequest>>,
        detectors: Mutex<Vec<AnomalyDetectorRequest>>,
        failing: HashSet<String>,
        list_unavailable: bool,
    }

    impl FakeCloudWatch {
        fn with_alarms(names: &[&str]) -> Self {
            let fake = Self::default();
            {
                let mut alarms = fake.alarms.lock().unwrap();
                for name in names {
                    alarms.insert(name.to_string(), placeholder(name));
                }
            }
            fake
        }

        fn names(&self) -> Vec<String> {
            self.alarms.lock().unwrap().keys().cloned().collect()
        }

        fn alarm(&self, name: &str) -> MetricAlarmRequest {
            self.alarms.lock().unwrap()[name].clone()
        }
    }

    fn placeholder(name: &str) -> MetricAlarmRequest {
        MetricAlarmRequest {
            alarm_name: name.to_string(),
            alarm_description: String::new(),
            actions_enabled: false,
            comparison_operator: "GreaterThanThreshold".into(),
            evaluation_periods: 1,
            datapoints_to_alarm: 1,
            treat_missing_data: "missing".into(),
            metric_name: None,
            namespace: None,
            dimensions: vec![],
            period: None,
            statistic: None,
            extended_statistic: None,
            threshold: None,
            threshold_metric_id: None,
            metrics: vec![],
        }
    }

    #[async_trait::async_trait]
    impl CloudWatchApi for FakeCloudWatch {
        async fn put_metric_alarm(&self, request: &MetricAlarmRequest) -> Result<()> {
            if self.failing.contains(&request.alarm_name) {
                return Err(CloudError::ApiResponseError {
                    service: "monitoring".into(),
                    code: "LimitExceeded".into(),
                    message: "too many alarms".into(),
                });
            }
            self.alarms
                .lock()
                .unwrap()
                .insert(request.alarm_name.clone(), request.clone());
            Ok(())
        }

        async fn put_anomaly_detector(&self, request: &AnomalyDetectorRequest) -> Result<()> {
            self.detectors.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn list_alarm_names(&self, prefix: &str) -> Result<Vec<String>> {
            if self.list_unavailable {
                return Err(CloudError::Throttled {
                    service: "monitoring".into(),
                });
            }
            Ok(self
                .names()
                .into_iter()
                .filter(|n| n.starts_with(prefix))
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

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ec2_config(tag_key: &str) -> MetricAlarmConfig {
        ec2::metric_configs()
            .into_iter()
            .find(|c| c.tag_key == tag_key)
            .unwrap()
    }

    fn opt_in_cpu() -> MetricAlarmConfig {
        MetricAlarmConfig {
            default_create: false,
            ..ec2_config("cpu")
        }
    }

    fn instance() -> ResourceIdentity {
        ResourceIdentity::new("EC2", "i-0abc").with_dimension("InstanceId", "i-0abc")
    }

    fn reconciler(fake: &Arc<FakeCloudWatch>) -> AlarmReconciler {
        AlarmReconciler::new(fake.clone())
    }

    #[tokio::test]
    async fn should_create_warning_and_critical_alarms_from_tag_override() {
        let fake = Arc::new(FakeCloudWatch::default());
        let tags = tags(&[("autoalarm:cpu", "80/95/60/5/Maximum/5/GreaterThanThreshold/ignore")]);

        let keep = reconciler(&fake)
            .reconcile(&instance(), &tags, &[opt_in_cpu()])
            .await;

        let expected: BTreeSet<String> = [
            "AutoAlarm-EC2-i-0abc-cpu-Critical".to_string(),
            "AutoAlarm-EC2-i-0abc-cpu-Warning".to_string(),
        ]
        .into();
        assert_eq!(keep, expected);
        assert_eq!(fake.names(), keep.iter().cloned().collect::<Vec<_>>());

        let warning = fake.alarm("AutoAlarm-EC2-i-0abc-cpu-Warning");
        assert_eq!(warning.threshold, Some(80.0));
        assert_eq!(warning.period, Some(60));
        assert_eq!(warning.evaluation_periods, 5);
        assert_eq!(warning.statistic.as_deref(), Some("Maximum"));
        assert_eq!(warning.extended_statistic, None);
        assert_eq!(warning.treat_missing_data, "ignore");
        assert!(!warning.actions_enabled);
        assert_eq!(
            warning.dimensions,
            vec![MetricDimension {
                name: "InstanceId".into(),
                value: "i-0abc".into()
            }]
        );

        let critical = fake.alarm("AutoAlarm-EC2-i-0abc-cpu-Critical");
        assert_eq!(critical.threshold, Some(95.0));
    }

    #[tokio::test]
    async fn should_delete_warning_alarm_when_its_threshold_is_disabled() {
        let fake = Arc::new(FakeCloudWatch::default());
        let rec = reconciler(&fake);
        rec.reconcile(
            &instance(),
            &tags(&[("autoalarm:cpu", "80/95/60/5/Maximum/5/GreaterThanThreshold/ignore")]),
            &[opt_in_cpu()],
        )
        .await;

        let keep = rec
            .reconcile(
                &instance(),
                &tags(&[("autoalarm:cpu", "-/97/60/5/Maximum/5/GreaterThanThreshold/ignore")]),
                &[opt_in_cpu()],
            )
            .await;

        assert_eq!(keep.len(), 1);
        assert_eq!(fake.names(), vec!["AutoAlarm-EC2-i-0abc-cpu-Critical".to_string()]);
        assert_eq!(
            fake.alarm("AutoAlarm-EC2-i-0abc-cpu-Critical").threshold,
            Some(97.0)
        );
    }

    #[tokio::test]
    async fn should_remove_existing_alarms_when_config_is_not_opted_in() {
        let fake = Arc::new(FakeCloudWatch::with_alarms(&[
            "AutoAlarm-EC2-i-0abc-cpu-Warning",
            "AutoAlarm-EC2-i-0abc-cpu-anomaly-Critical",
        ]));

        let keep = reconciler(&fake)
            .reconcile(&instance(), &HashMap::new(), &[opt_in_cpu()])
            .await;

        assert!(keep.is_empty());
        assert!(fake.names().is_empty());
    }

    #[tokio::test]
    async fn should_delete_retired_alarms_when_listing_fails() {
        let seeded = FakeCloudWatch::with_alarms(&[
            "AutoAlarm-EC2-i-0abc-cpu-Warning",
            "AutoAlarm-EC2-i-0abc-custom-Warning",
        ]);
        let fake = Arc::new(FakeCloudWatch {
            list_unavailable: true,
            ..seeded
        });

        let keep = reconciler(&fake)
            .reconcile(
                &instance(),
                &tags(&[("autoalarm:cpu", "-/97/60/5/Maximum/5/GreaterThanThreshold/ignore")]),
                &[opt_in_cpu()],
            )
            .await;

        assert_eq!(keep.len(), 1);
        assert_eq!(
            fake.names(),
            vec![
                "AutoAlarm-EC2-i-0abc-cpu-Critical".to_string(),
                "AutoAlarm-EC2-i-0abc-custom-Warning".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn should_keep_exactly_the_alarms_with_resolved_thresholds() {
        let fake = Arc::new(FakeCloudWatch::default());
        let configs = ec2::metric_configs();
        let tags = tags(&[("autoalarm:memory", "-/92")]);

        let keep = reconciler(&fake)
            .reconcile(&instance(), &tags, &configs)
            .await;

        let expected: BTreeSet<String> = [
            "AutoAlarm-EC2-i-0abc-cpu-Critical",
            "AutoAlarm-EC2-i-0abc-cpu-Warning",
            "AutoAlarm-EC2-i-0abc-memory-Critical",
            "AutoAlarm-EC2-i-0abc-storage-Critical",
            "AutoAlarm-EC2-i-0abc-storage-Warning",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(keep, expected);
    }

    #[tokio::test]
    async fn should_use_extended_statistic_field_for_percentiles() {
        let fake = Arc::new(FakeCloudWatch::default());
        let tags = tags(&[("autoalarm:cpu", "80/95/60/5/P99")]);

        reconciler(&fake)
            .reconcile(&instance(), &tags, &[opt_in_cpu()])
            .await;

        let alarm = fake.alarm("AutoAlarm-EC2-i-0abc-cpu-Warning");
        assert_eq!(alarm.statistic, None);
        assert_eq!(alarm.extended_statistic.as_deref(), Some("p99"));
    }

    #[tokio::test]
    async fn should_normalize_period_before_put() {
        let fake = Arc::new(FakeCloudWatch::default());
        let tags = tags(&[("autoalarm:cpu", "80/95/61")]);

        reconciler(&fake)
            .reconcile(&instance(), &tags, &[opt_in_cpu()])
            .await;

        assert_eq!(fake.alarm("AutoAlarm-EC2-i-0abc-cpu-Warning").period, Some(120));
    }

    #[tokio::test]
    async fn should_create_detector_and_band_alarm_for_anomaly_configs() {
        let fake = Arc::new(FakeCloudWatch::default());
        let tags = tags(&[("autoalarm:cpu-anomaly", "2/-")]);

        let keep = reconciler(&fake)
            .reconcile(&instance(), &tags, &[ec2_config("cpu-anomaly")])
            .await;

        assert_eq!(
            keep.into_iter().collect::<Vec<_>>(),
            vec!["AutoAlarm-EC2-i-0abc-cpu-anomaly-anomaly-Warning".to_string()]
        );

        let detectors = fake.detectors.lock().unwrap().clone();
        assert_eq!(detectors.len(), 1);
        let detector = &detectors[0].single_metric_anomaly_detector;
        assert_eq!(detector.metric_name, "CPUUtilization");
        assert_eq!(detector.stat, "Average");
        assert_eq!(detectors[0].configuration.metric_timezone, "UTC");

        let alarm = fake.alarm("AutoAlarm-EC2-i-0abc-cpu-anomaly-anomaly-Warning");
        assert_eq!(alarm.threshold, None);
        assert_eq!(alarm.metric_name, None);
        assert_eq!(alarm.threshold_metric_id.as_deref(), Some("ad1"));
        assert_eq!(alarm.metrics.len(), 2);
        assert_eq!(
            alarm.metrics[1].expression.as_deref(),
            Some("ANOMALY_DETECTION_BAND(m1, 2)")
        );
        assert_eq!(alarm.metrics[0].metric_stat.as_ref().unwrap().period, 300);
    }

    #[tokio::test]
    async fn should_continue_with_siblings_when_one_put_fails() {
        let fake = Arc::new(FakeCloudWatch {
            failing: ["AutoAlarm-EC2-i-0abc-cpu-Warning".to_string()].into(),
            ..Default::default()
        });
        let tags = tags(&[("autoalarm:cpu", "80/95")]);

        let keep = reconciler(&fake)
            .reconcile(&instance(), &tags, &[opt_in_cpu()])
            .await;

        assert_eq!(
            keep.into_iter().collect::<Vec<_>>(),
            vec!["AutoAlarm-EC2-i-0abc-cpu-Critical".to_string()]
        );
    }

    #[tokio::test]
    async fn should_expand_per_volume_configs_and_leave_other_resources_alone() {
        let fake = Arc::new(FakeCloudWatch::with_alarms(&[
            "AutoAlarm-EC2-i-0abcd-cpu-Warning",
        ]));
        let resource = instance()
            .with_volume(StorageVolume {
                path: "/".into(),
                dimensions: vec![autoalarm_common::types::Dimension::new("path", "/")],
            })
            .with_volume(StorageVolume {
                path: "/data".into(),
                dimensions: vec![autoalarm_common::types::Dimension::new("path", "/data")],
            });

        let keep = reconciler(&fake)
            .reconcile(&resource, &HashMap::new(), &[ec2_config("storage")])
            .await;

        assert_eq!(keep.len(), 4);
        assert!(keep.contains("AutoAlarm-EC2-i-0abc-storage-/data-Critical"));
        let alarm = fake.alarm("AutoAlarm-EC2-i-0abc-storage-/data-Critical");
        assert_eq!(alarm.dimensions.len(), 2);
        assert!(fake
            .names()
            .contains(&"AutoAlarm-EC2-i-0abcd-cpu-Warning".to_string()));
    }

    #[tokio::test]
    async fn should_skip_configs_with_unresolved_metric_name() {
        let fake = Arc::new(FakeCloudWatch::default());
        let config = MetricAlarmConfig {
            metric_name: String::new(),
            ..ec2_config("memory")
        };

        let keep = reconciler(&fake)
            .reconcile(&instance(), &HashMap::new(), &[config])
            .await;

        assert!(keep.is_empty());
        assert!(fake.names().is_empty());
    }

    #[tokio::test]
    async fn should_delete_all_alarms_of_one_resource() {
        let fake = Arc::new(FakeCloudWatch::with_alarms(&[
            "AutoAlarm-EC2-i-0abc-cpu-Warning",
            "AutoAlarm-EC2-i-0abc-memory-Critical",
            "AutoAlarm-EC2-i-0abcd-cpu-Warning",
        ]));

        let deleted = reconciler(&fake)
            .delete_all_alarms("EC2", "i-0abc")
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(fake.names(), vec!["AutoAlarm-EC2-i-0abcd-cpu-Warning".to_string()]);
    }
}
