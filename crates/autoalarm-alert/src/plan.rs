use crate::naming::AlarmIdentity;
use crate::options::{normalize_period, parse_metric_alarm_options, MetricAlarmOptions};
use crate::MetricAlarmConfig;
use autoalarm_common::types::{AlarmVariant, Classification, Dimension, ResourceIdentity};
use std::collections::HashMap;

/// One alarm that should exist after reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSpec {
    pub name: String,
    pub description: String,
    pub classification: Classification,
    pub variant: AlarmVariant,
    pub metric_name: String,
    pub metric_namespace: String,
    pub dimensions: Vec<Dimension>,
    /// Absolute value for static alarms, band width for anomaly alarms.
    pub threshold: f64,
    /// Options with the period already normalized.
    pub options: MetricAlarmOptions,
}

/// Desired state of one metric config on one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmPlan {
    /// The resource has opted out of this metric entirely.
    pub opted_out: bool,
    pub desired: Vec<AlarmSpec>,
    /// Names that must not exist (disabled classifications or opt-out).
    pub retired: Vec<String>,
}

/// Resolves the options for a config from the resource's tags.
///
/// Returns `None` when the resource opts out: the config is not created by
/// default and either carries no override tag or disables both thresholds.
pub fn resolve_options(
    config: &MetricAlarmConfig,
    tags: &HashMap<String, String>,
) -> Option<MetricAlarmOptions> {
    let tag = tags.get(&config.override_tag());
    if tag.is_none() && !config.default_create {
        return None;
    }

    let options = match tag {
        Some(raw) => parse_metric_alarm_options(raw, &config.defaults),
        None => config.defaults.clone(),
    };

    if !options.has_any_threshold() && !config.default_create {
        return None;
    }
    Some(options)
}

struct Target<'a> {
    storage_path: Option<&'a str>,
    dimensions: Vec<Dimension>,
}

fn targets<'a>(resource: &'a ResourceIdentity, config: &MetricAlarmConfig) -> Vec<Target<'a>> {
    if config.per_volume && !resource.storage.is_empty() {
        resource
            .storage
            .iter()
            .map(|volume| Target {
                storage_path: Some(volume.path.as_str()),
                dimensions: resource
                    .dimensions
                    .iter()
                    .chain(volume.dimensions.iter())
                    .cloned()
                    .collect(),
            })
            .collect()
    } else {
        vec![Target {
            storage_path: None,
            dimensions: resource.dimensions.clone(),
        }]
    }
}

/// Computes which alarms of `config` should exist on `resource`.
pub fn plan_alarms(
    resource: &ResourceIdentity,
    config: &MetricAlarmConfig,
    tags: &HashMap<String, String>,
) -> AlarmPlan {
    let targets = targets(resource, config);
    let identity = |target: &Target<'_>, classification, variant| {
        AlarmIdentity {
            service: &resource.service,
            service_identifier: &resource.service_identifier,
            metric: &config.tag_key,
            storage_path: target.storage_path,
            classification,
            variant,
        }
        .alarm_name()
    };

    let Some(mut options) = resolve_options(config, tags) else {
        let mut retired = Vec::new();
        for target in &targets {
            for classification in Classification::ALL {
                for variant in [AlarmVariant::Static, AlarmVariant::Anomaly] {
                    retired.push(identity(target, classification, variant));
                }
            }
        }
        return AlarmPlan {
            opted_out: true,
            desired: Vec::new(),
            retired,
        };
    };
    options.period = normalize_period(options.period);

    let variant = if config.anomaly {
        AlarmVariant::Anomaly
    } else {
        AlarmVariant::Static
    };

    let mut plan = AlarmPlan::default();
    for target in &targets {
        for classification in Classification::ALL {
            let name = identity(target, classification, variant);
            match options.threshold(classification) {
                Some(threshold) => plan.desired.push(AlarmSpec {
                    description: format!(
                        "{classification} {variant} alarm for {} on {} managed by AutoAlarm",
                        config.tag_key, resource.service_identifier
                    ),
                    name,
                    classification,
                    variant,
                    metric_name: config.metric_name.clone(),
                    metric_namespace: config.metric_namespace.clone(),
                    dimensions: target.dimensions.clone(),
                    threshold,
                    options: options.clone(),
                }),
                None => plan.retired.push(name),
            }
        }
    }
    plan
}
