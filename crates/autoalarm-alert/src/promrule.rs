use crate::naming::AlarmIdentity;
use crate::options::normalize_period;
use crate::plan::resolve_options;
use crate::MetricAlarmConfig;
use autoalarm_common::types::{AlarmVariant, Classification, ResourceIdentity};
use autoalarm_common::NAME_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The single rule group every AutoAlarm namespace contains.
pub const RULE_GROUP_NAME: &str = "AutoAlarm";

/// Placeholder replaced by the resource's label selector in PromQL templates.
pub const SELECTOR_PLACEHOLDER: &str = "{selector}";

/// Namespace holding all rules of one service, e.g. `AutoAlarm-EC2`.
pub fn namespace_name(service: &str) -> String {
    format!("{NAME_PREFIX}-{}", service.to_uppercase())
}

/// A Prometheus rules namespace document as stored by the rules API.
///
/// The whole document is read and written as one YAML blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceDetails {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<PrometheusRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusRule {
    pub alert: String,
    pub expr: String,
    #[serde(rename = "for")]
    pub for_duration: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl NamespaceDetails {
    /// A namespace with the AutoAlarm rule group holding `rules`.
    pub fn with_rules(rules: Vec<PrometheusRule>) -> Self {
        Self {
            groups: vec![RuleGroup {
                name: RULE_GROUP_NAME.to_string(),
                rules,
            }],
        }
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(data)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    /// The `groups: []` form, which the rules API cannot store.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut RuleGroup> {
        self.groups.iter_mut().find(|g| g.name == name)
    }
}

/// A resource to be monitored through Prometheus.
#[derive(Debug, Clone)]
pub struct PrometheusResource {
    pub identity: ResourceIdentity,
    /// Label matchers without braces, e.g. `instance_id="i-0abc"`
    pub selector: String,
    pub tags: HashMap<String, String>,
    pub configs: Vec<MetricAlarmConfig>,
}

/// Derives the rules a resource should have. Thresholds, statistics and
/// opt-out logic are shared with the CloudWatch path; only the query
/// representation differs.
pub fn desired_rules(resource: &PrometheusResource) -> Vec<PrometheusRule> {
    let mut rules = Vec::new();

    for config in &resource.configs {
        if config.anomaly {
            continue;
        }
        let Some(template) = config.prometheus_query.as_deref() else {
            continue;
        };
        let Some(options) = resolve_options(config, &resource.tags) else {
            continue;
        };
        let Some(op) = options.comparison_operator.promql() else {
            tracing::warn!(
                metric = %config.tag_key,
                operator = %options.comparison_operator,
                "Comparison operator has no PromQL form, skipping rule"
            );
            continue;
        };

        let query = template.replace(SELECTOR_PLACEHOLDER, &resource.selector);
        let for_duration = for_duration(options.period, options.evaluation_periods);

        for classification in Classification::ALL {
            let Some(threshold) = options.threshold(classification) else {
                continue;
            };
            let alert = AlarmIdentity {
                service: &resource.identity.service,
                service_identifier: &resource.identity.service_identifier,
                metric: &config.tag_key,
                storage_path: None,
                classification,
                variant: AlarmVariant::Static,
            }
            .alarm_name();

            let mut labels = BTreeMap::new();
            labels.insert(
                "severity".to_string(),
                classification.severity_label().to_string(),
            );
            let mut annotations = BTreeMap::new();
            annotations.insert(
                "summary".to_string(),
                format!(
                    "{} {} {classification} on {}",
                    resource.identity.service, config.tag_key, resource.identity.service_identifier
                ),
            );
            annotations.insert(
                "description".to_string(),
                format!(
                    "{} has been {op} {threshold} for {for_duration}",
                    config.tag_key
                ),
            );

            rules.push(PrometheusRule {
                alert,
                expr: format!("{query} {op} {threshold}"),
                for_duration: for_duration.clone(),
                labels,
                annotations,
            });
        }
    }

    rules
}

/// Unions the desired rules of several resources, keeping the first rule
/// for any duplicated alert name.
pub fn union_rules(resources: &[PrometheusResource]) -> Vec<PrometheusRule> {
    let mut seen = std::collections::HashSet::new();
    resources
        .iter()
        .flat_map(desired_rules)
        .filter(|rule| seen.insert(rule.alert.clone()))
        .collect()
}

/// Pending duration covering every evaluated period, in whole minutes.
fn for_duration(period: u32, evaluation_periods: u32) -> String {
    let secs = u64::from(normalize_period(period)) * u64::from(evaluation_periods.max(1));
    format!("{}m", secs.div_ceil(60).max(1))
}
