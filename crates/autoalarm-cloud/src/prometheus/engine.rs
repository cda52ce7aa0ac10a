use super::PrometheusRulesApi;
use crate::error::{CloudError, Result};
use autoalarm_alert::promrule::{
    namespace_name, union_rules, NamespaceDetails, PrometheusResource, PrometheusRule, RuleGroup,
    RULE_GROUP_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Tuning for [`RuleSetReconciler`].
#[derive(Debug, Clone)]
pub struct PrometheusSettings {
    /// Wait after creating a namespace before it can be read back.
    pub propagation_delay: Duration,
    pub list_retry_delay: Duration,
    pub list_retry_attempts: u32,
    /// Workspace-wide rule count at which reconciliation refuses to proceed.
    pub rule_limit: usize,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            propagation_delay: Duration::from_secs(90),
            list_retry_delay: Duration::from_secs(60),
            list_retry_attempts: 3,
            rule_limit: 2000,
        }
    }
}

/// Reconciles the single `AutoAlarm` rule group of a service namespace.
///
/// The namespace document is read, modified and written back whole. There
/// is no compare-and-swap, so callers must serialize reconciliation per
/// namespace.
pub struct RuleSetReconciler {
    api: Arc<dyn PrometheusRulesApi>,
    settings: PrometheusSettings,
}

impl RuleSetReconciler {
    pub fn new(api: Arc<dyn PrometheusRulesApi>, settings: PrometheusSettings) -> Self {
        Self { api, settings }
    }

    /// Makes the service namespace contain the union of the resources'
    /// desired rules. Existing rules are corrected or kept, never removed.
    ///
    /// # Errors
    ///
    /// [`CloudError::WorkspaceUnavailable`] and [`CloudError::RuleLimitExceeded`]
    /// are fatal for the Prometheus pathway; callers fall back to CloudWatch.
    pub async fn reconcile(
        &self,
        workspace_id: &str,
        service: &str,
        resources: &[PrometheusResource],
    ) -> Result<()> {
        self.ensure_workspace(workspace_id).await?;

        let total = self.count_rules(workspace_id).await?;
        if total >= self.settings.rule_limit {
            return Err(CloudError::RuleLimitExceeded {
                workspace_id: workspace_id.to_string(),
                count: total,
                limit: self.settings.rule_limit,
            });
        }

        let namespace = namespace_name(service);
        let desired = union_rules(resources);

        let existing = self.api.describe_namespace(workspace_id, &namespace).await?;
        let Some(bytes) = existing else {
            if desired.is_empty() {
                tracing::debug!(namespace = %namespace, "No rules wanted, namespace not created");
                return Ok(());
            }
            return self.create(workspace_id, &namespace, desired).await;
        };

        let mut details = match NamespaceDetails::from_yaml(&bytes) {
            Ok(details) if !details.is_empty() => details,
            Ok(_) => {
                tracing::warn!(namespace = %namespace, "Namespace has no rule groups, recreating");
                return self.recreate(workspace_id, &namespace, desired).await;
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "Namespace YAML is corrupt, recreating");
                return self.recreate(workspace_id, &namespace, desired).await;
            }
        };

        if !merge_rules(&mut details, desired) {
            tracing::debug!(namespace = %namespace, "Rules already up to date");
            return Ok(());
        }

        let yaml = details.to_yaml()?;
        self.api
            .put_namespace(workspace_id, &namespace, yaml.as_bytes())
            .await?;
        tracing::info!(
            namespace = %namespace,
            rules = details.rule_count(),
            "Updated Prometheus rules"
        );
        Ok(())
    }

    /// Removes every rule whose alert name belongs to one of the given
    /// resources. Deletes the namespace once it holds no rules. Returns the
    /// number of rules removed.
    pub async fn delete_rules(
        &self,
        workspace_id: &str,
        service: &str,
        service_identifiers: &[String],
    ) -> Result<usize> {
        let namespace = namespace_name(service);
        let Some(bytes) = self.api.describe_namespace(workspace_id, &namespace).await? else {
            return Ok(0);
        };
        let mut details = NamespaceDetails::from_yaml(&bytes)?;

        let needles: Vec<String> = service_identifiers
            .iter()
            .filter(|id| !id.is_empty())
            .map(|id| format!("-{id}-"))
            .collect();
        let before = details.rule_count();
        for group in &mut details.groups {
            group
                .rules
                .retain(|rule| !needles.iter().any(|n| rule.alert.contains(n.as_str())));
        }
        details.groups.retain(|group| !group.rules.is_empty());
        let removed = before - details.rule_count();

        if removed == 0 {
            return Ok(0);
        }

        if details.is_empty() {
            self.api.delete_namespace(workspace_id, &namespace).await?;
            tracing::info!(namespace = %namespace, "Deleted empty Prometheus namespace");
        } else {
            let yaml = details.to_yaml()?;
            self.api
                .put_namespace(workspace_id, &namespace, yaml.as_bytes())
                .await?;
        }
        tracing::info!(namespace = %namespace, removed, "Removed Prometheus rules");
        Ok(removed)
    }

    async fn ensure_workspace(&self, workspace_id: &str) -> Result<()> {
        let status = self.api.workspace_status(workspace_id).await?;
        match status {
            Some(status) if status.is_usable() => Ok(()),
            Some(status) => Err(CloudError::WorkspaceUnavailable {
                workspace_id: workspace_id.to_string(),
                status: status.to_string(),
            }),
            None => Err(CloudError::WorkspaceUnavailable {
                workspace_id: workspace_id.to_string(),
                status: "NOT_FOUND".to_string(),
            }),
        }
    }

    async fn list_namespaces(&self, workspace_id: &str) -> Result<Vec<String>> {
        let attempts = self.settings.list_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.api.list_namespaces(workspace_id).await {
                Ok(names) => return Ok(names),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        workspace = %workspace_id,
                        attempt,
                        error = %e,
                        "Failed to list namespaces, retrying"
                    );
                    attempt += 1;
                    sleep(self.settings.list_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sums the rules of every namespace in the workspace. Unreadable
    /// documents count as empty.
    async fn count_rules(&self, workspace_id: &str) -> Result<usize> {
        let mut total = 0;
        for name in self.list_namespaces(workspace_id).await? {
            let Some(bytes) = self.api.describe_namespace(workspace_id, &name).await? else {
                continue;
            };
            match NamespaceDetails::from_yaml(&bytes) {
                Ok(details) => total += details.rule_count(),
                Err(e) => {
                    tracing::warn!(namespace = %name, error = %e, "Skipping unreadable namespace in rule count");
                }
            }
        }
        tracing::debug!(workspace = %workspace_id, total, "Counted Prometheus rules");
        Ok(total)
    }

    async fn create(
        &self,
        workspace_id: &str,
        namespace: &str,
        rules: Vec<PrometheusRule>,
    ) -> Result<()> {
        let details = NamespaceDetails::with_rules(rules);
        let yaml = details.to_yaml()?;
        self.api
            .create_namespace(workspace_id, namespace, yaml.as_bytes())
            .await?;
        tracing::info!(
            namespace = %namespace,
            rules = details.rule_count(),
            delay_secs = self.settings.propagation_delay.as_secs(),
            "Created Prometheus namespace, waiting for propagation"
        );
        sleep(self.settings.propagation_delay).await;
        Ok(())
    }

    async fn recreate(
        &self,
        workspace_id: &str,
        namespace: &str,
        rules: Vec<PrometheusRule>,
    ) -> Result<()> {
        self.api.delete_namespace(workspace_id, namespace).await?;
        if rules.is_empty() {
            return Ok(());
        }
        self.create(workspace_id, namespace, rules).await
    }
}

/// Corrects `expr`/`for` of existing rules and appends missing ones.
/// Returns whether anything changed.
fn merge_rules(details: &mut NamespaceDetails, desired: Vec<PrometheusRule>) -> bool {
    if details.group_mut(RULE_GROUP_NAME).is_none() {
        details.groups.push(RuleGroup {
            name: RULE_GROUP_NAME.to_string(),
            rules: Vec::new(),
        });
    }
    let Some(group) = details.group_mut(RULE_GROUP_NAME) else {
        return false;
    };

    let mut changed = false;
    for rule in desired {
        match group.rules.iter_mut().find(|r| r.alert == rule.alert) {
            Some(existing) => {
                if existing.expr != rule.expr || existing.for_duration != rule.for_duration {
                    existing.expr = rule.expr;
                    existing.for_duration = rule.for_duration;
                    changed = true;
                }
            }
            None => {
                group.rules.push(rule);
                changed = true;
            }
        }
    }
    changed
}
