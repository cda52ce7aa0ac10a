use crate::adapter::{is_disabled, wants_prometheus, AdapterRegistry, ServiceAdapter};
use crate::event::{InstanceState, ResourceEvent};
use anyhow::{anyhow, Context, Result};
use autoalarm_alert::promrule::{desired_rules, PrometheusResource};
use autoalarm_cloud::cloudwatch::AlarmReconciler;
use autoalarm_cloud::prometheus::RuleSetReconciler;
use autoalarm_cloud::retry::LinearBackoff;
use autoalarm_cloud::tagging::TagSource;
use autoalarm_cloud::CloudError;
use autoalarm_common::types::ResourceIdentity;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    CloudWatch,
    Prometheus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `alarms` counts kept CloudWatch alarms or desired Prometheus rules.
    Reconciled { backend: Backend, alarms: usize },
    Removed,
    Skipped(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub reconciled: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ProcessSummary {
    fn record(&mut self, result: &Result<Outcome>) {
        match result {
            Ok(Outcome::Reconciled { .. }) => self.reconciled += 1,
            Ok(Outcome::Removed) => self.removed += 1,
            Ok(Outcome::Skipped(_)) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Prometheus workspace plus the reconciler that writes to it.
pub struct PrometheusTarget {
    pub workspace_id: String,
    pub reconciler: RuleSetReconciler,
}

/// One async mutex per key, created on first use and dropped once idle.
#[derive(Default)]
struct KeyedLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map refers to are neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn resource_lock_key(service: &str, resource_id: &str) -> String {
    format!("resource:{service}:{resource_id}")
}

fn namespace_lock_key(service: &str) -> String {
    format!("namespace:{service}")
}

/// Result of applying one event, before any Prometheus write.
enum Step {
    Done(Outcome),
    /// The resource's rules still have to be written to its service namespace.
    Rules(PrometheusResource),
}

/// Applies resource events to CloudWatch and Prometheus.
///
/// Events for the same resource run one at a time and in order; different
/// resources run concurrently up to `max_concurrent`. Prometheus rules of a
/// batch are written with one namespace update per service, and writes to a
/// shared namespace are serialized per service.
pub struct EventProcessor {
    alarms: AlarmReconciler,
    prometheus: Option<PrometheusTarget>,
    tags: Arc<dyn TagSource>,
    adapters: AdapterRegistry,
    backoff: LinearBackoff,
    max_concurrent: usize,
    locks: KeyedLocks,
}

impl EventProcessor {
    pub fn new(
        alarms: AlarmReconciler,
        tags: Arc<dyn TagSource>,
        backoff: LinearBackoff,
        max_concurrent: usize,
    ) -> Self {
        Self {
            alarms,
            prometheus: None,
            tags,
            adapters: AdapterRegistry::default(),
            backoff,
            max_concurrent: max_concurrent.max(1),
            locks: KeyedLocks::default(),
        }
    }

    pub fn with_prometheus(mut self, target: PrometheusTarget) -> Self {
        self.prometheus = Some(target);
        self
    }

    pub async fn process_all(self: &Arc<Self>, events: Vec<ResourceEvent>) -> Result<ProcessSummary> {
        let mut summary = ProcessSummary::default();

        // Group by resource, keeping arrival order within each group.
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut groups: Vec<Vec<ResourceEvent>> = Vec::new();
        for event in events {
            let Some(key) = event.resource_key() else {
                tracing::debug!(event = ?event, "Skipping event without a resource");
                summary.skipped += 1;
                continue;
            };
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(event);
        }

        tracing::info!(
            resources = groups.len(),
            max_concurrent = self.max_concurrent,
            "Processing resource events"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for group in groups {
            let permit = semaphore.clone().acquire_owned().await?;
            let this = self.clone();
            let size = group.len();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let mut results: Vec<Option<Result<Outcome>>> = Vec::with_capacity(group.len());
                let mut pending: Option<(usize, PrometheusResource)> = None;
                for event in &group {
                    // Later events of the resource must observe its rules.
                    if let Some((slot, resource)) = pending.take() {
                        results[slot] = Some(this.apply_rules_one(resource).await);
                    }
                    match this.step(event).await {
                        Ok(Step::Done(outcome)) => results.push(Some(Ok(outcome))),
                        Ok(Step::Rules(resource)) => {
                            pending = Some((results.len(), resource));
                            results.push(None);
                        }
                        Err(e) => {
                            tracing::error!(event = ?event, error = %format!("{e:#}"), "Event processing failed");
                            results.push(Some(Err(e)));
                        }
                    }
                }
                (results, pending)
            });
            handles.push((size, handle));
        }

        let mut group_results = Vec::with_capacity(handles.len());
        let mut pending = Vec::new();
        for (size, handle) in handles {
            match handle.await {
                Ok((results, last)) => {
                    if let Some((slot, resource)) = last {
                        pending.push(((group_results.len(), slot), resource));
                    }
                    group_results.push(results);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event task panicked");
                    summary.failed += size;
                }
            }
        }

        for ((group, slot), outcome) in self.apply_rules(pending).await {
            group_results[group][slot] = Some(outcome);
        }

        for result in group_results.into_iter().flatten() {
            match result {
                Some(result) => summary.record(&result),
                None => summary.failed += 1,
            }
        }

        tracing::info!(
            reconciled = summary.reconciled,
            removed = summary.removed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Finished processing events"
        );
        Ok(summary)
    }

    pub async fn process_event(&self, event: &ResourceEvent) -> Result<Outcome> {
        match self.step(event).await? {
            Step::Done(outcome) => Ok(outcome),
            Step::Rules(resource) => self.apply_rules_one(resource).await,
        }
    }

    async fn step(&self, event: &ResourceEvent) -> Result<Step> {
        match event {
            ResourceEvent::TagChange {
                service,
                resource_id,
                tags,
                ..
            } => {
                let Some(adapter) = self.adapters.get(service) else {
                    return Ok(Step::Done(Outcome::Skipped(format!(
                        "unsupported service {service}"
                    ))));
                };
                let _guard = self.lock_resource(adapter, resource_id).await;
                self.reconcile_resource(adapter, resource_id, tags).await
            }
            ResourceEvent::Ec2StateChange {
                instance_id,
                arn,
                state,
            } => {
                let adapter = self
                    .adapters
                    .get("EC2")
                    .context("EC2 adapter is not registered")?;
                match state {
                    InstanceState::Running => {
                        let _guard = self.lock_resource(adapter, instance_id).await;
                        let tags = self
                            .backoff
                            .retry("fetch tags", || self.tags.fetch_tags(arn))
                            .await
                            .with_context(|| format!("Failed to fetch tags for {arn}"))?;
                        self.reconcile_resource(adapter, instance_id, &tags).await
                    }
                    InstanceState::Terminated => {
                        let _guard = self.lock_resource(adapter, instance_id).await;
                        self.remove_resource(adapter, instance_id).await.map(Step::Done)
                    }
                    other => Ok(Step::Done(Outcome::Skipped(format!("instance state {other:?}")))),
                }
            }
            ResourceEvent::Unsupported { detail_type } => Ok(Step::Done(Outcome::Skipped(format!(
                "unsupported event '{detail_type}'"
            )))),
        }
    }

    async fn lock_resource(&self, adapter: &dyn ServiceAdapter, resource_id: &str) -> OwnedMutexGuard<()> {
        self.locks
            .lock(&resource_lock_key(adapter.service(), resource_id))
            .await
    }

    async fn reconcile_resource(
        &self,
        adapter: &dyn ServiceAdapter,
        resource_id: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Step> {
        if is_disabled(tags) {
            tracing::info!(service = adapter.service(), resource = resource_id, "AutoAlarm disabled by tag");
            return self.remove_resource(adapter, resource_id).await.map(Step::Done);
        }

        let identity = adapter.identity(resource_id);

        if wants_prometheus(tags) {
            if let Some(resource) = self.prometheus_resource(adapter, &identity, tags) {
                return Ok(Step::Rules(resource));
            }
            tracing::debug!(
                service = adapter.service(),
                resource = resource_id,
                "Prometheus not available for resource, using CloudWatch"
            );
        }

        Ok(Step::Done(self.reconcile_cloudwatch(adapter, &identity, tags).await))
    }

    async fn reconcile_cloudwatch(
        &self,
        adapter: &dyn ServiceAdapter,
        identity: &ResourceIdentity,
        tags: &HashMap<String, String>,
    ) -> Outcome {
        let resource_id = identity.service_identifier.as_str();
        let keep = self
            .alarms
            .reconcile(identity, tags, &adapter.metric_configs())
            .await;
        self.remove_prometheus_rules(adapter, resource_id).await;

        tracing::info!(
            service = adapter.service(),
            resource = resource_id,
            alarms = keep.len(),
            "Reconciled CloudWatch alarms"
        );
        Outcome::Reconciled {
            backend: Backend::CloudWatch,
            alarms: keep.len(),
        }
    }

    /// `None` when no workspace is configured or the service is not scraped
    /// by Prometheus.
    fn prometheus_resource(
        &self,
        adapter: &dyn ServiceAdapter,
        identity: &ResourceIdentity,
        tags: &HashMap<String, String>,
    ) -> Option<PrometheusResource> {
        self.prometheus.as_ref()?;
        let selector = adapter.prometheus_selector(identity)?;
        Some(PrometheusResource {
            identity: identity.clone(),
            selector,
            tags: tags.clone(),
            configs: adapter.metric_configs(),
        })
    }

    async fn apply_rules_one(&self, resource: PrometheusResource) -> Result<Outcome> {
        let mut outcomes = self.apply_rules(vec![((), resource)]).await;
        outcomes
            .pop()
            .map(|(_, outcome)| outcome)
            .context("Prometheus pass returned no outcome")?
    }

    /// Writes the rules of every pending resource with one reconcile per
    /// service. Each outcome comes back with the key it was submitted under.
    async fn apply_rules<K>(&self, pending: Vec<(K, PrometheusResource)>) -> Vec<(K, Result<Outcome>)> {
        let mut by_service: BTreeMap<String, Vec<(K, PrometheusResource)>> = BTreeMap::new();
        for (key, resource) in pending {
            by_service
                .entry(resource.identity.service.clone())
                .or_default()
                .push((key, resource));
        }

        let mut outcomes = Vec::new();
        for (service, batch) in by_service {
            outcomes.extend(self.apply_service_rules(&service, batch).await);
        }
        outcomes
    }

    async fn apply_service_rules<K>(
        &self,
        service: &str,
        batch: Vec<(K, PrometheusResource)>,
    ) -> Vec<(K, Result<Outcome>)> {
        let (keys, resources): (Vec<K>, Vec<PrometheusResource>) = batch.into_iter().unzip();

        let Some(adapter) = self.adapters.get(service) else {
            return keys
                .into_iter()
                .map(|key| (key, Err(anyhow!("unsupported service {service}"))))
                .collect();
        };
        let Some(target) = &self.prometheus else {
            let mut outcomes = Vec::with_capacity(resources.len());
            for (key, resource) in keys.into_iter().zip(&resources) {
                let outcome = self
                    .reconcile_cloudwatch(adapter, &resource.identity, &resource.tags)
                    .await;
                outcomes.push((key, Ok(outcome)));
            }
            return outcomes;
        };

        // Resource locks in key order, then the namespace lock.
        let mut lock_keys: Vec<String> = resources
            .iter()
            .map(|r| resource_lock_key(service, &r.identity.service_identifier))
            .collect();
        lock_keys.sort();
        lock_keys.dedup();
        let mut guards = Vec::with_capacity(lock_keys.len());
        for key in &lock_keys {
            guards.push(self.locks.lock(key).await);
        }

        let result = {
            let _namespace = self.locks.lock(&namespace_lock_key(service)).await;
            self.backoff
                .retry_when(
                    "reconcile Prometheus rules",
                    || target.reconciler.reconcile(&target.workspace_id, service, &resources),
                    |e: &CloudError| !e.is_fatal_for_prometheus(),
                )
                .await
        };

        let mut outcomes = Vec::with_capacity(resources.len());
        match result {
            Ok(()) => {
                tracing::info!(service, resources = resources.len(), "Reconciled Prometheus rules");
                for (key, resource) in keys.into_iter().zip(&resources) {
                    let resource_id = resource.identity.service_identifier.as_str();
                    let outcome = self
                        .backoff
                        .retry("delete CloudWatch alarms", || {
                            self.alarms.delete_all_alarms(service, resource_id)
                        })
                        .await
                        .context("Failed to remove CloudWatch alarms after switching to Prometheus")
                        .map(|_| Outcome::Reconciled {
                            backend: Backend::Prometheus,
                            alarms: desired_rules(resource).len(),
                        });
                    outcomes.push((key, outcome));
                }
            }
            Err(e) if e.is_fatal_for_prometheus() => {
                tracing::warn!(
                    service,
                    resources = resources.len(),
                    error = %e,
                    "Prometheus pathway unavailable, falling back to CloudWatch"
                );
                for (key, resource) in keys.into_iter().zip(&resources) {
                    let outcome = self
                        .reconcile_cloudwatch(adapter, &resource.identity, &resource.tags)
                        .await;
                    outcomes.push((key, Ok(outcome)));
                }
            }
            Err(e) => {
                tracing::error!(service, resources = resources.len(), error = %e, "Failed to reconcile Prometheus rules");
                for (key, resource) in keys.into_iter().zip(&resources) {
                    let error = anyhow!("{e}").context(format!(
                        "Failed to reconcile Prometheus rules for {}",
                        resource.identity.service_identifier
                    ));
                    outcomes.push((key, Err(error)));
                }
            }
        }
        drop(guards);
        outcomes
    }

    async fn remove_resource(&self, adapter: &dyn ServiceAdapter, resource_id: &str) -> Result<Outcome> {
        let deleted = self
            .backoff
            .retry("delete CloudWatch alarms", || {
                self.alarms.delete_all_alarms(adapter.service(), resource_id)
            })
            .await
            .with_context(|| format!("Failed to delete alarms for {resource_id}"))?;
        self.remove_prometheus_rules(adapter, resource_id).await;

        tracing::info!(
            service = adapter.service(),
            resource = resource_id,
            deleted,
            "Removed monitoring for resource"
        );
        Ok(Outcome::Removed)
    }

    /// Best effort; failures are logged.
    async fn remove_prometheus_rules(&self, adapter: &dyn ServiceAdapter, resource_id: &str) {
        let Some(target) = &self.prometheus else {
            return;
        };
        if adapter
            .prometheus_selector(&adapter.identity(resource_id))
            .is_none()
        {
            return;
        }

        let ids = [resource_id.to_string()];
        let _guard = self.locks.lock(&namespace_lock_key(adapter.service())).await;
        let result = self
            .backoff
            .retry_when(
                "delete Prometheus rules",
                || target.reconciler.delete_rules(&target.workspace_id, adapter.service(), &ids),
                |e: &CloudError| !e.is_fatal_for_prometheus() && !e.is_not_found(),
            )
            .await;
        match result {
            Ok(0) => {}
            Ok(removed) => {
                tracing::info!(service = adapter.service(), resource = resource_id, removed, "Removed Prometheus rules");
            }
            Err(e) => {
                tracing::warn!(service = adapter.service(), resource = resource_id, error = %e, "Failed to remove Prometheus rules");
            }
        }
    }
}
