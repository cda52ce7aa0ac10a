//! EventBridge events, parsed once into [`ResourceEvent`].

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const TAG_CHANGE: &str = "Tag Change on Resource";
pub const EC2_STATE_CHANGE: &str = "EC2 Instance State-change Notification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl InstanceState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// Carries the full tag set after the change.
    TagChange {
        service: String,
        resource_id: String,
        arn: String,
        tags: HashMap<String, String>,
    },
    Ec2StateChange {
        instance_id: String,
        arn: String,
        state: InstanceState,
    },
    Unsupported {
        detail_type: String,
    },
}

impl ResourceEvent {
    /// `(service, resource id)` of the resource the event is about.
    pub fn resource_key(&self) -> Option<(String, String)> {
        match self {
            Self::TagChange {
                service,
                resource_id,
                ..
            } => Some((service.clone(), resource_id.clone())),
            Self::Ec2StateChange { instance_id, .. } => {
                Some(("EC2".to_string(), instance_id.clone()))
            }
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "detail-type")]
    detail_type: String,
    #[serde(default)]
    account: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    detail: Value,
}

#[derive(Debug, Deserialize)]
struct TagChangeDetail {
    service: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StateChangeDetail {
    #[serde(rename = "instance-id")]
    instance_id: String,
    state: String,
}

/// Resource ID from an ARN: the part after the last `/` of the resource
/// field, e.g. `i-0abc` or `my-queue`.
pub fn resource_id_from_arn(arn: &str) -> Option<&str> {
    let resource = arn.splitn(6, ':').nth(5)?;
    let id = resource.rsplit('/').next()?;
    (!id.is_empty()).then_some(id)
}

pub fn parse_event(value: Value) -> Result<ResourceEvent> {
    let raw: RawEvent = serde_json::from_value(value).context("Malformed event envelope")?;

    match raw.detail_type.as_str() {
        TAG_CHANGE => {
            let detail: TagChangeDetail =
                serde_json::from_value(raw.detail).context("Malformed tag change detail")?;
            let arn = raw
                .resources
                .into_iter()
                .next()
                .context("Tag change event has no resource ARN")?;
            let resource_id = resource_id_from_arn(&arn)
                .with_context(|| format!("Cannot derive resource id from '{arn}'"))?
                .to_string();
            Ok(ResourceEvent::TagChange {
                service: detail.service.to_uppercase(),
                resource_id,
                arn,
                tags: detail.tags,
            })
        }
        EC2_STATE_CHANGE => {
            let detail: StateChangeDetail =
                serde_json::from_value(raw.detail).context("Malformed state change detail")?;
            let arn = raw.resources.into_iter().next().unwrap_or_else(|| {
                format!(
                    "arn:aws:ec2:{}:{}:instance/{}",
                    raw.region, raw.account, detail.instance_id
                )
            });
            Ok(ResourceEvent::Ec2StateChange {
                instance_id: detail.instance_id,
                arn,
                state: InstanceState::from_name(&detail.state),
            })
        }
        _ => Ok(ResourceEvent::Unsupported {
            detail_type: raw.detail_type,
        }),
    }
}

/// Parses a JSON array of events, or a single event object.
pub fn parse_events(content: &str) -> Result<Vec<ResourceEvent>> {
    let value: Value = serde_json::from_str(content).context("Events file is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_event(item).with_context(|| format!("Event #{i}")))
        .collect()
}
