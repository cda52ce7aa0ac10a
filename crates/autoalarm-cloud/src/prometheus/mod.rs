//! Amazon Managed Prometheus alerting rules.
//!
//! A rules namespace is stored as one YAML document; every change rewrites
//! the whole document. See [`RuleSetReconciler`].

mod engine;
mod http;

pub use engine::{PrometheusSettings, RuleSetReconciler};
pub use http::HttpPrometheusRules;

use crate::error::Result;

/// Lifecycle state of a Prometheus workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceStatus {
    Active,
    Creating,
    Updating,
    Deleting,
    CreationFailed,
    Other(String),
}

impl WorkspaceStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "ACTIVE" => Self::Active,
            "CREATING" => Self::Creating,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "CREATION_FAILED" => Self::CreationFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Rules can be managed while the workspace is active or being updated.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active | Self::Updating)
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Creating => write!(f, "CREATING"),
            Self::Updating => write!(f, "UPDATING"),
            Self::Deleting => write!(f, "DELETING"),
            Self::CreationFailed => write!(f, "CREATION_FAILED"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Rules namespace operations used by [`RuleSetReconciler`]. Namespace
/// documents are exchanged as raw YAML bytes.
#[async_trait::async_trait]
pub trait PrometheusRulesApi: Send + Sync {
    /// `None` when the workspace does not exist.
    async fn workspace_status(&self, workspace_id: &str) -> Result<Option<WorkspaceStatus>>;

    /// Names of every rules namespace in the workspace.
    async fn list_namespaces(&self, workspace_id: &str) -> Result<Vec<String>>;

    /// `None` when the namespace does not exist.
    async fn describe_namespace(&self, workspace_id: &str, name: &str) -> Result<Option<Vec<u8>>>;

    async fn create_namespace(&self, workspace_id: &str, name: &str, data: &[u8]) -> Result<()>;

    async fn put_namespace(&self, workspace_id: &str, name: &str, data: &[u8]) -> Result<()>;

    async fn delete_namespace(&self, workspace_id: &str, name: &str) -> Result<()>;
}
