use super::{PrometheusRulesApi, WorkspaceStatus};
use crate::aws::AwsClient;
use crate::error::{CloudError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;

const SERVICE: &str = "aps";
const PAGE_SIZE: u32 = 100;

pub struct HttpPrometheusRules {
    client: Arc<AwsClient>,
}

impl HttpPrometheusRules {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }
}

/// Maps a not-found error to `Ok(None)`.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl PrometheusRulesApi for HttpPrometheusRules {
    async fn workspace_status(&self, workspace_id: &str) -> Result<Option<WorkspaceStatus>> {
        let resp = optional(
            self.client
                .call_rest(
                    SERVICE,
                    SERVICE,
                    Method::GET,
                    &["workspaces", workspace_id],
                    &[],
                    None,
                )
                .await,
        )?;

        Ok(resp.map(|body| {
            let code = body["workspace"]["status"]["statusCode"]
                .as_str()
                .unwrap_or_default();
            WorkspaceStatus::from_code(code)
        }))
    }

    async fn list_namespaces(&self, workspace_id: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults".to_string(), PAGE_SIZE.to_string())];
            if let Some(token) = &next_token {
                query.push(("nextToken".to_string(), token.clone()));
            }

            let resp = self
                .client
                .call_rest(
                    SERVICE,
                    SERVICE,
                    Method::GET,
                    &["workspaces", workspace_id, "rulegroupsnamespaces"],
                    &query,
                    None,
                )
                .await?;

            if let Some(items) = resp["ruleGroupsNamespaces"].as_array() {
                names.extend(
                    items
                        .iter()
                        .filter_map(|ns| ns["name"].as_str())
                        .map(str::to_string),
                );
            }

            next_token = resp["nextToken"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn describe_namespace(&self, workspace_id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let resp = optional(
            self.client
                .call_rest(
                    SERVICE,
                    SERVICE,
                    Method::GET,
                    &["workspaces", workspace_id, "rulegroupsnamespaces", name],
                    &[],
                    None,
                )
                .await,
        )?;

        let Some(body) = resp else {
            return Ok(None);
        };
        let data = body["ruleGroupsNamespace"]["data"].as_str().ok_or_else(|| {
            CloudError::ApiResponseError {
                service: SERVICE.to_string(),
                code: "MissingData".to_string(),
                message: format!("namespace {name} has no data field"),
            }
        })?;
        Ok(Some(STANDARD.decode(data)?))
    }

    async fn create_namespace(&self, workspace_id: &str, name: &str, data: &[u8]) -> Result<()> {
        let body = json!({ "name": name, "data": STANDARD.encode(data) });
        self.client
            .call_rest(
                SERVICE,
                SERVICE,
                Method::POST,
                &["workspaces", workspace_id, "rulegroupsnamespaces"],
                &[],
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn put_namespace(&self, workspace_id: &str, name: &str, data: &[u8]) -> Result<()> {
        let body = json!({ "data": STANDARD.encode(data) });
        self.client
            .call_rest(
                SERVICE,
                SERVICE,
                Method::PUT,
                &["workspaces", workspace_id, "rulegroupsnamespaces", name],
                &[],
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, workspace_id: &str, name: &str) -> Result<()> {
        self.client
            .call_rest(
                SERVICE,
                SERVICE,
                Method::DELETE,
                &["workspaces", workspace_id, "rulegroupsnamespaces", name],
                &[],
                None,
            )
            .await?;
        Ok(())
    }
}
