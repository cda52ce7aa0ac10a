use crate::aws::AwsClient;
use crate::error::Result;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of a resource's current tags.
#[async_trait::async_trait]
pub trait TagSource: Send + Sync {
    /// Tags of the resource with the given ARN. Unknown resources have none.
    async fn fetch_tags(&self, arn: &str) -> Result<HashMap<String, String>>;
}

/// [`TagSource`] backed by the Resource Groups Tagging API.
pub struct TaggingClient {
    client: Arc<AwsClient>,
}

impl TaggingClient {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl TagSource for TaggingClient {
    async fn fetch_tags(&self, arn: &str) -> Result<HashMap<String, String>> {
        let resp = self
            .client
            .call_json(
                "tagging",
                "tagging",
                "ResourceGroupsTaggingAPI_20170126.GetResources",
                "1.1",
                &json!({ "ResourceARNList": [arn] }),
            )
            .await?;

        let mut tags = HashMap::new();
        if let Some(mappings) = resp["ResourceTagMappingList"].as_array() {
            for mapping in mappings {
                let Some(items) = mapping["Tags"].as_array() else {
                    continue;
                };
                for tag in items {
                    if let (Some(key), Some(value)) = (tag["Key"].as_str(), tag["Value"].as_str()) {
                        tags.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        tracing::debug!(arn, count = tags.len(), "Fetched resource tags");
        Ok(tags)
    }
}
