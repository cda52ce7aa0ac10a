use super::{AnomalyDetectorRequest, CloudWatchApi, MetricAlarmRequest, DELETE_BATCH_SIZE};
use crate::aws::AwsClient;
use crate::error::Result;
use serde_json::{json, Value};
use std::sync::Arc;

const SERVICE: &str = "monitoring";
const TARGET_PREFIX: &str = "GraniteServiceVersion20100801";
const JSON_VERSION: &str = "1.0";
const DESCRIBE_PAGE_SIZE: u32 = 100;

pub struct HttpCloudWatch {
    client: Arc<AwsClient>,
}

impl HttpCloudWatch {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, payload: &Value) -> Result<Value> {
        self.client
            .call_json(
                SERVICE,
                SERVICE,
                &format!("{TARGET_PREFIX}.{action}"),
                JSON_VERSION,
                payload,
            )
            .await
    }
}

#[async_trait::async_trait]
impl CloudWatchApi for HttpCloudWatch {
    async fn put_metric_alarm(&self, request: &MetricAlarmRequest) -> Result<()> {
        self.call("PutMetricAlarm", &serde_json::to_value(request)?)
            .await?;
        Ok(())
    }

    async fn put_anomaly_detector(&self, request: &AnomalyDetectorRequest) -> Result<()> {
        self.call("PutAnomalyDetector", &serde_json::to_value(request)?)
            .await?;
        Ok(())
    }

    async fn list_alarm_names(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut payload = json!({
                "AlarmNamePrefix": prefix,
                "AlarmTypes": ["MetricAlarm"],
                "MaxRecords": DESCRIBE_PAGE_SIZE,
            });
            if let Some(token) = &next_token {
                payload["NextToken"] = json!(token);
            }

            let resp = self.call("DescribeAlarms", &payload).await?;
            if let Some(alarms) = resp["MetricAlarms"].as_array() {
                names.extend(
                    alarms
                        .iter()
                        .filter_map(|a| a["AlarmName"].as_str())
                        .map(str::to_string),
                );
            }

            next_token = resp["NextToken"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        tracing::debug!(prefix, count = names.len(), "Listed CloudWatch alarms");
        Ok(names)
    }

    async fn delete_alarms(&self, names: &[String]) -> Result<()> {
        for chunk in names.chunks(DELETE_BATCH_SIZE) {
            self.call("DeleteAlarms", &json!({ "AlarmNames": chunk }))
                .await?;
        }
        Ok(())
    }
}
