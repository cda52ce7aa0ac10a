use anyhow::{Context, Result};
use autoalarm_cloud::batch::{AdaptiveDispatcher, SqsBatchSink};
use autoalarm_cloud::cloudwatch::{AlarmReconciler, HttpCloudWatch};
use autoalarm_cloud::prometheus::{HttpPrometheusRules, RuleSetReconciler};
use autoalarm_cloud::tagging::TaggingClient;
use autoalarm_cloud::{AwsClient, AwsCredentials};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use autoalarm_server::config::AutoAlarmConfig;
use autoalarm_server::event;
use autoalarm_server::processor::{EventProcessor, PrometheusTarget};

const DEFAULT_CONFIG_PATH: &str = "config/autoalarm.toml";

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  autoalarm process [config.toml] <events.json>    Reconcile alarms for a JSON array of events");
    eprintln!("  autoalarm enqueue [config.toml] <events.json>    Send events to the configured SQS queue");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autoalarm=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some(command @ ("process" | "enqueue")) => {
            let (config_path, events_path) = match (args.get(2), args.get(3)) {
                (Some(config), Some(events)) => (config.as_str(), events.as_str()),
                (Some(events), None) => (DEFAULT_CONFIG_PATH, events.as_str()),
                _ => {
                    print_usage();
                    anyhow::bail!("{command} requires an <events.json> argument");
                }
            };
            if command == "process" {
                run_process(config_path, events_path).await
            } else {
                run_enqueue(config_path, events_path).await
            }
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            anyhow::bail!("missing or unknown command")
        }
    }
}

fn load(config_path: &str) -> Result<(AutoAlarmConfig, Arc<AwsClient>)> {
    let config = AutoAlarmConfig::load(config_path)
        .with_context(|| format!("Failed to load config '{config_path}'"))?;
    let credentials = AwsCredentials::from_env()?;
    let client = Arc::new(AwsClient::new(&config.region, credentials)?);
    Ok((config, client))
}

/// Reconcile alarms and rules for every event in the file.
async fn run_process(config_path: &str, events_path: &str) -> Result<()> {
    let (config, client) = load(config_path)?;

    let content = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read events file '{events_path}'"))?;
    let events = event::parse_events(&content)?;

    let alarms = AlarmReconciler::new(Arc::new(HttpCloudWatch::new(client.clone())));
    let tags = Arc::new(TaggingClient::new(client.clone()));
    let mut processor =
        EventProcessor::new(alarms, tags, config.retry.backoff(), config.max_concurrent);

    if let Some(workspace_id) = config.workspace_id() {
        tracing::info!(workspace = workspace_id, "Prometheus pathway enabled");
        processor = processor.with_prometheus(PrometheusTarget {
            workspace_id: workspace_id.to_string(),
            reconciler: RuleSetReconciler::new(
                Arc::new(HttpPrometheusRules::new(client.clone())),
                config.prometheus.settings(),
            ),
        });
    }

    let summary = Arc::new(processor).process_all(events).await?;
    if summary.failed > 0 {
        anyhow::bail!("{} event(s) failed", summary.failed);
    }
    Ok(())
}

/// Send each event in the file as one SQS message.
async fn run_enqueue(config_path: &str, events_path: &str) -> Result<()> {
    let (config, client) = load(config_path)?;
    let queue_url = config
        .dispatch
        .queue_url
        .clone()
        .context("dispatch.queue_url is not configured")?;

    let content = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read events file '{events_path}'"))?;
    let messages: Vec<String> = match serde_json::from_str::<serde_json::Value>(&content)
        .with_context(|| format!("Failed to parse events file '{events_path}'"))?
    {
        serde_json::Value::Array(items) => items.iter().map(|v| v.to_string()).collect(),
        single => vec![single.to_string()],
    };

    let sink = Arc::new(SqsBatchSink::new(client, queue_url));
    let mut dispatcher = AdaptiveDispatcher::<String>::new(sink, config.dispatch.batch_settings());
    let summary = dispatcher.dispatch(&messages).await;

    if summary.failed > 0 {
        anyhow::bail!("{} of {} message(s) failed", summary.failed, messages.len());
    }
    Ok(())
}
