//! Adaptive-delay batch dispatch.
//!
//! Messages are sent in fixed-size batches with a pause between batches.
//! Throttling stretches the pause by `factor` up to `max_delay`; batches
//! that complete within `fast_batch` shrink it by the same factor down to
//! `min_delay`.

use crate::aws::AwsClient;
use crate::error::{Result, THROTTLING_CODES};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Batches faster than this count as uncongested.
    pub fast_batch: Duration,
    /// Sends per batch, including the first.
    pub max_batch_attempts: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            factor: 1.5,
            fast_batch: Duration::from_millis(500),
            max_batch_attempts: 3,
        }
    }
}

/// Entry of a batch the receiver rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEntry {
    /// Position within the submitted batch
    pub index: usize,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub failed: Vec<FailedEntry>,
}

impl BatchOutcome {
    pub fn throttled(&self) -> bool {
        self.failed
            .iter()
            .any(|f| THROTTLING_CODES.contains(&f.code.as_str()))
    }
}

#[async_trait::async_trait]
pub trait BatchSink<M: Send + Sync>: Send + Sync {
    async fn send_batch(&self, batch: &[M]) -> Result<BatchOutcome>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub batches: usize,
}

pub struct AdaptiveDispatcher<M: Send + Sync> {
    sink: Arc<dyn BatchSink<M>>,
    settings: BatchSettings,
    delay: Duration,
}

impl<M: Clone + Send + Sync> AdaptiveDispatcher<M> {
    pub fn new(sink: Arc<dyn BatchSink<M>>, settings: BatchSettings) -> Self {
        let delay = settings.min_delay;
        Self {
            sink,
            settings,
            delay,
        }
    }

    /// Current inter-batch delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Factors below 1 (or not finite) would invert the backoff.
    fn factor(&self) -> f64 {
        if self.settings.factor.is_finite() && self.settings.factor >= 1.0 {
            self.settings.factor
        } else {
            1.0
        }
    }

    fn slow_down(&mut self) {
        let max_delay = self.settings.max_delay;
        self.delay = Duration::try_from_secs_f64(self.delay.as_secs_f64() * self.factor())
            .map_or(max_delay, |d| d.min(max_delay));
    }

    fn speed_up(&mut self) {
        self.delay = self
            .delay
            .div_f64(self.factor())
            .max(self.settings.min_delay);
    }

    pub async fn dispatch(&mut self, messages: &[M]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let batch_size = self.settings.batch_size.max(1);
        let max_attempts = self.settings.max_batch_attempts.max(1);

        for (i, chunk) in messages.chunks(batch_size).enumerate() {
            if i > 0 {
                sleep(self.delay).await;
            }
            summary.batches += 1;

            let mut pending: Vec<M> = chunk.to_vec();
            let mut attempt = 1;
            loop {
                let started = Instant::now();
                let result = self.sink.send_batch(&pending).await;
                let elapsed = started.elapsed();

                let retry: Vec<M> = match result {
                    Ok(outcome) => {
                        summary.sent += pending.len().saturating_sub(outcome.failed.len());
                        if outcome.throttled() {
                            self.slow_down();
                        } else if elapsed < self.settings.fast_batch {
                            self.speed_up();
                        }
                        outcome
                            .failed
                            .iter()
                            .filter_map(|f| pending.get(f.index).cloned())
                            .collect()
                    }
                    Err(e) if e.is_throttling() => {
                        self.slow_down();
                        pending.clone()
                    }
                    Err(e) => {
                        tracing::error!(batch = i, size = pending.len(), error = %e, "Batch send failed");
                        summary.failed += pending.len();
                        break;
                    }
                };

                if retry.is_empty() {
                    break;
                }
                if attempt >= max_attempts {
                    tracing::warn!(batch = i, failed = retry.len(), "Giving up on batch entries");
                    summary.failed += retry.len();
                    break;
                }

                tracing::debug!(
                    batch = i,
                    attempt,
                    retry = retry.len(),
                    delay_ms = self.delay.as_millis() as u64,
                    "Retrying failed batch entries"
                );
                attempt += 1;
                pending = retry;
                sleep(self.delay).await;
            }
        }

        tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            batches = summary.batches,
            delay_ms = self.delay.as_millis() as u64,
            "Dispatch finished"
        );
        summary
    }
}

/// Sends message bodies to an SQS queue with `SendMessageBatch`.
pub struct SqsBatchSink {
    client: Arc<AwsClient>,
    queue_url: String,
}

impl SqsBatchSink {
    pub fn new(client: Arc<AwsClient>, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl BatchSink<String> for SqsBatchSink {
    async fn send_batch(&self, batch: &[String]) -> Result<BatchOutcome> {
        let entries: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(i, body)| json!({ "Id": i.to_string(), "MessageBody": body }))
            .collect();

        let resp = self
            .client
            .call_json(
                "sqs",
                "sqs",
                "AmazonSQS.SendMessageBatch",
                "1.0",
                &json!({ "QueueUrl": self.queue_url, "Entries": entries }),
            )
            .await?;

        let failed = resp["Failed"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|f| {
                        let index = f["Id"].as_str()?.parse().ok()?;
                        Some(FailedEntry {
                            index,
                            code: f["Code"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(BatchOutcome { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses; defaults to success once exhausted.
    struct ScriptedSink {
        script: Mutex<VecDeque<Result<BatchOutcome>>>,
        latency: Duration,
        batches: Mutex<Vec<Vec<u32>>>,
    }

    impl ScriptedSink {
        fn new(script: Vec<Result<BatchOutcome>>, latency: Duration) -> Self {
            Self {
                script: Mutex::new(script.into()),
                latency,
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BatchSink<u32> for ScriptedSink {
        async fn send_batch(&self, batch: &[u32]) -> Result<BatchOutcome> {
            self.batches.lock().unwrap().push(batch.to_vec());
            sleep(self.latency).await;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(BatchOutcome::default()))
        }
    }

    fn throttled_entry(index: usize) -> FailedEntry {
        FailedEntry {
            index,
            code: "ThrottlingException".into(),
        }
    }

    fn messages(n: u32) -> Vec<u32> {
        (0..n).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn should_split_messages_into_fixed_size_batches() {
        let sink = Arc::new(ScriptedSink::new(vec![], Duration::from_millis(10)));
        let mut dispatcher = AdaptiveDispatcher::new(sink.clone(), BatchSettings::default());

        let summary = dispatcher.dispatch(&messages(25)).await;

        assert_eq!(
            summary,
            DispatchSummary {
                sent: 25,
                failed: 0,
                batches: 3
            }
        );
        let sizes: Vec<usize> = sink.batches.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(dispatcher.delay(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn should_slow_down_on_throttling_and_retry_failed_entries() {
        let sink = Arc::new(ScriptedSink::new(
            vec![Ok(BatchOutcome {
                failed: vec![throttled_entry(3), throttled_entry(7)],
            })],
            Duration::from_millis(600),
        ));
        let mut dispatcher = AdaptiveDispatcher::new(sink.clone(), BatchSettings::default());

        let summary = dispatcher.dispatch(&messages(10)).await;

        assert_eq!(summary.sent, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(dispatcher.delay(), Duration::from_millis(1500));
        assert_eq!(sink.batches.lock().unwrap()[1], vec![3, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_delay_within_bounds() {
        let throttle = || {
            Err(CloudError::Throttled {
                service: "sqs".into(),
            })
        };
        let sink = Arc::new(ScriptedSink::new(
            vec![throttle(), throttle(), throttle(), throttle(), throttle()],
            Duration::from_millis(600),
        ));
        let mut dispatcher = AdaptiveDispatcher::new(sink.clone(), BatchSettings::default());

        let summary = dispatcher.dispatch(&messages(20)).await;
        assert_eq!(dispatcher.delay(), Duration::from_millis(2000));
        assert_eq!(summary.failed, 10);
        assert_eq!(summary.sent, 10);

        let fast = Arc::new(ScriptedSink::new(vec![], Duration::from_millis(10)));
        let mut dispatcher = AdaptiveDispatcher::new(fast, BatchSettings::default());
        dispatcher.slow_down();
        dispatcher.slow_down();
        dispatcher.dispatch(&messages(50)).await;
        assert_eq!(dispatcher.delay(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_factors_that_cannot_back_off() {
        for factor in [-2.0, 0.0, 0.5, f64::NAN] {
            let sink = Arc::new(ScriptedSink::new(vec![], Duration::from_millis(10)));
            let settings = BatchSettings {
                factor,
                ..BatchSettings::default()
            };
            let mut dispatcher = AdaptiveDispatcher::new(sink, settings);
            dispatcher.slow_down();
            assert_eq!(dispatcher.delay(), Duration::from_millis(1000));
            dispatcher.speed_up();
            assert_eq!(dispatcher.delay(), Duration::from_millis(1000));
        }

        let sink = Arc::new(ScriptedSink::new(vec![], Duration::from_millis(10)));
        let settings = BatchSettings {
            factor: 1e300,
            ..BatchSettings::default()
        };
        let mut dispatcher = AdaptiveDispatcher::new(sink, settings);
        dispatcher.slow_down();
        assert_eq!(dispatcher.delay(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn should_count_batch_as_failed_on_non_retryable_error() {
        let sink = Arc::new(ScriptedSink::new(
            vec![Err(CloudError::ApiResponseError {
                service: "sqs".into(),
                code: "AWS.SimpleQueueService.NonExistentQueue".into(),
                message: "queue does not exist".into(),
            })],
            Duration::from_millis(10),
        ));
        let mut dispatcher = AdaptiveDispatcher::new(sink.clone(), BatchSettings::default());

        let summary = dispatcher.dispatch(&messages(12)).await;

        assert_eq!(summary.failed, 10);
        assert_eq!(summary.sent, 2);
        assert_eq!(sink.batches.lock().unwrap().len(), 2);
    }
}
