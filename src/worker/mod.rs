//! Detection worker
//!
//! Pulls task envelopes from the broker and runs each through the
//! [`Pipeline`]. Every delivery is acknowledged exactly once whatever the
//! outcome; failures are logged, counted and optionally dead-lettered.

pub mod runner;

pub use runner::{DetectionReport, Pipeline, StageTimeouts, TaskError};

use crate::observability::Metrics;
use crate::queue::{Broker, Consumer, Delivery};
use crate::task::TaskEnvelope;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How a single delivery ended
#[derive(Debug)]
pub enum Handled {
    Completed(DetectionReport),
    Failed { task_id: String, error: TaskError },
    Poison(TaskError),
}

impl Handled {
    pub fn is_completed(&self) -> bool {
        matches!(self, Handled::Completed(_))
    }
}

/// Pause after the broker fails to hand out a delivery
const CONSUME_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct Worker {
    consumer: Consumer,
    pipeline: Arc<Pipeline>,
    metrics: Arc<Metrics>,
    dead_letter: bool,
}

impl Worker {
    pub fn new(
        broker: &Arc<Broker>,
        prefetch: usize,
        pipeline: Arc<Pipeline>,
        metrics: Arc<Metrics>,
        dead_letter: bool,
    ) -> Self {
        Self {
            consumer: broker.consume(prefetch),
            pipeline,
            metrics,
            dead_letter,
        }
    }

    /// Consume until `shutdown` resolves or the broker closes
    ///
    /// Deliveries already in progress are allowed to finish. A broker error
    /// while taking the next delivery is logged and retried after a pause.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let this = Arc::new(self);
        let mut in_progress = JoinSet::new();
        let mut backoff = false;
        tokio::pin!(shutdown);

        info!("Worker started, waiting for tasks");

        loop {
            if std::mem::take(&mut backoff) {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested, stopping consumer");
                        break;
                    }
                    _ = tokio::time::sleep(CONSUME_RETRY_DELAY) => {}
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
                next = this.consumer.next() => match next {
                    Ok(Some(delivery)) => {
                        let worker = Arc::clone(&this);
                        in_progress.spawn(async move { worker.handle(delivery).await });
                    }
                    Ok(None) => {
                        info!("Broker closed, stopping consumer");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, retry_in = ?CONSUME_RETRY_DELAY, "Failed to take next delivery");
                        backoff = true;
                    }
                },
                Some(_) = in_progress.join_next(), if !in_progress.is_empty() => {}
            }
        }

        while in_progress.join_next().await.is_some() {}
        info!("Worker stopped");
    }

    /// Process one delivery and acknowledge it
    pub async fn handle(&self, delivery: Delivery) -> Handled {
        let seq = delivery.seq();

        let task = match TaskEnvelope::decode(delivery.body()) {
            Ok(task) => task,
            Err(e) => {
                let err = TaskError::Poison(e);
                error!(seq, error = %err, "Discarding undecodable message");
                self.metrics.poison_message();
                self.settle(delivery, Some(&err));
                return Handled::Poison(err);
            }
        };

        if delivery.redelivered() {
            info!(seq, task_id = %task.task_id, "Reprocessing redelivered task");
        }

        // Run in a separate task so a panic still ends in an ack
        let pipeline = Arc::clone(&self.pipeline);
        let envelope = task.clone();
        let result = tokio::spawn(async move { pipeline.process(&envelope).await })
            .await
            .unwrap_or_else(|e| Err(TaskError::Aborted(e.to_string())));

        match result {
            Ok(report) => {
                info!(
                    seq,
                    task_id = %report.task_id,
                    url = %task.source_url,
                    people = report.people,
                    output = %report.output_path,
                    "Task completed"
                );
                self.metrics.task_completed(report.people);
                self.settle(delivery, None);
                Handled::Completed(report)
            }
            Err(err) => {
                error!(
                    seq,
                    task_id = %task.task_id,
                    url = %task.source_url,
                    code = err.code(),
                    error = %err,
                    "Task failed"
                );
                self.metrics.task_failed();
                self.settle(delivery, Some(&err));
                Handled::Failed {
                    task_id: task.task_id,
                    error: err,
                }
            }
        }
    }

    fn settle(&self, delivery: Delivery, failure: Option<&TaskError>) {
        let seq = delivery.seq();

        if let (true, Some(err)) = (self.dead_letter, failure) {
            if let Err(e) = delivery.record_dead_letter(err.code(), &err.to_string()) {
                warn!(seq, error = %e, "Failed to record dead letter");
            }
        }

        if let Err(e) = delivery.ack() {
            error!(seq, error = %e, "Failed to acknowledge message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Detection, Detector, DetectorError};
    use crate::fetch::{self, ImageFetcher};
    use crate::storage::ObjectResultStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat};
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tokio::time::{sleep, timeout};

    struct PngFetcher;

    #[async_trait]
    impl ImageFetcher for PngFetcher {
        async fn probe(&self, _url: &str) -> fetch::Result<()> {
            Ok(())
        }

        async fn fetch(&self, _url: &str) -> fetch::Result<Bytes> {
            let mut buffer = std::io::Cursor::new(Vec::new());
            DynamicImage::new_rgb8(8, 8)
                .write_to(&mut buffer, ImageFormat::Png)
                .unwrap();
            Ok(Bytes::from(buffer.into_inner()))
        }
    }

    struct NobodyDetector;

    #[async_trait]
    impl Detector for NobodyDetector {
        async fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_run_survives_broker_read_failures() {
        let temp_dir = TempDir::new().unwrap();
        let broker = Arc::new(Broker::open(temp_dir.path(), "tasks").unwrap());
        let metrics = Arc::new(Metrics::new());
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PngFetcher),
            Arc::new(NobodyDetector),
            Arc::new(ObjectResultStore::in_memory()),
            StageTimeouts::default(),
        ));

        let envelope = TaskEnvelope::new("http://example.com/a.png", "png");
        broker.publish(&envelope.encode()).unwrap();
        broker.fail_next_reads(2);

        let worker = Worker::new(&broker, 1, pipeline, Arc::clone(&metrics), true);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let running = tokio::spawn(worker.run(async move {
            let _ = stop_rx.changed().await;
        }));

        timeout(Duration::from_secs(10), async {
            while metrics.snapshot().tasks_completed == 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task was not processed after read failures");

        stop_tx.send(true).unwrap();
        running.await.unwrap();

        let stats = broker.stats().unwrap();
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.ready, 0);
    }
}
