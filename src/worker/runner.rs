//! Task runner - turns one task envelope into an annotated artifact

use crate::annotate::{self, AnnotateError, OutputFormat};
use crate::config::Config;
use crate::detector::{Detector, DetectorError, select_persons};
use crate::fetch::{FetchError, ImageFetcher};
use crate::storage::{ResultStore, StorageError};
use crate::task::{EnvelopeError, TaskEnvelope};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Poison message: {0}")]
    Poison(#[from] EnvelopeError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Image undecodable: {0}")]
    Decode(String),

    #[error("Detection failed: {0}")]
    Detect(#[from] DetectorError),

    #[error("Annotation failed: {0}")]
    Annotate(String),

    #[error("Persist failed: {0}")]
    Persist(#[from] StorageError),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Poison(_) => "POISON_MESSAGE",
            TaskError::Fetch(_) => "FETCH_FAILED",
            TaskError::Decode(_) => "UNDECODABLE_IMAGE",
            TaskError::Detect(_) => "DETECTION_FAILED",
            TaskError::Annotate(_) => "ANNOTATION_FAILED",
            TaskError::Persist(_) => "PERSIST_FAILED",
            TaskError::Timeout { .. } => "TIMEOUT",
            TaskError::Aborted(_) => "ABORTED",
        }
    }
}

impl From<AnnotateError> for TaskError {
    fn from(err: AnnotateError) -> Self {
        match err {
            AnnotateError::Decode(msg) => TaskError::Decode(msg),
            AnnotateError::Encode(msg) => TaskError::Annotate(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// What a successfully processed task produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub task_id: String,
    pub people: usize,
    pub output_path: String,
}

/// Upper bounds for the suspending stages of a task
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub detect: Duration,
}

impl StageTimeouts {
    /// Fetch bound covers every configured attempt plus retry backoff
    pub fn from_config(config: &Config) -> Self {
        let per_attempt = config.fetch.connect_timeout_ms + config.fetch.request_timeout_ms;
        let attempts = u64::from(config.fetch.max_attempts.max(1));
        let backoff_secs = (1u64 << (attempts - 1).min(16)) - 1;

        Self {
            fetch: Duration::from_millis(per_attempt * attempts) + Duration::from_secs(backoff_secs),
            detect: Duration::from_millis(config.detector.timeout_ms),
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(40),
            detect: Duration::from_secs(60),
        }
    }
}

/// Fetch → decode → detect → annotate → persist
pub struct Pipeline {
    fetcher: Arc<dyn ImageFetcher>,
    detector: Arc<dyn Detector>,
    store: Arc<dyn ResultStore>,
    timeouts: StageTimeouts,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        detector: Arc<dyn Detector>,
        store: Arc<dyn ResultStore>,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            fetcher,
            detector,
            store,
            timeouts,
        }
    }

    /// Process a task pulled from the queue
    pub async fn process(&self, task: &TaskEnvelope) -> Result<DetectionReport> {
        debug!(task_id = %task.task_id, url = %task.source_url, "Fetching image");

        let bytes = timeout(self.timeouts.fetch, self.fetcher.fetch(&task.source_url))
            .await
            .map_err(|_| TaskError::Timeout {
                stage: "fetch",
                after: self.timeouts.fetch,
            })??;

        self.process_bytes(&task.task_id, &task.file_extension, bytes.to_vec())
            .await
    }

    /// Process image bytes that are already in hand
    pub async fn process_bytes(
        &self,
        task_id: &str,
        file_extension: &str,
        bytes: Vec<u8>,
    ) -> Result<DetectionReport> {
        let image = tokio::task::spawn_blocking(move || annotate::decode(&bytes))
            .await
            .map_err(|e| TaskError::Aborted(e.to_string()))??;

        debug!(task_id, width = image.width(), height = image.height(), "Running detector");

        let detections = timeout(self.timeouts.detect, self.detector.detect(&image))
            .await
            .map_err(|_| TaskError::Timeout {
                stage: "detection",
                after: self.timeouts.detect,
            })??;

        let persons = select_persons(&detections);
        let people = persons.len();
        let output = OutputFormat::for_extension(file_extension);
        let format = output.format;

        let encoded = tokio::task::spawn_blocking(move || {
            annotate::encode(annotate::draw_boxes(&image, &persons), format)
        })
        .await
        .map_err(|e| TaskError::Aborted(e.to_string()))??;

        let output_path = self.store.put(task_id, &output.extension, encoded).await?;

        Ok(DetectionReport {
            task_id: task_id.to_string(),
            people,
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{BoundingBox, Detection};
    use crate::storage::ObjectResultStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat};

    struct StaticFetcher(std::result::Result<Bytes, FetchError>);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn probe(&self, _url: &str) -> crate::fetch::Result<()> {
            Ok(())
        }

        async fn fetch(&self, _url: &str) -> crate::fetch::Result<Bytes> {
            self.0.clone()
        }
    }

    struct StaticDetector(Vec<Detection>);

    #[async_trait]
    impl Detector for StaticDetector {
        async fn detect(
            &self,
            _image: &DynamicImage,
        ) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct StalledDetector;

    #[async_trait]
    impl Detector for StalledDetector {
        async fn detect(
            &self,
            _image: &DynamicImage,
        ) -> std::result::Result<Vec<Detection>, DetectorError> {
            std::future::pending().await
        }
    }

    fn png_bytes() -> Bytes {
        let mut buffer = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(32, 32)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        Bytes::from(buffer.into_inner())
    }

    fn detection(class_index: u32, confidence: f32) -> Detection {
        Detection {
            class_index,
            confidence,
            bbox: BoundingBox { x0: 0.1, y0: 0.1, x1: 0.9, y1: 0.9 },
        }
    }

    fn task(ext: &str) -> TaskEnvelope {
        TaskEnvelope {
            task_id: "task-1".to_string(),
            source_url: format!("http://example.com/pic.{ext}"),
            file_extension: ext.to_string(),
        }
    }

    #[tokio::test]
    async fn test_counts_only_confident_persons() {
        let store = Arc::new(ObjectResultStore::in_memory());
        let pipeline = Pipeline::new(
            Arc::new(StaticFetcher(Ok(png_bytes()))),
            Arc::new(StaticDetector(vec![
                detection(15, 0.5),
                detection(2, 0.9),
                detection(15, 0.2),
            ])),
            store.clone(),
            StageTimeouts::default(),
        );

        let report = pipeline.process(&task("png")).await.unwrap();
        assert_eq!(report.people, 1);
        assert_eq!(report.output_path, "marked/marked_task-1.png");

        let stored = store.get(&report.output_path).await.unwrap();
        assert!(image::load_from_memory_with_format(&stored, ImageFormat::Png).is_ok());
    }

    #[tokio::test]
    async fn test_jpeg_output_keeps_extension_case() {
        let store = Arc::new(ObjectResultStore::in_memory());
        let pipeline = Pipeline::new(
            Arc::new(StaticFetcher(Ok(png_bytes()))),
            Arc::new(StaticDetector(vec![])),
            store.clone(),
            StageTimeouts::default(),
        );

        let report = pipeline.process(&task("JPG")).await.unwrap();
        assert_eq!(report.output_path, "marked/marked_task-1.JPG");

        let stored = store.get(&report.output_path).await.unwrap();
        assert!(image::load_from_memory_with_format(&stored, ImageFormat::Jpeg).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let pipeline = Pipeline::new(
            Arc::new(StaticFetcher(Err(FetchError::Status {
                status: 404,
                reason: "Not Found".into(),
            }))),
            Arc::new(StaticDetector(vec![])),
            Arc::new(ObjectResultStore::in_memory()),
            StageTimeouts::default(),
        );

        let err = pipeline.process(&task("png")).await.unwrap_err();
        assert_eq!(err.code(), "FETCH_FAILED");
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let pipeline = Pipeline::new(
            Arc::new(StaticFetcher(Ok(Bytes::from_static(b"<html>nope</html>")))),
            Arc::new(StaticDetector(vec![])),
            Arc::new(ObjectResultStore::in_memory()),
            StageTimeouts::default(),
        );

        let err = pipeline.process(&task("png")).await.unwrap_err();
        assert!(matches!(err, TaskError::Decode(_)));
    }

    #[tokio::test]
    async fn test_detection_timeout() {
        let pipeline = Pipeline::new(
            Arc::new(StaticFetcher(Ok(png_bytes()))),
            Arc::new(StalledDetector),
            Arc::new(ObjectResultStore::in_memory()),
            StageTimeouts {
                fetch: Duration::from_secs(1),
                detect: Duration::from_millis(20),
            },
        );

        let err = pipeline.process(&task("png")).await.unwrap_err();
        assert!(matches!(err, TaskError::Timeout { stage: "detection", .. }));
    }

    #[test]
    fn test_stage_timeouts_from_config() {
        let mut config = Config::default();
        config.fetch.connect_timeout_ms = 1_000;
        config.fetch.request_timeout_ms = 4_000;
        config.fetch.max_attempts = 2;
        config.detector.timeout_ms = 7_000;

        let timeouts = StageTimeouts::from_config(&config);
        // 2 attempts x 5s plus 1s backoff
        assert_eq!(timeouts.fetch, Duration::from_secs(11));
        assert_eq!(timeouts.detect, Duration::from_secs(7));
    }
}
