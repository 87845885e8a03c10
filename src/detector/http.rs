//! Remote detector reached over HTTP
//!
//! Contract: `POST <endpoint>` with the image encoded as PNG
//! (`Content-Type: image/png`); the service answers with a JSON array of
//! detections, e.g. `[{"class_index": 15, "confidence": 0.92, "box": [0.1, 0.2, 0.4, 0.9]}]`.

use super::{Detection, Detector, DetectorError};
use crate::config::DetectorConfig;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

pub struct HttpDetector {
    client: Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        let mut encoded = Cursor::new(Vec::new());
        image
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|e| DetectorError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(encoded.into_inner())
            .send()
            .await
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        let detections: Vec<Detection> = serde_json::from_slice(&body)
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;

        debug!(endpoint = %self.endpoint, count = detections.len(), "Detector responded");

        Ok(detections)
    }
}
