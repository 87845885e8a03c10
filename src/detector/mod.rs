//! Object detection capability
//!
//! The worker treats detection as an opaque service: it hands over a decoded
//! image and receives `(class, confidence, box)` triples with boxes
//! normalized to `[0, 1]`. Implementations own their model; a loaded model is
//! shared read-only by every task in the process.

pub mod http;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpDetector;

/// Class index of "person" in the MobileNet-SSD (VOC) label scheme
pub const PERSON_CLASS_INDEX: u32 = 15;

/// Detections at or below this confidence are ignored
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Failed to encode image for detector: {0}")]
    Encode(String),

    #[error("Detector request failed: {0}")]
    Request(String),

    #[error("Detector returned HTTP {0}")]
    Status(u16),

    #[error("Detector response invalid: {0}")]
    InvalidResponse(String),

    #[error("Detector failed: {0}")]
    Inference(String),
}

/// Box corners normalized to the image size
///
/// Serialized as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x0, y0, x1, y1]: [f32; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Pixel-space rectangle, inclusive corners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    /// Scale to pixel coordinates of a `width` x `height` image
    ///
    /// Coordinates are truncated like an integer cast and clamped to the
    /// image, and the corners are ordered.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let scale = |v: f32, extent: u32| -> u32 {
            let max = extent.saturating_sub(1) as f32;
            (v * extent as f32).clamp(0.0, max) as u32
        };

        let (x0, x1) = (scale(self.x0, width), scale(self.x1, width));
        let (y0, y1) = (scale(self.y0, height), scale(self.y1, height));

        PixelRect {
            left: x0.min(x1),
            top: y0.min(y1),
            right: x0.max(x1),
            bottom: y0.max(y1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_index: u32,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_index == PERSON_CLASS_INDEX && self.confidence > CONFIDENCE_THRESHOLD
    }
}

/// Keep only confident person detections
pub fn select_persons(detections: &[Detection]) -> Vec<Detection> {
    detections.iter().filter(|d| d.is_person()).copied().collect()
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Run detection on a decoded image
    ///
    /// CPU-bound implementations should run inference on a blocking thread
    /// (`tokio::task::spawn_blocking`) so the runtime is not stalled.
    async fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_index: u32, confidence: f32) -> Detection {
        Detection {
            class_index,
            confidence,
            bbox: BoundingBox { x0: 0.1, y0: 0.1, x1: 0.5, y1: 0.5 },
        }
    }

    #[test]
    fn test_person_filter() {
        let detections = [detection(15, 0.5), detection(2, 0.9), detection(15, 0.2)];
        let persons = select_persons(&detections);
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0], detections[0]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(!detection(15, CONFIDENCE_THRESHOLD).is_person());
        assert!(detection(15, 0.31).is_person());
    }

    #[test]
    fn test_box_scaling() {
        let bbox = BoundingBox { x0: 0.25, y0: 0.5, x1: 0.75, y1: 1.0 };
        let rect = bbox.to_pixels(200, 100);
        assert_eq!(rect, PixelRect { left: 50, top: 50, right: 150, bottom: 99 });
    }

    #[test]
    fn test_box_clamped_and_ordered() {
        let bbox = BoundingBox { x0: 1.4, y0: -0.2, x1: 0.5, y1: 0.5 };
        let rect = bbox.to_pixels(10, 10);
        assert_eq!(rect, PixelRect { left: 5, top: 0, right: 9, bottom: 5 });
    }

    #[test]
    fn test_detection_wire_format() {
        let json = r#"{"class_index": 15, "confidence": 0.8, "box": [0.1, 0.2, 0.3, 0.4]}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.class_index, 15);
        assert_eq!(detection.bbox, BoundingBox { x0: 0.1, y0: 0.2, x1: 0.3, y1: 0.4 });
    }
}
