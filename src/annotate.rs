//! Drawing person boxes onto images

use crate::detector::Detection;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 3;

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Encoding and file extension used for an annotated artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub format: ImageFormat,
    pub extension: String,
}

impl OutputFormat {
    /// Pick the encoder for a task's file extension
    ///
    /// The extension keeps its original case. Anything that is not a known
    /// image extension is written as PNG.
    pub fn for_extension(extension: &str) -> Self {
        let format = match extension.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::WebP),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        };

        match format {
            Some(format) => Self {
                format,
                extension: extension.to_string(),
            },
            None => Self {
                format: ImageFormat::Png,
                extension: "png".to_string(),
            },
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, AnnotateError> {
    image::load_from_memory(bytes).map_err(|e| AnnotateError::Decode(e.to_string()))
}

/// Copy `image` and outline every detection on the copy
pub fn draw_boxes(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let rect = detection.bbox.to_pixels(width, height);

        for t in 0..BOX_THICKNESS {
            let left = rect.left.saturating_add(t).min(rect.right);
            let right = rect.right.saturating_sub(t).max(left);
            let top = rect.top.saturating_add(t).min(rect.bottom);
            let bottom = rect.bottom.saturating_sub(t).max(top);

            for x in left..=right {
                canvas.put_pixel(x, top, BOX_COLOR);
                canvas.put_pixel(x, bottom, BOX_COLOR);
            }
            for y in top..=bottom {
                canvas.put_pixel(left, y, BOX_COLOR);
                canvas.put_pixel(right, y, BOX_COLOR);
            }
        }
    }

    canvas
}

pub fn encode(image: RgbImage, format: ImageFormat) -> Result<Vec<u8>, AnnotateError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, format)
        .map_err(|e| AnnotateError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoundingBox;

    fn person(x0: f32, y0: f32, x1: f32, y1: f32) -> Detection {
        Detection {
            class_index: 15,
            confidence: 0.9,
            bbox: BoundingBox { x0, y0, x1, y1 },
        }
    }

    #[test]
    fn test_output_format_for_extension() {
        let jpg = OutputFormat::for_extension("JPG");
        assert_eq!(jpg.format, ImageFormat::Jpeg);
        assert_eq!(jpg.extension, "JPG");

        let unknown = OutputFormat::for_extension("");
        assert_eq!(unknown.format, ImageFormat::Png);
        assert_eq!(unknown.extension, "png");

        assert_eq!(OutputFormat::for_extension("php").extension, "png");
    }

    #[test]
    fn test_draw_boxes_outlines_scaled_rect() {
        let image = DynamicImage::new_rgb8(100, 50);
        let canvas = draw_boxes(&image, &[person(0.2, 0.2, 0.6, 0.8)]);

        // Corners at (20, 10) and (60, 40)
        assert_eq!(*canvas.get_pixel(20, 10), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(60, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(22, 25), BOX_COLOR);
        // Inside the border stays untouched
        assert_eq!(*canvas.get_pixel(40, 25), Rgb([0, 0, 0]));
        // Original is not modified
        assert_eq!(image.to_rgb8().get_pixel(20, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_degenerate_box() {
        let image = DynamicImage::new_rgb8(10, 10);
        let canvas = draw_boxes(&image, &[person(0.5, 0.5, 0.5, 0.5)]);
        assert_eq!(*canvas.get_pixel(5, 5), BOX_COLOR);
    }

    #[test]
    fn test_encode_decode() {
        let image = DynamicImage::new_rgb8(4, 4);
        let canvas = draw_boxes(&image, &[]);
        let bytes = encode(canvas, ImageFormat::Png).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
        assert!(decode(b"not an image").is_err());
    }
}
